//! Container configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields
//! the stock test-driver setup: the system is called `sut`, the diagnostic
//! trace goes to stderr and an illegal transition prints its marker and
//! exits.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the diagnostic trace goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceMode {
    /// Discard.
    Off,
    /// One line per record on stderr.
    #[default]
    Stderr,
    /// Keep in memory for [`Container::trace`](crate::Container::trace).
    Capture,
}

/// What an illegal transition does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IllegalPolicy {
    /// Print `<location>:0: <illegal>` and exit with status 0.
    #[default]
    Exit,
    /// Abort the process.
    Abort,
    /// Record the location and unwind; the run reports it as an error.
    Unwind,
}

/// Container settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Instance name given to the system's root component.
    pub name: String,
    /// Diagnostic trace destination.
    pub trace: TraceMode,
    /// Illegal-transition policy.
    pub illegal: IllegalPolicy,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Upper bound on the virtual clock.
    pub max_ticks: Option<u64>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            name: "sut".to_string(),
            trace: TraceMode::default(),
            illegal: IllegalPolicy::default(),
            log_filter: "warn".to_string(),
            max_ticks: None,
        }
    }
}

/// Configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("read {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The content is neither valid JSON nor valid TOML for this schema.
    #[error("parse {format} config: {message}")]
    Parse {
        /// `JSON`, `TOML` or `JSON/TOML`.
        format: &'static str,
        /// Parser message.
        message: String,
    },
}

impl ContainerConfig {
    /// Load from a `.json` or `.toml` file; other extensions try both.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(std::ffi::OsStr::to_str) {
            Some("json") => serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                format: "JSON",
                message: e.to_string(),
            }),
            Some("toml") => Self::parse(&content),
            _ => serde_json::from_str(&content)
                .or_else(|_| Self::parse(&content))
                .map_err(|e| ConfigError::Parse {
                    format: "JSON/TOML",
                    message: e.to_string(),
                }),
        }
    }

    /// Parse TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed input.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse {
            format: "TOML",
            message: e.to_string(),
        })
    }

    /// Set the system name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the trace destination.
    #[must_use]
    pub fn with_trace(mut self, trace: TraceMode) -> Self {
        self.trace = trace;
        self
    }

    /// Set the illegal-transition policy.
    #[must_use]
    pub fn with_illegal(mut self, illegal: IllegalPolicy) -> Self {
        self.illegal = illegal;
        self
    }

    /// Set the `tracing` filter used when `RUST_LOG` is unset.
    #[must_use]
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Bound the virtual clock.
    #[must_use]
    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = Some(max_ticks);
        self
    }
}
