//! Scenario trail: the recorded sequence of expected event firings.
//!
//! A trail is fed from two sides. The driver pushes every stimulus line it
//! reads, and matching pulls further lines from the same input when the
//! pending queue runs dry, so replies and out-events that the input lists
//! after a trigger are found in input order.

use std::collections::VecDeque;
use std::fmt;
use std::io::BufRead;

/// Token that hands the rest of the input to the next idle moment.
pub const DEFER: &str = "<defer>";

/// A scenario run diverged from its recording.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// The next expectation names a different event.
    #[error("unmatched expectation: expect \"{expected}\" but got \"{performed}\"")]
    Mismatch {
        /// Expected event.
        expected: String,
        /// Event the system performed.
        performed: String,
    },
    /// The system performed an event after the trail ran out.
    #[error("unmatched expectation: behavior performs \"{performed}\" but trail is empty")]
    Exhausted {
        /// Event the system performed.
        performed: String,
    },
    /// The run ended with expectations left over.
    #[error("scenario ended with {} unmatched expectation(s): {remaining:?}", remaining.len())]
    Incomplete {
        /// Leftover expectations in order.
        remaining: Vec<String>,
    },
    /// A trigger was fired by name but never registered.
    #[error("unknown trigger `{name}`")]
    UnknownTrigger {
        /// Requested trigger.
        name: String,
    },
    /// The scenario input could not be read.
    #[error("reading scenario input: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether `line` is a compound reply the driver skips.
#[must_use]
pub fn is_compound(line: &str) -> bool {
    line.matches('.').count() > 1
}

/// Expected firings, optionally backed by unread input.
#[derive(Default)]
pub struct Trail {
    pending: VecDeque<String>,
    source: Option<Box<dyn BufRead>>,
}

impl Trail {
    /// Empty trail with no input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trail holding a fixed recording.
    #[must_use]
    pub fn recorded<I, T>(events: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            pending: events.into_iter().map(Into::into).collect(),
            source: None,
        }
    }

    /// Trail that reads its recording lazily from `reader`.
    #[must_use]
    pub fn from_reader<R: BufRead + 'static>(reader: R) -> Self {
        let mut trail = Self::new();
        trail.attach(reader);
        trail
    }

    /// Replace the input.
    pub fn attach<R: BufRead + 'static>(&mut self, reader: R) {
        self.source = Some(Box::new(reader));
    }

    /// Next input line without its line ending; `None` at end of input or
    /// on a blank line.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::Io`] if the input fails.
    pub fn read_line(&mut self) -> Result<Option<String>, ScenarioError> {
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };
        let mut line = String::new();
        if source.read_line(&mut line)? == 0 {
            self.source = None;
            return Ok(None);
        }
        let line = line.trim_end_matches(['\n', '\r']).to_string();
        if line.is_empty() {
            self.source = None;
            return Ok(None);
        }
        Ok(Some(line))
    }

    /// Append an expectation.
    pub fn push(&mut self, event: impl Into<String>) {
        self.pending.push_back(event.into());
    }

    /// Pop the next expectation and compare it with `performed`.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::Mismatch`] or [`ScenarioError::Exhausted`].
    pub fn matches(&mut self, performed: &str) -> Result<(), ScenarioError> {
        if self.pending.is_empty() {
            self.pull()?;
        }
        let Some(expected) = self.pending.pop_front() else {
            return Err(ScenarioError::Exhausted {
                performed: performed.to_string(),
            });
        };
        if expected != performed {
            return Err(ScenarioError::Mismatch {
                expected,
                performed: performed.to_string(),
            });
        }
        tracing::trace!(event = performed, "expectation matched");
        Ok(())
    }

    /// Expectations not yet matched, including unread input.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::Io`] if the input fails.
    pub fn drain(&mut self) -> Result<Vec<String>, ScenarioError> {
        while self.pull()? {}
        Ok(self.pending.drain(..).collect())
    }

    /// Fail if anything is left to match.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::Incomplete`] with the leftovers.
    pub fn finish(&mut self) -> Result<(), ScenarioError> {
        let remaining = self.drain()?;
        if remaining.is_empty() {
            Ok(())
        } else {
            Err(ScenarioError::Incomplete { remaining })
        }
    }

    /// Queued expectations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// No queued expectation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn pull(&mut self) -> Result<bool, ScenarioError> {
        while let Some(line) = self.read_line()? {
            if line != DEFER && !is_compound(&line) {
                self.pending.push_back(line);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl fmt::Debug for Trail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trail")
            .field("pending", &self.pending)
            .field("input", &self.source.is_some())
            .finish()
    }
}
