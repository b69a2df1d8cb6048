//! `tracing` subscriber bootstrap for scenario runs.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a stderr `fmt` subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Returns `false` if a global
/// subscriber was already installed, which is the normal case when several
/// containers run in one test binary.
pub fn init(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_refused() {
        init("warn");
        assert!(!init("debug"));
    }
}
