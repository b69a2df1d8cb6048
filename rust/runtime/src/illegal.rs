//! Reactions to protocol violations.
//!
//! A violation means the running system left its verified envelope, so no
//! handler is allowed to resume dispatch. If a handler returns, the kernel
//! panics with the [`IllegalTransition`](crate::IllegalTransition) message.

use std::cell::RefCell;
use std::rc::Rc;

/// Installed through [`Locator::set_illegal`](crate::Locator::set_illegal).
pub trait IllegalHandler {
    /// Called exactly once with the violating port path.
    fn illegal(&self, location: &str);
}

/// Default handler: log and abort the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbortOnIllegal;

impl IllegalHandler for AbortOnIllegal {
    fn illegal(&self, location: &str) {
        tracing::error!(location, "illegal transition, aborting");
        std::process::abort();
    }
}

/// Print `<location>:0: <illegal>` to stderr and exit with `code`.
///
/// Test drivers match on the marker line, so the format is fixed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitOnIllegal {
    /// Process exit status.
    pub code: i32,
}

impl IllegalHandler for ExitOnIllegal {
    fn illegal(&self, location: &str) {
        tracing::error!(location, code = self.code, "illegal transition, exiting");
        eprintln!("{}", illegal_marker(location));
        std::process::exit(self.code);
    }
}

/// Record the location and return, letting the kernel unwind.
///
/// Clones share the same log. Intended for tests that wrap the run in
/// [`std::panic::catch_unwind`].
#[derive(Debug, Clone, Default)]
pub struct RecordIllegal {
    locations: Rc<RefCell<Vec<String>>>,
}

impl RecordIllegal {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locations reported so far.
    #[must_use]
    pub fn locations(&self) -> Vec<String> {
        self.locations.borrow().clone()
    }

    /// Number of reported violations.
    #[must_use]
    pub fn count(&self) -> usize {
        self.locations.borrow().len()
    }
}

impl IllegalHandler for RecordIllegal {
    fn illegal(&self, location: &str) {
        tracing::warn!(location, "illegal transition recorded");
        self.locations.borrow_mut().push(location.to_string());
    }
}

/// Marker line emitted by [`ExitOnIllegal`].
#[must_use]
pub fn illegal_marker(location: &str) -> String {
    if location.is_empty() {
        "<illegal>".to_string()
    } else {
        format!("{location}:0: <illegal>")
    }
}
