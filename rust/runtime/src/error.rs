//! Error types surfaced by the runtime.

/// A required service is missing from a [`Locator`](crate::Locator).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocatorError {
    /// No service of the requested kind was registered.
    #[error("service `{service}` is not registered with this locator")]
    Missing {
        /// Service name.
        service: &'static str,
    },
}

/// Assembly produced a system with dangling ports or events.
///
/// Component and port fields carry dotted instance paths so the message
/// points straight at the offending declaration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    /// A provided or required port has no peer.
    #[error("{component}.{port}: port not connected")]
    UnboundPort {
        /// Owning component path.
        component: String,
        /// Port name.
        port: String,
    },
    /// An in-event was declared but no body was bound.
    #[error("{component}.{port}.{event}: in-event has no body")]
    UnboundInEvent {
        /// Providing component path.
        component: String,
        /// Port name.
        port: String,
        /// Event name.
        event: String,
    },
    /// An out-event was declared but nobody handles it.
    #[error("{component}.{port}.{event}: out-event has no handler")]
    UnboundOutEvent {
        /// Providing component path.
        component: String,
        /// Port name.
        port: String,
        /// Event name.
        event: String,
    },
    /// A port was connected twice.
    #[error("{component}.{port}: already connected to {peer}")]
    AlreadyConnected {
        /// Providing component path.
        component: String,
        /// Port name.
        port: String,
        /// Path of the existing requirer.
        peer: String,
    },
}

/// A port tracker rejected a label.
///
/// Raised once and routed through the installed
/// [`IllegalHandler`](crate::IllegalHandler); the kernel never resumes
/// after one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{location}: illegal `{label}` in state {state}")]
pub struct IllegalTransition {
    /// Port path where the violation happened.
    pub location: String,
    /// Tracker state before the rejected label.
    pub state: String,
    /// Rejected label.
    pub label: String,
}

/// The pump could not run to completion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PumpError {
    /// Tasks remain blocked but nothing can wake them.
    #[error("pump stalled with {blocked} blocked task(s)")]
    Stalled {
        /// Number of parked tasks.
        blocked: usize,
    },
    /// The virtual clock passed the configured budget.
    #[error("virtual clock exceeded budget of {max} ticks")]
    TickBudget {
        /// Configured budget.
        max: u64,
    },
    /// [`Pump::run_until`](crate::Pump::run_until) returned before its future resolved.
    #[error("pump stopped before the awaited task completed")]
    Incomplete,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_error_names_the_path() {
        let err = BindingError::UnboundPort {
            component: "sut.controller".into(),
            port: "motor".into(),
        };
        assert_eq!(err.to_string(), "sut.controller.motor: port not connected");
    }

    #[test]
    fn test_illegal_transition_display() {
        let err = IllegalTransition {
            location: "sut.valve.api".into(),
            state: "Closed".into(),
            label: "close".into(),
        };
        assert_eq!(err.to_string(), "sut.valve.api: illegal `close` in state Closed");
    }
}
