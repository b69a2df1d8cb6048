//! Communication trace records and sinks.
//!
//! Four record shapes cover every observable interaction:
//!
//! | record     | line                                   |
//! |------------|----------------------------------------|
//! | `In`       | `<require>.<event> -> <provide>.<event>` |
//! | `Out`      | `<require>.<reply> <- <provide>.<reply>` |
//! | `QueueIn`  | `<requirer>.<q> <- <provide>.<event>`  |
//! | `QueueOut` | `<require>.<event> <- <requirer>.<q>`  |
//!
//! When the requirer is the external world a `QueueIn` prints in `Out` form
//! and `QueueOut` prints nothing.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Path prefix used for the external world.
pub const EXTERNAL: &str = "<external>";

/// Suffix naming a requirer's event queue.
pub const QUEUE: &str = "<q>";

/// Resolved endpoint paths of one port binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortLabels {
    /// `<requirer path>.<port name>`.
    pub require: String,
    /// `<requirer path>.<q>`.
    pub require_queue: String,
    /// `<provider path>.<port name>`.
    pub provide: String,
    /// Whether the requirer is the external world.
    pub external: bool,
}

/// One observable interaction across a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceRecord {
    /// In-event call entering the provider.
    In {
        /// Port endpoints.
        labels: PortLabels,
        /// Event name.
        event: String,
    },
    /// Reply of an in-event returning to the requirer.
    Out {
        /// Port endpoints.
        labels: PortLabels,
        /// Reply label.
        reply: String,
    },
    /// Out-event entering the requirer's queue.
    QueueIn {
        /// Port endpoints.
        labels: PortLabels,
        /// Event name.
        event: String,
    },
    /// Out-event leaving the requirer's queue for its handler.
    QueueOut {
        /// Port endpoints.
        labels: PortLabels,
        /// Event name.
        event: String,
    },
}

impl TraceRecord {
    /// Rendered line, or `None` when the record is invisible.
    #[must_use]
    pub fn line(&self) -> Option<String> {
        match self {
            Self::In { labels, event } => {
                Some(format!("{}.{event} -> {}.{event}", labels.require, labels.provide))
            }
            Self::Out { labels, reply } => {
                Some(format!("{}.{reply} <- {}.{reply}", labels.require, labels.provide))
            }
            Self::QueueIn { labels, event } if labels.external => {
                Some(format!("{}.{event} <- {}.{event}", labels.require, labels.provide))
            }
            Self::QueueIn { labels, event } => {
                Some(format!("{} <- {}.{event}", labels.require_queue, labels.provide))
            }
            Self::QueueOut { labels, .. } if labels.external => None,
            Self::QueueOut { labels, event } => {
                Some(format!("{}.{event} <- {}", labels.require, labels.require_queue))
            }
        }
    }
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line() {
            Some(line) => f.write_str(&line),
            None => Ok(()),
        }
    }
}

/// Destination for trace records.
pub trait TraceSink {
    /// Accept one record.
    fn record(&self, record: &TraceRecord);

    /// Whether records are consumed at all; callers may skip formatting.
    fn enabled(&self) -> bool {
        true
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn record(&self, _record: &TraceRecord) {}

    fn enabled(&self) -> bool {
        false
    }
}

/// Writes visible lines to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrSink;

impl TraceSink for StderrSink {
    fn record(&self, record: &TraceRecord) {
        if let Some(line) = record.line() {
            eprintln!("{line}");
        }
    }
}

/// Keeps visible lines in memory. Clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    lines: Rc<RefCell<Vec<String>>>,
}

impl CaptureSink {
    /// Create an empty capture buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines captured so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    /// Drain the buffer.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.borrow_mut())
    }
}

impl TraceSink for CaptureSink {
    fn record(&self, record: &TraceRecord) {
        if let Some(line) = record.line() {
            self.lines.borrow_mut().push(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn internal() -> PortLabels {
        PortLabels {
            require: "sut.ctrl.valve".into(),
            require_queue: "sut.ctrl.<q>".into(),
            provide: "sut.valve.api".into(),
            external: false,
        }
    }

    fn external() -> PortLabels {
        PortLabels {
            require: "<external>.api".into(),
            require_queue: "<external>.<q>".into(),
            provide: "sut.api".into(),
            external: true,
        }
    }

    #[test]
    fn test_in_and_out_lines() {
        let rec = TraceRecord::In { labels: internal(), event: "open".into() };
        assert_eq!(rec.to_string(), "sut.ctrl.valve.open -> sut.valve.api.open");
        let rec = TraceRecord::Out { labels: internal(), reply: "return".into() };
        assert_eq!(rec.to_string(), "sut.ctrl.valve.return <- sut.valve.api.return");
    }

    #[test]
    fn test_queue_lines_for_component_requirer() {
        let rec = TraceRecord::QueueIn { labels: internal(), event: "opened".into() };
        assert_eq!(rec.line().as_deref(), Some("sut.ctrl.<q> <- sut.valve.api.opened"));
        let rec = TraceRecord::QueueOut { labels: internal(), event: "opened".into() };
        assert_eq!(rec.line().as_deref(), Some("sut.ctrl.valve.opened <- sut.ctrl.<q>"));
    }

    #[test]
    fn test_queue_lines_for_external_requirer() {
        let rec = TraceRecord::QueueIn { labels: external(), event: "opened".into() };
        assert_eq!(rec.line().as_deref(), Some("<external>.api.opened <- sut.api.opened"));
        let rec = TraceRecord::QueueOut { labels: external(), event: "opened".into() };
        assert_eq!(rec.line(), None);
    }

    #[test]
    fn test_capture_sink_skips_invisible_records() {
        let sink = CaptureSink::new();
        sink.record(&TraceRecord::QueueOut { labels: external(), event: "x".into() });
        sink.record(&TraceRecord::In { labels: external(), event: "x".into() });
        assert_eq!(sink.take(), vec!["<external>.api.x -> sut.api.x".to_string()]);
        assert!(sink.lines().is_empty());
    }
}
