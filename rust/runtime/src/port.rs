//! Port bindings and their event declarations.
//!
//! A binding has one provider (the component whose in-events are called and
//! whose out-events are emitted) and one requirer. Either side may be the
//! external world.

use std::fmt;

use crate::identity::{EventId, Peer, PortId};
use crate::protocol::PortTracker;

/// One end of a binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Owning component, `None` for the external world.
    pub component: Peer,
    /// Port name on that component.
    pub port: String,
}

/// Event direction as seen from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Called by the requirer, answered by the provider.
    In,
    /// Emitted by the provider, queued at the requirer.
    Out,
}

/// Declared event of a port.
#[derive(Debug, Clone)]
pub struct EventRecord {
    /// Binding the event belongs to.
    pub port: PortId,
    /// Event name.
    pub name: String,
    /// Direction.
    pub direction: Direction,
    /// Whether a body or handler was installed.
    pub bound: bool,
}

/// Blocking state of a port whose in-event waits for a later reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Blocking {
    /// No in-event is parked on this port.
    #[default]
    Free,
    /// An in-event is parked; `released` flips once the reply was given.
    Blocked {
        /// Reply arrived.
        released: bool,
    },
}

/// A port binding.
pub struct PortRecord {
    /// Provider end.
    pub provide: Endpoint,
    /// Requirer end, once connected.
    pub require: Option<Endpoint>,
    /// Events declared on the binding.
    pub events: Vec<EventId>,
    /// Blocking state.
    pub blocking: Blocking,
    pub(crate) tracker: Box<dyn PortTracker>,
}

impl PortRecord {
    /// Whether an in-event is parked on the port.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self.blocking, Blocking::Blocked { .. })
    }

    /// Tracker state rendering.
    #[must_use]
    pub fn state_name(&self) -> String {
        self.tracker.state_name()
    }
}

impl fmt::Debug for PortRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortRecord")
            .field("provide", &self.provide)
            .field("require", &self.require)
            .field("events", &self.events)
            .field("blocking", &self.blocking)
            .field("state", &self.tracker.state_name())
            .finish()
    }
}

/// Arena of bindings and events.
#[derive(Debug, Default)]
pub struct PortTable {
    ports: Vec<PortRecord>,
    events: Vec<EventRecord>,
}

impl PortTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a binding with a known provider.
    pub fn declare(&mut self, provide: Endpoint, tracker: Box<dyn PortTracker>) -> PortId {
        let id = PortId(self.ports.len());
        self.ports.push(PortRecord {
            provide,
            require: None,
            events: Vec::new(),
            blocking: Blocking::Free,
            tracker,
        });
        id
    }

    /// Declare an event on `port`.
    pub fn add_event(&mut self, port: PortId, name: &str, direction: Direction) -> EventId {
        let id = EventId(self.events.len());
        self.events.push(EventRecord {
            port,
            name: name.to_string(),
            direction,
            bound: false,
        });
        if let Some(record) = self.ports.get_mut(port.0) {
            record.events.push(id);
        }
        id
    }

    /// Binding record.
    #[must_use]
    pub fn port(&self, id: PortId) -> Option<&PortRecord> {
        self.ports.get(id.0)
    }

    /// Mutable binding record.
    pub fn port_mut(&mut self, id: PortId) -> Option<&mut PortRecord> {
        self.ports.get_mut(id.0)
    }

    /// Event record.
    #[must_use]
    pub fn event(&self, id: EventId) -> Option<&EventRecord> {
        self.events.get(id.0)
    }

    /// Mark an event as having a body or handler.
    pub fn mark_bound(&mut self, id: EventId) {
        if let Some(event) = self.events.get_mut(id.0) {
            event.bound = true;
        }
    }

    /// Find the binding whose requirer end is `(component, name)`.
    #[must_use]
    pub fn find_required(&self, component: Peer, name: &str) -> Option<PortId> {
        self.ports
            .iter()
            .position(|record| {
                record
                    .require
                    .as_ref()
                    .is_some_and(|end| end.component == component && end.port == name)
            })
            .map(PortId)
    }

    /// All bindings in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (PortId, &PortRecord)> {
        self.ports.iter().enumerate().map(|(index, record)| (PortId(index), record))
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Whether the table has no bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}
