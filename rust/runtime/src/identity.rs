//! Stable handles for entities owned by a [`Runtime`](crate::Runtime).
//!
//! Components, ports and events live in arenas; everything else refers to
//! them through these copyable indices so no back-pointers are needed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a component node in the metadata tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId(pub usize);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component#{}", self.0)
    }
}

/// One side of a port binding: a component, or `None` for the external world.
pub type Peer = Option<ComponentId>;

/// Index of a port binding in the port table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortId(pub usize);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

/// Index of an event record in the port table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub usize);

/// A logical call chain.
///
/// Every task on the [`Pump`](crate::Pump) is its own chain; work performed
/// outside the pump runs on [`ChainId::ROOT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChainId(pub usize);

impl ChainId {
    /// Chain used for calls made outside any pump task.
    pub const ROOT: Self = Self(0);
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain#{}", self.0)
    }
}

/// Handle for a pending timer registered with [`Pump::handle`](crate::Pump::handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerId(pub usize);
