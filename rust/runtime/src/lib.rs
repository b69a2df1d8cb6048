//! Dispatch runtime for verified communicating state-machine components.
//!
//! Components talk only through ports. Every port is guarded by a tracker
//! of its verified interface protocol, and every crossing of a port is
//! routed through one kernel that enforces the execution model the
//! verification assumed:
//!
//! - at most one chain of control runs inside a component at any time;
//! - out-events reach their requirer in emission order;
//! - an out-event aimed at a component that is busy waits until the busy
//!   activity has fully completed;
//! - any protocol violation is fatal.
//!
//! # Architecture
//!
//! - **Locator** ([`Locator`]): services handed to components at construction
//! - **Metadata** ([`meta::MetaTree`]): instance tree, paths and binding obligations
//! - **Protocols** ([`protocol::Protocol`]): interface state machines and their trackers
//! - **Events** ([`InEvent`], [`OutEvent`]): typed endpoints bound by provider and requirer
//! - **Kernel** ([`Runtime`]): execution records, flush, collateral blocking, deferral
//! - **Pump** ([`Pump`]): cooperative scheduler with a virtual clock
//! - **Trace** ([`trace`]): communication trace records and sinks
//!
//! Everything is single-threaded. Event bodies are futures; a chain gives
//! up the thread only when it has to wait, which is what lets a second
//! chain arrive at a busy component and be parked there.
//!
//! # Usage
//!
//! ```ignore
//! use cfsm_runtime::{ComponentKind, InEvent, Locator, Pump, Unchecked};
//!
//! let pump = Pump::new();
//! let locator = Locator::new().set_pump(pump.clone());
//! let runtime = locator.runtime();
//! let root = runtime.add_component("sut", "Lamp", None, ComponentKind::Native);
//! let port = runtime.provide_port::<Unchecked>(Some(root), "api");
//! runtime.connect(port, None, "api")?;
//! let on: InEvent<()> = InEvent::new(&locator, port, "on");
//! on.bind(|()| async {});
//! runtime.check_bindings(root)?;
//! pump.run_until(async move { on.call(()).await })?;
//! ```

pub mod error;
pub mod event;
pub mod identity;
pub mod illegal;
pub mod locator;
pub mod meta;
pub mod port;
pub mod protocol;
pub mod pump;
pub mod runtime;
pub mod trace;

pub use error::{BindingError, IllegalTransition, LocatorError, PumpError};
pub use event::{InEvent, OutEvent};
pub use identity::{ChainId, ComponentId, EventId, Peer, PortId, TimerId};
pub use illegal::{AbortOnIllegal, ExitOnIllegal, IllegalHandler, RecordIllegal};
pub use locator::Locator;
pub use meta::{BindingCheck, ComponentKind, MetaNode, MetaTree};
pub use port::Direction;
pub use protocol::{
    to_bool, to_int, to_void, PortTracker, Protocol, Reply, Tracker, Unchecked, FLUSH_LABEL,
    RETURN_LABEL,
};
pub use pump::{BlockReason, Pump};
pub use runtime::{Activity, ExecState, HandlingObserver, Runtime};
pub use trace::{CaptureSink, NullSink, StderrSink, TraceRecord, TraceSink};
