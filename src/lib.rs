//! Verified component runtime.
//!
//! Facade over the workspace crates:
//!
//! - [`runtime`]: locator, metadata tree, ports and events, dispatch
//!   kernel, pump and diagnostic trace
//! - [`container`]: scenario driver, trail, configuration and logging
//!
//! Most code only needs the [`prelude`].

pub use cfsm_container as container;
pub use cfsm_runtime as runtime;

/// Everything needed to write and drive a component system.
pub mod prelude {
    pub use cfsm_container::{
        Container, ContainerConfig, ContainerError, IllegalPolicy, Matcher, ScenarioError,
        TraceMode, Trail,
    };
    pub use cfsm_runtime::{
        BindingError, CaptureSink, ChainId, ComponentId, ComponentKind, InEvent, Locator,
        OutEvent, Peer, PortId, Protocol, Pump, PumpError, Reply, Runtime, Unchecked, FLUSH_LABEL,
        RETURN_LABEL,
    };
}
