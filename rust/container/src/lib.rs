//! Scenario container for `cfsm-runtime` systems.
//!
//! Wraps an assembled system in the services it needs, replays a
//! line-oriented event trail against it and reports the first divergence.
//!
//! # Scenario input
//!
//! - `port.event`: fire the trigger registered under that name, or queue
//!   the line as an expected firing
//! - a line with more than one `.` is a compound reply and is skipped
//! - `<defer>`: continue reading once the pump is idle
//! - a blank line or end of input stops reading
//!
//! # Usage
//!
//! ```ignore
//! use cfsm_container::{Container, ContainerConfig};
//!
//! let mut container = Container::new(ContainerConfig::default(), |locator, matcher| {
//!     assemble_valve(locator, matcher)
//! })?;
//! container.register("api.open", |system, matcher| async move {
//!     system.api.open.call(()).await;
//!     matcher.expect("api.return")
//! });
//! container.run_stdin()?;
//! ```

pub mod config;
pub mod container;
pub mod logging;
pub mod trail;

pub use config::{ConfigError, ContainerConfig, IllegalPolicy, TraceMode};
pub use container::{Container, ContainerError, Matcher, Trigger};
pub use trail::{is_compound, ScenarioError, Trail, DEFER};
