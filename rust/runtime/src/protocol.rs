//! Port protocols and the trackers that enforce them.
//!
//! A [`Protocol`] is the verified interface state machine of one port. The
//! runtime owns one [`Tracker`] per port binding and feeds it every label
//! that crosses the port: in-event names, reply labels, out-event names and
//! the [`FLUSH_LABEL`] notice. A rejected label is fatal.

use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::num::ParseIntError;

/// Reply label of an in-event returning no value.
pub const RETURN_LABEL: &str = "return";

/// Label fed to a port when its requirer starts draining queued out-events.
pub const FLUSH_LABEL: &str = "<flush>";

/// Interface state machine of a port.
pub trait Protocol: 'static {
    /// Tracker state.
    type State: Copy + Eq + Debug;
    /// Parsed transition label.
    type Label: Copy + Debug;

    /// State of a freshly bound port.
    fn initial() -> Self::State;

    /// Parse a label as it appears on the wire; `None` for unknown labels.
    fn label(text: &str) -> Option<Self::Label>;

    /// Successor state, or `None` if `label` is illegal in `state`.
    fn step(state: Self::State, label: Self::Label) -> Option<Self::State>;
}

/// A label a tracker refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    /// State at the time of the violation.
    pub state: String,
    /// Offending label.
    pub label: String,
}

/// Object-safe view of a [`Tracker`] stored in the port table.
pub trait PortTracker {
    /// Advance on `label`. The state is unchanged when the label is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`Rejected`] if the protocol does not allow `label` here.
    fn update(&mut self, label: &str) -> Result<(), Rejected>;

    /// Debug rendering of the current state.
    fn state_name(&self) -> String;

    /// Labels accepted so far.
    fn steps(&self) -> usize;
}

/// Runtime tracker of protocol `P`.
pub struct Tracker<P: Protocol> {
    state: P::State,
    steps: usize,
    _protocol: PhantomData<P>,
}

impl<P: Protocol> Tracker<P> {
    /// Tracker in [`Protocol::initial`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: P::initial(),
            steps: 0,
            _protocol: PhantomData,
        }
    }

    /// Current typed state.
    #[must_use]
    pub fn state(&self) -> P::State {
        self.state
    }
}

impl<P: Protocol> Default for Tracker<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Protocol> Debug for Tracker<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("state", &self.state)
            .field("steps", &self.steps)
            .finish()
    }
}

impl<P: Protocol> PortTracker for Tracker<P> {
    fn update(&mut self, label: &str) -> Result<(), Rejected> {
        let next = P::label(label).and_then(|parsed| P::step(self.state, parsed));
        match next {
            Some(state) => {
                tracing::trace!(from = ?self.state, to = ?state, label, "port transition");
                self.state = state;
                self.steps += 1;
                Ok(())
            }
            None => Err(Rejected {
                state: format!("{:?}", self.state),
                label: label.to_string(),
            }),
        }
    }

    fn state_name(&self) -> String {
        format!("{:?}", self.state)
    }

    fn steps(&self) -> usize {
        self.steps
    }
}

/// Protocol accepting every label.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unchecked;

impl Protocol for Unchecked {
    type State = ();
    type Label = ();

    fn initial() {}

    fn label(_text: &str) -> Option<()> {
        Some(())
    }

    fn step(_state: (), _label: ()) -> Option<()> {
        Some(())
    }
}

/// Values an in-event may return; the label is what the tracker and trace see.
pub trait Reply {
    /// Wire label of this reply.
    fn label(&self) -> String;
}

impl Reply for () {
    fn label(&self) -> String {
        RETURN_LABEL.to_string()
    }
}

impl Reply for bool {
    fn label(&self) -> String {
        self.to_string()
    }
}

impl Reply for String {
    fn label(&self) -> String {
        self.clone()
    }
}

macro_rules! int_reply {
    ($($ty:ty),*) => {
        $(impl Reply for $ty {
            fn label(&self) -> String {
                self.to_string()
            }
        })*
    };
}

int_reply!(i32, i64, u32, u64, usize);

/// Decode a boolean reply label.
#[must_use]
pub fn to_bool(label: &str) -> bool {
    label == "true"
}

/// Decode an integer reply label.
///
/// # Errors
///
/// Returns the parse error for non-numeric labels.
pub fn to_int(label: &str) -> Result<i64, ParseIntError> {
    label.parse()
}

/// Whether `label` is the reply of a void in-event.
#[must_use]
pub fn to_void(label: &str) -> bool {
    label == RETURN_LABEL
}
