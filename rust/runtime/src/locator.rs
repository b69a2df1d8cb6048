//! Service registry handed to every component at construction.
//!
//! A locator bundles the shared [`Runtime`], the optional [`Pump`], the
//! trace sink and the illegal-transition handler. Clones share the services
//! but not the slots: replacing a service on a clone leaves the original
//! untouched, which is how a sub-system gets its own sink or pump.

use std::fmt;
use std::future::Future;
use std::rc::Rc;

use crate::error::LocatorError;
use crate::identity::{ChainId, ComponentId};
use crate::illegal::{AbortOnIllegal, IllegalHandler};
use crate::pump::Pump;
use crate::runtime::Runtime;
use crate::trace::{NullSink, TraceSink};

/// Service registry.
#[derive(Clone)]
pub struct Locator {
    runtime: Rc<Runtime>,
    pump: Option<Rc<Pump>>,
    sink: Rc<dyn TraceSink>,
    illegal: Rc<dyn IllegalHandler>,
}

impl Locator {
    /// Fresh runtime, no pump, no tracing, abort on illegal transitions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            runtime: Rc::new(Runtime::new()),
            pump: None,
            sink: Rc::new(NullSink),
            illegal: Rc::new(AbortOnIllegal),
        }
    }

    /// Replace the runtime.
    #[must_use]
    pub fn set_runtime(mut self, runtime: Rc<Runtime>) -> Self {
        self.runtime = runtime;
        self
    }

    /// Install a pump.
    #[must_use]
    pub fn set_pump(mut self, pump: Rc<Pump>) -> Self {
        self.pump = Some(pump);
        self
    }

    /// Install a trace sink.
    #[must_use]
    pub fn set_sink(mut self, sink: Rc<dyn TraceSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Install an illegal-transition handler.
    #[must_use]
    pub fn set_illegal(mut self, handler: Rc<dyn IllegalHandler>) -> Self {
        self.illegal = handler;
        self
    }

    /// Shared dispatch state.
    #[must_use]
    pub fn runtime(&self) -> &Rc<Runtime> {
        &self.runtime
    }

    /// The pump.
    ///
    /// # Errors
    ///
    /// Returns [`LocatorError::Missing`] when none was installed.
    pub fn pump(&self) -> Result<&Rc<Pump>, LocatorError> {
        self.pump.as_ref().ok_or(LocatorError::Missing { service: "pump" })
    }

    /// The pump, if installed.
    #[must_use]
    pub fn try_pump(&self) -> Option<&Rc<Pump>> {
        self.pump.as_ref()
    }

    /// Trace sink.
    #[must_use]
    pub fn sink(&self) -> &Rc<dyn TraceSink> {
        &self.sink
    }

    /// Illegal-transition handler.
    #[must_use]
    pub fn illegal(&self) -> &Rc<dyn IllegalHandler> {
        &self.illegal
    }

    /// Call chain of the running code.
    #[must_use]
    pub fn chain(&self) -> ChainId {
        self.pump.as_ref().map_or(ChainId::ROOT, |pump| pump.current_chain())
    }

    /// Schedule `statement` on `component` once it is idle.
    ///
    /// The statement is dropped if `predicate` no longer holds by then.
    /// It runs with the component handling on its own chain, after which
    /// the component's queue is flushed.
    ///
    /// # Errors
    ///
    /// Returns [`LocatorError::Missing`] without a pump.
    pub fn defer<P, S, Fut>(
        &self,
        component: ComponentId,
        predicate: P,
        statement: S,
    ) -> Result<ChainId, LocatorError>
    where
        P: Fn() -> bool + 'static,
        S: FnOnce() -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let pump = self.pump()?;
        let locator = self.clone();
        Ok(pump.spawn(async move {
            let runtime = Rc::clone(locator.runtime());
            runtime.run_deferred(&locator, component, &predicate, statement).await;
        }))
    }
}

impl Default for Locator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locator")
            .field("pump", &self.pump)
            .field("tracing", &self.sink.enabled())
            .finish_non_exhaustive()
    }
}
