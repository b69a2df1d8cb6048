//! Scenario driver around an assembled system.
//!
//! The container owns the locator, the pump and the system. It reads one
//! stimulus line at a time, fires the trigger registered under that name
//! and checks everything the system performs against the trail. A line
//! that names no trigger is only queued as an expectation and ends the
//! current read; the [`DEFER`] token resumes reading once the pump has
//! nothing else to do.
//!
//! [`Container::run`] reads and fires from pump tasks.
//! [`Container::run_sync`] calls triggers inline on the caller until the
//! first line that is not a trigger, then hands over to the pump.

use futures::executor::block_on;
use futures::future::{FutureExt, LocalBoxFuture};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::io::BufRead;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use cfsm_runtime::{
    AbortOnIllegal, BindingError, CaptureSink, ComponentId, ExitOnIllegal, IllegalHandler, Locator,
    NullSink, Pump, PumpError, RecordIllegal, Reply, StderrSink, TraceSink,
};

use crate::config::{ConfigError, ContainerConfig, IllegalPolicy, TraceMode};
use crate::logging;
use crate::trail::{is_compound, ScenarioError, Trail, DEFER};

/// Anything that can stop a container run.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Assembly left a port or event unbound.
    #[error(transparent)]
    Binding(#[from] BindingError),
    /// The run diverged from the trail.
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    /// The pump stalled or ran out of ticks.
    #[error(transparent)]
    Pump(#[from] PumpError),
    /// The configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// An illegal transition unwound the run.
    #[error("illegal transition at {location}")]
    Illegal {
        /// Port path of the violation.
        location: String,
    },
}

/// Stimulus registered under a trail name.
pub type Trigger<S> = Rc<dyn Fn(Rc<S>, Matcher) -> LocalBoxFuture<'static, Result<(), ScenarioError>>>;

/// Handle through which the system reports what it performs.
///
/// Triggers use [`Matcher::expect`] and propagate the error. Out-event
/// handlers cannot return one, so they use [`Matcher::observe`], which
/// records the first failure and stops the pump.
#[derive(Clone)]
pub struct Matcher {
    trail: Rc<RefCell<Trail>>,
    failure: Rc<RefCell<Option<ScenarioError>>>,
    pump: Rc<Pump>,
}

impl Matcher {
    fn new(pump: Rc<Pump>) -> Self {
        Self {
            trail: Rc::new(RefCell::new(Trail::new())),
            failure: Rc::new(RefCell::new(None)),
            pump,
        }
    }

    /// Match `performed` against the next expectation.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::Mismatch`] or [`ScenarioError::Exhausted`].
    pub fn expect(&self, performed: &str) -> Result<(), ScenarioError> {
        self.trail.borrow_mut().matches(performed)
    }

    /// Match the reply `port.<label>` of an in-event.
    ///
    /// # Errors
    ///
    /// As [`Matcher::expect`].
    pub fn reply<R: Reply>(&self, port: &str, reply: &R) -> Result<(), ScenarioError> {
        self.expect(&format!("{port}.{}", reply.label()))
    }

    /// Match `performed`, failing the scenario on a mismatch.
    pub fn observe(&self, performed: &str) {
        if let Err(err) = self.expect(performed) {
            self.fail(err);
        }
    }

    /// Fail the scenario. Only the first failure is kept.
    pub fn fail(&self, err: ScenarioError) {
        tracing::error!(%err, "scenario failed");
        let mut slot = self.failure.borrow_mut();
        if slot.is_none() {
            *slot = Some(err);
        }
        self.pump.stop();
    }

    /// Whether the scenario has failed.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.failure.borrow().is_some()
    }

    fn take_failure(&self) -> Option<ScenarioError> {
        self.failure.borrow_mut().take()
    }

    fn read_line(&self) -> Result<Option<String>, ScenarioError> {
        self.trail.borrow_mut().read_line()
    }

    fn push(&self, line: &str) {
        self.trail.borrow_mut().push(line);
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matcher")
            .field("trail", &self.trail.borrow())
            .field("failed", &self.failed())
            .finish()
    }
}

/// An assembled system plus the services and triggers that drive it.
pub struct Container<S> {
    config: ContainerConfig,
    locator: Locator,
    pump: Rc<Pump>,
    capture: Option<CaptureSink>,
    recorder: Option<RecordIllegal>,
    root: ComponentId,
    system: Rc<S>,
    matcher: Matcher,
    lookup: BTreeMap<String, Trigger<S>>,
}

impl<S: 'static> Container<S> {
    /// Build the services from `config`, assemble the system and check
    /// that it is completely bound.
    ///
    /// `assemble` returns the system's root component, which the container
    /// renames to `config.name`.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Binding`] if assembly fails or leaves
    /// anything unbound.
    pub fn new<A>(config: ContainerConfig, assemble: A) -> Result<Self, ContainerError>
    where
        A: FnOnce(&Locator, &Matcher) -> Result<(ComponentId, S), BindingError>,
    {
        if !logging::init(&config.log_filter) {
            tracing::trace!("tracing subscriber already installed");
        }
        let pump = Pump::new();
        pump.set_tick_budget(config.max_ticks);

        let (sink, capture): (Rc<dyn TraceSink>, Option<CaptureSink>) = match config.trace {
            TraceMode::Off => (Rc::new(NullSink), None),
            TraceMode::Stderr => (Rc::new(StderrSink), None),
            TraceMode::Capture => {
                let capture = CaptureSink::new();
                (Rc::new(capture.clone()), Some(capture))
            }
        };
        let (illegal, recorder): (Rc<dyn IllegalHandler>, Option<RecordIllegal>) = match config.illegal {
            IllegalPolicy::Exit => (Rc::new(ExitOnIllegal { code: 0 }), None),
            IllegalPolicy::Abort => (Rc::new(AbortOnIllegal), None),
            IllegalPolicy::Unwind => {
                let recorder = RecordIllegal::new();
                (Rc::new(recorder.clone()), Some(recorder))
            }
        };

        let locator = Locator::new()
            .set_pump(Rc::clone(&pump))
            .set_sink(sink)
            .set_illegal(illegal);
        let matcher = Matcher::new(Rc::clone(&pump));
        let (root, system) = assemble(&locator, &matcher)?;
        let runtime = locator.runtime();
        runtime.rename(root, &config.name);
        runtime.check_bindings(root)?;
        tracing::info!(system = %config.name, components = runtime.tree().len(), "container assembled");

        Ok(Self {
            config,
            locator,
            pump,
            capture,
            recorder,
            root,
            system: Rc::new(system),
            matcher,
            lookup: BTreeMap::new(),
        })
    }

    /// Register the stimulus fired by input line `name`.
    ///
    /// The driver matches `name` itself before calling the trigger; the
    /// trigger matches the reply.
    pub fn register<F, Fut>(&mut self, name: &str, trigger: F) -> &mut Self
    where
        F: Fn(Rc<S>, Matcher) -> Fut + 'static,
        Fut: Future<Output = Result<(), ScenarioError>> + 'static,
    {
        self.lookup.insert(
            name.to_string(),
            Rc::new(move |system, matcher| trigger(system, matcher).boxed_local()),
        );
        self
    }

    /// Replay `input` against the system.
    ///
    /// # Errors
    ///
    /// Returns the first scenario failure, a pump failure, an unwound
    /// illegal transition, or [`ScenarioError::Incomplete`] if expectations
    /// are left over.
    pub fn run<R: BufRead + 'static>(&self, input: R) -> Result<(), ContainerError> {
        self.matcher.trail.borrow_mut().attach(input);
        self.pump.spawn(perform(self.driver()));
        self.drive()?;
        self.matcher.trail.borrow_mut().finish()?;
        Ok(())
    }

    /// Replay `input`, calling triggers inline until the first line that
    /// is not one.
    ///
    /// Triggers run on the caller outside any pump task. A [`DEFER`] line
    /// hands the rest of the input to the pump, as [`Container::run`]
    /// would read it; any other non-trigger line ends the inline reads.
    /// The pump then runs until it settles.
    ///
    /// # Errors
    ///
    /// As [`Container::run`].
    pub fn run_sync<R: BufRead + 'static>(&self, input: R) -> Result<(), ContainerError> {
        self.matcher.trail.borrow_mut().attach(input);
        let driver = self.driver();
        while self.sync_trigger(&driver)? {}
        self.drive()?;
        self.matcher.trail.borrow_mut().finish()?;
        Ok(())
    }

    /// Read one line and fire it inline. Returns whether to keep reading.
    fn sync_trigger(&self, driver: &Rc<Driver<S>>) -> Result<bool, ContainerError> {
        let Some(line) = next_line(&driver.matcher)? else {
            return Ok(false);
        };
        if line == DEFER {
            tracing::debug!("inline input deferred to the pump");
            driver.pump.when_idle(perform(Rc::clone(driver)));
            return Ok(false);
        }
        driver.matcher.push(&line);
        let Some(trigger) = driver.lookup.get(&line).cloned() else {
            tracing::debug!(%line, "expectation queued");
            return Ok(false);
        };
        tracing::debug!(trigger = %line, "firing inline");
        driver.matcher.expect(&line)?;
        let future = trigger(Rc::clone(&driver.system), driver.matcher.clone());
        self.guarded(|| block_on(future))??;
        if let Some(failure) = self.matcher.take_failure() {
            return Err(failure.into());
        }
        Ok(true)
    }

    /// Replay standard input.
    ///
    /// # Errors
    ///
    /// As [`Container::run`].
    pub fn run_stdin(&self) -> Result<(), ContainerError> {
        self.run(std::io::stdin().lock())
    }

    /// Fire one registered trigger and run the pump until it settles.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::UnknownTrigger`] for an unregistered name,
    /// otherwise as [`Container::run`] minus the leftover check.
    pub fn fire(&self, name: &str) -> Result<(), ContainerError> {
        let trigger = self
            .lookup
            .get(name)
            .cloned()
            .ok_or_else(|| ScenarioError::UnknownTrigger { name: name.to_string() })?;
        self.matcher.push(name);
        let system = Rc::clone(&self.system);
        let matcher = self.matcher.clone();
        let name = name.to_string();
        self.pump.spawn(async move {
            let outcome = match matcher.expect(&name) {
                Ok(()) => trigger(system, matcher.clone()).await,
                Err(err) => Err(err),
            };
            if let Err(err) = outcome {
                matcher.fail(err);
            }
        });
        self.drive()
    }

    fn driver(&self) -> Rc<Driver<S>> {
        Rc::new(Driver {
            pump: Rc::clone(&self.pump),
            system: Rc::clone(&self.system),
            matcher: self.matcher.clone(),
            lookup: Rc::new(self.lookup.clone()),
        })
    }

    fn drive(&self) -> Result<(), ContainerError> {
        let outcome = self.guarded(|| self.pump.run())?;
        if let Some(failure) = self.matcher.take_failure() {
            return Err(failure.into());
        }
        outcome?;
        Ok(())
    }

    /// Run `f`, turning an illegal transition unwound under
    /// [`IllegalPolicy::Unwind`] into [`ContainerError::Illegal`].
    fn guarded<T>(&self, f: impl FnOnce() -> T) -> Result<T, ContainerError> {
        let Some(recorder) = &self.recorder else {
            return Ok(f());
        };
        catch_unwind(AssertUnwindSafe(f)).map_err(|_| ContainerError::Illegal {
            location: recorder.locations().into_iter().next().unwrap_or_default(),
        })
    }

    /// The assembled system.
    #[must_use]
    pub fn system(&self) -> &Rc<S> {
        &self.system
    }

    /// Services shared with the system.
    #[must_use]
    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// The container's pump.
    #[must_use]
    pub fn pump(&self) -> &Rc<Pump> {
        &self.pump
    }

    /// Matching handle, as given to the assembler.
    #[must_use]
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Root component of the system.
    #[must_use]
    pub fn root(&self) -> ComponentId {
        self.root
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Registered trigger names in order.
    #[must_use]
    pub fn triggers(&self) -> Vec<&str> {
        self.lookup.keys().map(String::as_str).collect()
    }

    /// Captured diagnostic trace; empty unless tracing to [`TraceMode::Capture`].
    #[must_use]
    pub fn trace(&self) -> Vec<String> {
        self.capture.as_ref().map(CaptureSink::lines).unwrap_or_default()
    }

    /// `path: type` lines of the system.
    #[must_use]
    pub fn dump_tree(&self) -> Vec<String> {
        self.locator.runtime().dump_tree(self.root)
    }
}

impl<S> fmt::Debug for Container<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("config", &self.config)
            .field("pump", &self.pump)
            .field("triggers", &self.lookup.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

struct Driver<S> {
    pump: Rc<Pump>,
    system: Rc<S>,
    matcher: Matcher,
    lookup: Rc<BTreeMap<String, Trigger<S>>>,
}

/// Read and act on the next meaningful input line.
///
/// A recognised trigger posts the next read before it runs, so a trigger
/// that suspends does not hold up the input.
fn perform<S: 'static>(driver: Rc<Driver<S>>) -> LocalBoxFuture<'static, ()> {
    async move {
        let line = match next_line(&driver.matcher) {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(err) => {
                driver.matcher.fail(err);
                return;
            }
        };

        if line == DEFER {
            tracing::debug!("input deferred until the pump is idle");
            driver.pump.when_idle(perform(Rc::clone(&driver)));
            return;
        }

        driver.matcher.push(&line);
        let Some(trigger) = driver.lookup.get(&line).cloned() else {
            tracing::debug!(%line, "expectation queued");
            return;
        };
        driver.pump.spawn(perform(Rc::clone(&driver)));
        tracing::debug!(trigger = %line, "firing");
        let outcome = match driver.matcher.expect(&line) {
            Ok(()) => trigger(Rc::clone(&driver.system), driver.matcher.clone()).await,
            Err(err) => Err(err),
        };
        if let Err(err) = outcome {
            driver.matcher.fail(err);
        }
    }
    .boxed_local()
}

/// Next input line that is not a compound reply.
fn next_line(matcher: &Matcher) -> Result<Option<String>, ScenarioError> {
    while let Some(line) = matcher.read_line()? {
        if !is_compound(&line) {
            return Ok(Some(line));
        }
        tracing::trace!(%line, "compound reply skipped");
    }
    Ok(None)
}
