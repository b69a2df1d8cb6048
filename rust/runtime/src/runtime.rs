//! Dispatch kernel.
//!
//! The runtime owns the component tree, the port table and one execution
//! record per component (plus one for the external world). It implements
//! the three dispatch paths:
//!
//! - in-event calls: collateral blocking, tracing, tracker updates and the
//!   synchronous flush of the provider before the reply;
//! - out-event emission: queueing at the requirer and deciding whether to
//!   flush now, defer the flush to the emitter's end of activity, or leave
//!   the queue to the activity already running on the requirer;
//! - deferred statements scheduled through [`Locator::defer`].
//!
//! A component's queue is only drained by the chain that holds its
//! handling flag, and every path that clears the flag has drained the
//! queue first.

use futures::future::LocalBoxFuture;
use std::cell::{Cell, Ref, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use crate::error::{BindingError, IllegalTransition};
use crate::identity::{ChainId, ComponentId, EventId, Peer, PortId};
use crate::locator::Locator;
use crate::meta::{BindingCheck, ComponentKind, MetaTree};
use crate::port::{Blocking, Direction, Endpoint, PortTable};
use crate::protocol::{Protocol, Tracker, FLUSH_LABEL};
use crate::pump::BlockReason;
use crate::trace::{PortLabels, TraceRecord, QUEUE};

/// Queued delivery of one out-event to its handler.
pub type Deliver = Box<dyn FnOnce() -> LocalBoxFuture<'static, ()>>;

/// What a component is doing right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Activity {
    /// Nothing.
    #[default]
    Idle,
    /// Running an in-event on behalf of a caller.
    Synchronous,
    /// Running a deferred statement.
    Deferred,
}

impl Activity {
    /// Signed encoding: `0`, `+1`, `-1`.
    #[must_use]
    pub fn value(self) -> i8 {
        match self {
            Self::Idle => 0,
            Self::Synchronous => 1,
            Self::Deferred => -1,
        }
    }
}

struct Queued {
    event: String,
    deliver: Deliver,
}

/// Per-component execution record.
pub struct ExecState {
    /// Current activity.
    pub activity: Activity,
    /// Chain currently running inside the component.
    pub handling: Option<ChainId>,
    /// Chains parked on this component.
    pub blocked: usize,
    /// Component whose flush waits for this one to finish.
    pub deferred: Option<ComponentId>,
    /// Port to notify with [`FLUSH_LABEL`] when the queue is next drained.
    pub flush_notice: Option<PortId>,
    /// Port whose reply arrived before its in-event blocked.
    pub skip: Option<PortId>,
    /// Subject to collateral blocking.
    pub native: bool,
    /// Queue is drained by an outside driver, never implicitly.
    pub performs_flush: bool,
    queue: VecDeque<Queued>,
}

impl ExecState {
    fn new(native: bool) -> Self {
        Self {
            activity: Activity::Idle,
            handling: None,
            blocked: 0,
            deferred: None,
            flush_notice: None,
            skip: None,
            native,
            performs_flush: false,
            queue: VecDeque::new(),
        }
    }

    /// Queued out-events.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

impl fmt::Debug for ExecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecState")
            .field("activity", &self.activity)
            .field("handling", &self.handling)
            .field("blocked", &self.blocked)
            .field("queue", &self.queue.iter().map(|q| q.event.as_str()).collect::<Vec<_>>())
            .field("deferred", &self.deferred)
            .field("native", &self.native)
            .finish_non_exhaustive()
    }
}

/// Notified whenever a handling flag changes.
pub trait HandlingObserver {
    /// `peer` went from `previous` to `next`.
    fn handling_changed(&self, peer: Peer, previous: Option<ChainId>, next: Option<ChainId>);
}

/// Bookkeeping carried from the start of an in-event to its reply.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Entry {
    port: PortId,
    provide: Peer,
    chain: ChainId,
    outer_activity: Activity,
    outer_handling: Option<ChainId>,
}

/// Shared dispatch state.
pub struct Runtime {
    tree: RefCell<MetaTree>,
    ports: RefCell<PortTable>,
    states: RefCell<BTreeMap<Peer, ExecState>>,
    external_checks: RefCell<Vec<BindingCheck>>,
    defer: Cell<bool>,
    observer: RefCell<Option<Rc<dyn HandlingObserver>>>,
}

impl Runtime {
    /// Empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: RefCell::new(MetaTree::new()),
            ports: RefCell::new(PortTable::new()),
            states: RefCell::new(BTreeMap::new()),
            external_checks: RefCell::new(Vec::new()),
            defer: Cell::new(false),
            observer: RefCell::new(None),
        }
    }

    // ---- assembly ----

    /// Add a component instance.
    pub fn add_component(
        &self,
        name: &str,
        type_name: &str,
        parent: Option<ComponentId>,
        kind: ComponentKind,
    ) -> ComponentId {
        let id = self.tree.borrow_mut().add(name, type_name, parent, kind);
        tracing::debug!(component = %self.path(Some(id)), type_name, ?kind, "component added");
        id
    }

    /// Rename an instance.
    pub fn rename(&self, id: ComponentId, name: &str) {
        self.tree.borrow_mut().rename(id, name);
    }

    /// Borrow the component tree.
    #[must_use]
    pub fn tree(&self) -> Ref<'_, MetaTree> {
        self.tree.borrow()
    }

    /// Dotted path of `peer`.
    #[must_use]
    pub fn path(&self, peer: Peer) -> String {
        self.tree.borrow().path(peer)
    }

    /// `path: type` lines below `root`.
    #[must_use]
    pub fn dump_tree(&self, root: ComponentId) -> Vec<String> {
        self.tree.borrow().dump_tree(root)
    }

    /// Declare a port provided by `provider` and tracked with protocol `P`.
    pub fn provide_port<P: Protocol>(&self, provider: Peer, name: &str) -> PortId {
        let port = self.ports.borrow_mut().declare(
            Endpoint {
                component: provider,
                port: name.to_string(),
            },
            Box::new(Tracker::<P>::new()),
        );
        self.add_check(provider, BindingCheck::Provided(port));
        port
    }

    /// Declare that `requirer` needs a port called `name` connected.
    pub fn require_port(&self, requirer: ComponentId, name: &str) {
        self.tree.borrow_mut().require(
            requirer,
            BindingCheck::Required {
                port: name.to_string(),
            },
        );
    }

    /// Connect the requirer end of `port`.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::AlreadyConnected`] if the port has a requirer.
    pub fn connect(&self, port: PortId, requirer: Peer, name: &str) -> Result<(), BindingError> {
        let existing = self
            .ports
            .borrow()
            .port(port)
            .and_then(|record| record.require.clone().map(|end| (record.provide.clone(), end)));
        if let Some((provide, end)) = existing {
            let tree = self.tree.borrow();
            return Err(BindingError::AlreadyConnected {
                component: tree.path(provide.component),
                port: provide.port,
                peer: tree.port_path(end.component, &end.port),
            });
        }
        if let Some(record) = self.ports.borrow_mut().port_mut(port) {
            record.require = Some(Endpoint {
                component: requirer,
                port: name.to_string(),
            });
        }
        tracing::debug!(labels = ?self.labels(port), "port connected");
        Ok(())
    }

    /// Declare an event on `port`; the port's provider must bind it.
    pub fn declare_event(&self, port: PortId, name: &str, direction: Direction) -> EventId {
        let event = self.ports.borrow_mut().add_event(port, name, direction);
        let check = match direction {
            Direction::In => BindingCheck::InEvent(event),
            Direction::Out => BindingCheck::OutEvent(event),
        };
        self.add_check(self.provider_of(port), check);
        event
    }

    /// Record that `event` has a body or handler.
    pub fn mark_bound(&self, event: EventId) {
        self.ports.borrow_mut().mark_bound(event);
    }

    /// Verify every port and event under `root` (and every port the
    /// external world provides) is bound.
    ///
    /// # Errors
    ///
    /// Returns the first [`BindingError`] found, in tree pre-order.
    pub fn check_bindings(&self, root: ComponentId) -> Result<(), BindingError> {
        let mut pending: Vec<(Peer, BindingCheck)> = Vec::new();
        self.tree.borrow().apply(root, |id, node| {
            pending.extend(node.checks.iter().cloned().map(|check| (Some(id), check)));
        });
        pending.extend(self.external_checks.borrow().iter().cloned().map(|check| (None, check)));
        for (owner, check) in &pending {
            self.evaluate(*owner, check)?;
        }
        tracing::debug!(root = %self.path(Some(root)), checks = pending.len(), "bindings complete");
        Ok(())
    }

    fn add_check(&self, owner: Peer, check: BindingCheck) {
        match owner {
            Some(component) => self.tree.borrow_mut().require(component, check),
            None => self.external_checks.borrow_mut().push(check),
        }
    }

    fn evaluate(&self, owner: Peer, check: &BindingCheck) -> Result<(), BindingError> {
        let tree = self.tree.borrow();
        let ports = self.ports.borrow();
        match check {
            BindingCheck::Provided(port) => match ports.port(*port) {
                Some(record) if record.require.is_none() => Err(BindingError::UnboundPort {
                    component: tree.path(owner),
                    port: record.provide.port.clone(),
                }),
                _ => Ok(()),
            },
            BindingCheck::Required { port } => match ports.find_required(owner, port) {
                Some(_) => Ok(()),
                None => Err(BindingError::UnboundPort {
                    component: tree.path(owner),
                    port: port.clone(),
                }),
            },
            BindingCheck::InEvent(event) | BindingCheck::OutEvent(event) => {
                let Some(record) = ports.event(*event) else {
                    return Ok(());
                };
                if record.bound {
                    return Ok(());
                }
                let component = tree.path(owner);
                let port = ports
                    .port(record.port)
                    .map(|p| p.provide.port.clone())
                    .unwrap_or_default();
                let event = record.name.clone();
                Err(match record.direction {
                    Direction::In => BindingError::UnboundInEvent { component, port, event },
                    Direction::Out => BindingError::UnboundOutEvent { component, port, event },
                })
            }
        }
    }

    // ---- inspection ----

    /// Install a hook observing every handling-flag change.
    pub fn observe_handling(&self, observer: Rc<dyn HandlingObserver>) {
        *self.observer.borrow_mut() = Some(observer);
    }

    /// Chain handling `peer`, if any.
    #[must_use]
    pub fn handling(&self, peer: Peer) -> Option<ChainId> {
        self.with_state(peer, |state| state.handling)
    }

    /// Activity of `peer`.
    #[must_use]
    pub fn activity(&self, peer: Peer) -> Activity {
        self.with_state(peer, |state| state.activity)
    }

    /// Out-events waiting in `peer`'s queue.
    #[must_use]
    pub fn queue_len(&self, peer: Peer) -> usize {
        self.with_state(peer, |state| state.queue.len())
    }

    /// Chains parked on `peer`.
    #[must_use]
    pub fn blocked_count(&self, peer: Peer) -> usize {
        self.with_state(peer, |state| state.blocked)
    }

    /// No chain inside `peer` and nothing queued.
    #[must_use]
    pub fn is_idle(&self, peer: Peer) -> bool {
        self.with_state(peer, |state| state.handling.is_none() && state.queue.is_empty())
    }

    /// Whether `peer` is subject to collateral blocking.
    #[must_use]
    pub fn native(&self, peer: Peer) -> bool {
        self.with_state(peer, |state| state.native)
    }

    /// Hand `peer`'s queue to an outside driver that calls [`Runtime::flush`] itself.
    pub fn set_performs_flush(&self, peer: Peer, performs: bool) {
        self.with_state(peer, |state| state.performs_flush = performs);
    }

    /// Whether an outside driver drains `peer`.
    #[must_use]
    pub fn performs_flush(&self, peer: Peer) -> bool {
        self.with_state(peer, |state| state.performs_flush)
    }

    /// Whether a deferred statement is running.
    #[must_use]
    pub fn in_deferred(&self) -> bool {
        self.defer.get()
    }

    /// Provider of `port`.
    #[must_use]
    pub fn provider_of(&self, port: PortId) -> Peer {
        self.ports.borrow().port(port).and_then(|record| record.provide.component)
    }

    /// Requirer of `port`; `None` until connected, `Some(None)` for the external world.
    #[must_use]
    pub fn requirer_of(&self, port: PortId) -> Option<Peer> {
        self.ports
            .borrow()
            .port(port)
            .and_then(|record| record.require.as_ref().map(|end| end.component))
    }

    /// Tracker state of `port`.
    #[must_use]
    pub fn port_state(&self, port: PortId) -> Option<String> {
        self.ports.borrow().port(port).map(|record| record.state_name())
    }

    /// Labels accepted by `port`'s tracker.
    #[must_use]
    pub fn port_steps(&self, port: PortId) -> usize {
        self.ports.borrow().port(port).map_or(0, |record| record.tracker.steps())
    }

    /// Whether an in-event is parked on `port`.
    #[must_use]
    pub fn port_blocked(&self, port: PortId) -> bool {
        self.ports.borrow().port(port).is_some_and(|record| record.is_blocked())
    }

    /// Resolved endpoint paths of `port`.
    #[must_use]
    pub fn labels(&self, port: PortId) -> PortLabels {
        let tree = self.tree.borrow();
        let ports = self.ports.borrow();
        let Some(record) = ports.port(port) else {
            return PortLabels {
                require: format!("<{port}>"),
                require_queue: QUEUE.to_string(),
                provide: format!("<{port}>"),
                external: false,
            };
        };
        let (requirer, name) = record
            .require
            .as_ref()
            .map_or((None, "<unbound>"), |end| (end.component, end.port.as_str()));
        PortLabels {
            require: tree.port_path(requirer, name),
            require_queue: tree.port_path(requirer, QUEUE),
            provide: tree.port_path(record.provide.component, &record.provide.port),
            external: requirer.is_none(),
        }
    }

    // ---- kernel ----

    /// Drain `peer`'s queue on `chain`.
    ///
    /// Events run in arrival order, including events that arrive while the
    /// drain is in progress. A non-synchronous flush notifies the first
    /// drained event's port with [`FLUSH_LABEL`] and then follows the
    /// deferred target of each drained component while that target is idle.
    pub async fn flush(&self, locator: &Locator, peer: Peer, chain: ChainId, sync: bool) {
        let mut target = peer;
        loop {
            self.drain(locator, target, chain, sync).await;
            if sync {
                break;
            }
            let next = self.with_state(target, |state| state.deferred.take());
            match next {
                Some(next) if self.handling(Some(next)).is_none() && self.queue_len(Some(next)) > 0 => {
                    tracing::debug!(
                        from = %self.path(target),
                        to = %self.path(Some(next)),
                        %chain,
                        "following deferred flush"
                    );
                    target = Some(next);
                }
                _ => break,
            }
        }
    }

    async fn drain(&self, locator: &Locator, target: Peer, chain: ChainId, sync: bool) {
        let outer = self.handling(target);
        self.set_handling(target, Some(chain));
        let mut notified = false;
        loop {
            let (queued, notice) = self.with_state(target, |state| {
                let queued = state.queue.pop_front();
                let notice = if queued.is_some() { state.flush_notice.take() } else { None };
                (queued, notice)
            });
            let Some(queued) = queued else { break };
            if let Some(port) = notice {
                if !sync && !notified {
                    notified = true;
                    self.flush_notice(locator, port);
                }
            }
            tracing::trace!(component = %self.path(target), event = %queued.event, %chain, "dispatching queued event");
            (queued.deliver)().await;
        }
        self.set_handling(target, outer);
        if outer.is_none() {
            self.release_waiters(locator, target);
        }
    }

    fn flush_notice(&self, locator: &Locator, port: PortId) {
        let provider = self.provider_of(port);
        if !self.port_blocked(port) && (!self.defer.get() || self.native(provider)) {
            self.update_port(locator, port, FLUSH_LABEL);
        }
    }

    /// Emit an out-event on `port`.
    ///
    /// Emitting on a port without a requirer is fatal.
    pub async fn fire_out(&self, locator: &Locator, port: PortId, event: &str, deliver: Deliver) {
        let chain = locator.chain();
        let provide = self.provider_of(port);
        let Some(require) = self.requirer_of(port) else {
            self.fatal(
                locator,
                IllegalTransition {
                    location: self.labels(port).provide,
                    state: "unconnected".to_string(),
                    label: event.to_string(),
                },
            )
        };
        self.trace(locator, port, |labels| TraceRecord::QueueIn {
            labels,
            event: event.to_string(),
        });
        self.update_port(locator, port, event);

        let deliver = self.with_queue_out(locator, port, event, deliver);
        self.with_state(require, |state| {
            state.flush_notice = Some(port);
            state.queue.push_back(Queued {
                event: event.to_string(),
                deliver,
            });
        });

        let sync = self.activity(provide) == Activity::Synchronous;
        match require {
            None => {
                let owner = self.handling(None);
                if !self.performs_flush(None) && owner.map_or(true, |owner| owner == chain) {
                    self.flush(locator, None, chain, sync).await;
                }
            }
            Some(target) => {
                if self.handling(require).is_some() || self.performs_flush(require) {
                    tracing::trace!(to = %self.path(require), event, "queued behind running activity");
                } else if let Some(emitter) = provide.filter(|_| self.handling(provide).is_some()) {
                    self.defer_flush(locator, emitter, target).await;
                } else {
                    self.flush(locator, require, chain, sync).await;
                    if sync {
                        self.prune_deferred(locator, require).await;
                    }
                }
            }
        }
    }

    fn with_queue_out(&self, locator: &Locator, port: PortId, event: &str, deliver: Deliver) -> Deliver {
        if !locator.sink().enabled() {
            return deliver;
        }
        let record = TraceRecord::QueueOut {
            labels: self.labels(port),
            event: event.to_string(),
        };
        let sink = Rc::clone(locator.sink());
        Box::new(move || {
            sink.record(&record);
            deliver()
        })
    }

    async fn defer_flush(&self, locator: &Locator, emitter: ComponentId, target: ComponentId) {
        let previous = self.with_state(Some(emitter), |state| state.deferred.replace(target));
        tracing::trace!(emitter = %self.path(Some(emitter)), target = %self.path(Some(target)), "flush deferred");
        if let Some(previous) = previous.filter(|previous| *previous != target) {
            self.schedule_flush(locator, previous).await;
        }
    }

    async fn schedule_flush(&self, locator: &Locator, target: ComponentId) {
        let peer = Some(target);
        if self.handling(peer).is_some() || self.queue_len(peer) == 0 {
            return;
        }
        match locator.try_pump() {
            Some(pump) => {
                let locator = locator.clone();
                pump.spawn(async move {
                    let runtime = Rc::clone(locator.runtime());
                    if runtime.handling(peer).is_none() && runtime.queue_len(peer) > 0 {
                        runtime.flush(&locator, peer, locator.chain(), false).await;
                    }
                });
            }
            None => self.flush(locator, peer, locator.chain(), false).await,
        }
    }

    /// Wake chains parked on `peer` and hand on its deferred flush.
    pub async fn prune_deferred(&self, locator: &Locator, peer: Peer) {
        self.release_waiters(locator, peer);
        let next = self.with_state(peer, |state| state.deferred.take());
        if let Some(target) = next {
            self.schedule_flush(locator, target).await;
        }
    }

    fn release_waiters(&self, locator: &Locator, peer: Peer) {
        if let (Some(component), Some(pump)) = (peer, locator.try_pump()) {
            pump.release_component(component);
        }
    }

    pub(crate) async fn enter_in(&self, locator: &Locator, port: PortId, event: &str) -> Entry {
        let chain = locator.chain();
        let provide = self.provider_of(port);
        self.collateral_block(locator, provide, port, chain).await;
        self.with_state(provide, |state| state.skip = None);
        self.trace(locator, port, |labels| TraceRecord::In {
            labels,
            event: event.to_string(),
        });
        self.update_port(locator, port, event);
        let (outer_activity, outer_handling) = self.with_state(provide, |state| {
            let outer = (state.activity, state.handling);
            if state.activity == Activity::Idle {
                state.activity = Activity::Synchronous;
            }
            outer
        });
        self.set_handling(provide, Some(chain));
        Entry {
            port,
            provide,
            chain,
            outer_activity,
            outer_handling,
        }
    }

    pub(crate) async fn leave_in(&self, locator: &Locator, entry: Entry, reply: &str) {
        let Entry {
            port,
            provide,
            chain,
            outer_activity,
            outer_handling,
        } = entry;
        self.flush(locator, provide, chain, true).await;
        self.trace(locator, port, |labels| TraceRecord::Out {
            labels,
            reply: reply.to_string(),
        });
        self.update_port(locator, port, reply);
        self.with_state(provide, |state| state.activity = outer_activity);
        self.set_blocking(port, Blocking::Free);
        self.set_handling(provide, outer_handling);
        if outer_handling.is_none() {
            self.prune_deferred(locator, provide).await;
        }
    }

    async fn collateral_block(&self, locator: &Locator, provide: Peer, port: PortId, chain: ChainId) {
        let Some(component) = provide else { return };
        let Some(pump) = locator.try_pump().filter(|pump| pump.in_task()) else {
            return;
        };
        let busy = || {
            self.native(provide)
                && (self.port_blocked(port) || self.handling(provide).is_some_and(|owner| owner != chain))
        };
        if !busy() {
            return;
        }
        self.with_state(provide, |state| state.blocked += 1);
        tracing::debug!(component = %self.path(provide), %chain, "collateral block");
        while busy() {
            pump.suspend(BlockReason::Collateral { component }).await;
        }
        self.with_state(provide, |state| state.blocked -= 1);
        tracing::debug!(component = %self.path(provide), %chain, "collateral resume");
    }

    /// Park the running in-event of `port` until [`Runtime::release_port`].
    ///
    /// While parked, the provider is released so the events that produce
    /// the reply can run; its queue is drained first on this chain. Returns
    /// immediately if the reply was already given. Blocking outside a pump
    /// task is fatal.
    pub async fn block_reply(&self, locator: &Locator, port: PortId) {
        let provide = self.provider_of(port);
        let chain = locator.chain();
        let skipped = self.with_state(provide, |state| {
            let skipped = state.skip == Some(port);
            if skipped {
                state.skip = None;
            }
            skipped
        });
        if skipped {
            tracing::debug!(port = %self.labels(port).provide, "reply already given");
            return;
        }
        let Some(pump) = locator.try_pump().filter(|pump| pump.in_task()).cloned() else {
            self.fatal(
                locator,
                IllegalTransition {
                    location: self.labels(port).provide,
                    state: "outside a pump task".to_string(),
                    label: "block".to_string(),
                },
            )
        };

        self.set_blocking(port, Blocking::Blocked { released: false });
        tracing::debug!(port = %self.labels(port).provide, %chain, "in-event blocked");
        self.set_handling(provide, None);
        if self.queue_len(provide) > 0 {
            self.flush(locator, provide, chain, false).await;
        } else {
            self.release_waiters(locator, provide);
        }

        while self.blocking(port) == (Blocking::Blocked { released: false }) {
            pump.suspend(BlockReason::PortRelease { port }).await;
        }

        if let Some(component) = provide {
            while self.native(provide) && self.handling(provide).is_some_and(|owner| owner != chain) {
                pump.suspend(BlockReason::Collateral { component }).await;
            }
        }
        self.set_handling(provide, Some(chain));
        tracing::debug!(port = %self.labels(port).provide, %chain, "in-event unblocked");
    }

    /// Give the reply for `port`, waking its parked in-event.
    ///
    /// If the in-event has not blocked yet, its later
    /// [`Runtime::block_reply`] returns at once.
    pub fn release_port(&self, locator: &Locator, port: PortId) {
        match self.blocking(port) {
            Blocking::Blocked { released: false } => {
                self.set_blocking(port, Blocking::Blocked { released: true });
                if let Some(pump) = locator.try_pump() {
                    pump.release_port(port);
                }
                tracing::debug!(port = %self.labels(port).provide, "blocked in-event released");
            }
            Blocking::Blocked { released: true } => {}
            Blocking::Free => {
                let provide = self.provider_of(port);
                self.with_state(provide, |state| state.skip = Some(port));
                tracing::debug!(port = %self.labels(port).provide, "reply before block");
            }
        }
    }

    pub(crate) async fn run_deferred<S, Fut>(
        &self,
        locator: &Locator,
        component: ComponentId,
        predicate: &dyn Fn() -> bool,
        statement: S,
    ) where
        S: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let peer = Some(component);
        let chain = locator.chain();
        if let Some(pump) = locator.try_pump() {
            while self.handling(peer).is_some_and(|owner| owner != chain) {
                pump.suspend(BlockReason::Collateral { component }).await;
            }
        }
        if !predicate() {
            tracing::debug!(component = %self.path(peer), "deferred statement pruned");
            return;
        }
        let outer = self.with_state(peer, |state| {
            let outer = state.activity;
            if outer == Activity::Idle {
                state.activity = Activity::Deferred;
            }
            outer
        });
        let was_deferred = self.defer.replace(true);
        self.set_handling(peer, Some(chain));
        statement().await;
        self.flush(locator, peer, chain, false).await;
        self.set_handling(peer, None);
        self.defer.set(was_deferred);
        self.with_state(peer, |state| state.activity = outer);
        self.prune_deferred(locator, peer).await;
    }

    /// Report `violation` and stop.
    ///
    /// # Panics
    ///
    /// Always; the installed handler normally ends the process first.
    pub fn fatal(&self, locator: &Locator, violation: IllegalTransition) -> ! {
        tracing::error!(
            location = %violation.location,
            state = %violation.state,
            label = %violation.label,
            "illegal transition"
        );
        locator.illegal().illegal(&violation.location);
        panic!("{violation}");
    }

    fn update_port(&self, locator: &Locator, port: PortId, label: &str) {
        let outcome = match self.ports.borrow_mut().port_mut(port) {
            Some(record) => record.tracker.update(label),
            None => Ok(()),
        };
        if let Err(rejected) = outcome {
            let location = self.labels(port).provide;
            self.fatal(
                locator,
                IllegalTransition {
                    location,
                    state: rejected.state,
                    label: rejected.label,
                },
            );
        }
    }

    fn trace<F>(&self, locator: &Locator, port: PortId, record: F)
    where
        F: FnOnce(PortLabels) -> TraceRecord,
    {
        let sink = locator.sink();
        if sink.enabled() {
            sink.record(&record(self.labels(port)));
        }
    }

    fn blocking(&self, port: PortId) -> Blocking {
        self.ports.borrow().port(port).map_or(Blocking::Free, |record| record.blocking)
    }

    fn set_blocking(&self, port: PortId, blocking: Blocking) {
        if let Some(record) = self.ports.borrow_mut().port_mut(port) {
            record.blocking = blocking;
        }
    }

    fn set_handling(&self, peer: Peer, next: Option<ChainId>) {
        let previous = self.with_state(peer, |state| std::mem::replace(&mut state.handling, next));
        if previous == next {
            return;
        }
        tracing::trace!(component = %self.path(peer), ?previous, ?next, "handling changed");
        let observer = self.observer.borrow().clone();
        if let Some(observer) = observer {
            observer.handling_changed(peer, previous, next);
        }
    }

    fn with_state<T>(&self, peer: Peer, f: impl FnOnce(&mut ExecState) -> T) -> T {
        let mut states = self.states.borrow_mut();
        let state = states.entry(peer).or_insert_with(|| {
            ExecState::new(self.tree.borrow().kind(peer) == ComponentKind::Native)
        });
        f(state)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("components", &self.tree.borrow().len())
            .field("ports", &self.ports.borrow().len())
            .field("states", &self.states.borrow())
            .finish_non_exhaustive()
    }
}
