//! Cooperative single-threaded task scheduler.
//!
//! Each spawned future is a task and each task is one logical call chain.
//! Tasks run one at a time; a task gives up the thread only by awaiting one
//! of the pump's suspension futures, which park it in the blocked set with
//! a [`BlockReason`] until something releases it.
//!
//! The pump keeps a virtual clock. Timers never fire while other work is
//! ready: when the ready queue drains, the clock jumps to the earliest
//! deadline. Tasks parked with [`BlockReason::Idle`] run only once there is
//! neither ready work nor a pending timer.

use futures::future::{FutureExt, LocalBoxFuture};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use crate::error::PumpError;
use crate::identity::{ChainId, ComponentId, PortId, TimerId};

/// Why a task is parked.
pub enum BlockReason {
    /// Waiting for a busy native component to become idle.
    Collateral {
        /// Busy component.
        component: ComponentId,
    },
    /// Waiting for the reply to a blocked in-event.
    PortRelease {
        /// Blocked port.
        port: PortId,
    },
    /// Waiting for the virtual clock.
    Timer {
        /// Wake-up tick.
        deadline: u64,
    },
    /// Waiting for the pump to have nothing else to do.
    Idle,
    /// Waiting for a condition re-checked every scheduling round.
    Predicate(Box<dyn Fn() -> bool>),
}

impl fmt::Debug for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collateral { component } => {
                f.debug_struct("Collateral").field("component", component).finish()
            }
            Self::PortRelease { port } => f.debug_struct("PortRelease").field("port", port).finish(),
            Self::Timer { deadline } => f.debug_struct("Timer").field("deadline", deadline).finish(),
            Self::Idle => f.write_str("Idle"),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

type Task = LocalBoxFuture<'static, ()>;

/// The scheduler.
pub struct Pump {
    tasks: RefCell<BTreeMap<ChainId, Task>>,
    ready: RefCell<VecDeque<ChainId>>,
    blocked: RefCell<BTreeMap<ChainId, BlockReason>>,
    timers: RefCell<BTreeMap<TimerId, ChainId>>,
    cancelled: RefCell<BTreeSet<ChainId>>,
    current: Cell<Option<ChainId>>,
    next_chain: Cell<usize>,
    next_timer: Cell<usize>,
    clock: Cell<u64>,
    budget: Cell<Option<u64>>,
    stopped: Cell<bool>,
    polls: Cell<usize>,
    this: Weak<Pump>,
}

impl Pump {
    /// Create an empty pump.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            tasks: RefCell::new(BTreeMap::new()),
            ready: RefCell::new(VecDeque::new()),
            blocked: RefCell::new(BTreeMap::new()),
            timers: RefCell::new(BTreeMap::new()),
            cancelled: RefCell::new(BTreeSet::new()),
            current: Cell::new(None),
            next_chain: Cell::new(ChainId::ROOT.0 + 1),
            next_timer: Cell::new(0),
            clock: Cell::new(0),
            budget: Cell::new(None),
            stopped: Cell::new(false),
            polls: Cell::new(0),
            this: this.clone(),
        })
    }

    /// Refuse to advance the virtual clock past `max` ticks.
    pub fn set_tick_budget(&self, max: Option<u64>) {
        self.budget.set(max);
    }

    /// Queue a future as a new task. Tasks start in spawn order.
    pub fn spawn<F>(&self, future: F) -> ChainId
    where
        F: Future<Output = ()> + 'static,
    {
        let chain = ChainId(self.next_chain.get());
        self.next_chain.set(chain.0 + 1);
        self.tasks.borrow_mut().insert(chain, future.boxed_local());
        self.ready.borrow_mut().push_back(chain);
        tracing::trace!(%chain, "task spawned");
        chain
    }

    /// Queue a closure to run as a new task.
    pub fn post<F, Fut>(&self, work: F) -> ChainId
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.spawn(async move { work().await })
    }

    /// Queue work that starts only once the pump is otherwise idle.
    pub fn when_idle<F>(&self, future: F) -> ChainId
    where
        F: Future<Output = ()> + 'static,
    {
        let idle = self.suspend(BlockReason::Idle);
        self.spawn(async move {
            idle.await;
            future.await;
        })
    }

    /// Run `callback` after `delay` ticks of virtual time.
    pub fn handle<F, Fut>(&self, delay: u64, callback: F) -> TimerId
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let timer = TimerId(self.next_timer.get());
        self.next_timer.set(timer.0 + 1);
        let wait = self.sleep(delay);
        let pump = self.this.clone();
        let chain = self.spawn(async move {
            wait.await;
            if let Some(pump) = pump.upgrade() {
                pump.timers.borrow_mut().remove(&timer);
            }
            callback().await;
        });
        self.timers.borrow_mut().insert(timer, chain);
        tracing::debug!(?timer, delay, %chain, "timer armed");
        timer
    }

    /// Cancel a timer that has not fired yet. Returns whether one was pending.
    pub fn remove(&self, timer: TimerId) -> bool {
        let chain = self.timers.borrow_mut().remove(&timer);
        match chain {
            Some(chain) => {
                tracing::debug!(?timer, %chain, "timer cancelled");
                self.cancel(chain);
                true
            }
            None => false,
        }
    }

    /// Drop a task wherever it is queued.
    pub fn cancel(&self, chain: ChainId) {
        self.blocked.borrow_mut().remove(&chain);
        self.ready.borrow_mut().retain(|id| *id != chain);
        let task = self.tasks.borrow_mut().remove(&chain);
        match task {
            Some(task) => drop(task),
            None if self.current.get() == Some(chain) => {
                self.cancelled.borrow_mut().insert(chain);
            }
            None => {}
        }
    }

    /// Park the current task until released for `reason`.
    ///
    /// Outside a task the returned future completes immediately.
    #[must_use]
    pub fn suspend(&self, reason: BlockReason) -> Suspend {
        Suspend {
            pump: self.this.clone(),
            reason: Some(reason),
        }
    }

    /// Let every other ready task run once.
    #[must_use]
    pub fn yield_now(&self) -> YieldNow {
        YieldNow { yielded: false }
    }

    /// Park the current task for `ticks` of virtual time.
    #[must_use]
    pub fn sleep(&self, ticks: u64) -> Suspend {
        let deadline = self.clock.get().saturating_add(ticks);
        self.suspend(BlockReason::Timer { deadline })
    }

    /// Park the current task until `condition` holds.
    pub fn wait_until<F>(&self, condition: F) -> impl Future<Output = ()> + 'static
    where
        F: Fn() -> bool + 'static,
    {
        let pump = self.this.clone();
        let condition = Rc::new(condition);
        async move {
            while !condition() {
                let Some(pump) = pump.upgrade() else { return };
                if pump.current.get().is_none() {
                    return;
                }
                let check = Rc::clone(&condition);
                pump.suspend(BlockReason::Predicate(Box::new(move || check()))).await;
            }
        }
    }

    /// Move every parked task whose reason satisfies `matches` to the ready queue.
    pub fn release<F>(&self, matches: F) -> usize
    where
        F: Fn(&BlockReason) -> bool,
    {
        let woken: Vec<ChainId> = {
            let mut blocked = self.blocked.borrow_mut();
            let woken: Vec<ChainId> = blocked
                .iter()
                .filter(|(_, reason)| matches(reason))
                .map(|(chain, _)| *chain)
                .collect();
            for chain in &woken {
                blocked.remove(chain);
            }
            woken
        };
        if !woken.is_empty() {
            tracing::trace!(?woken, "tasks released");
        }
        self.ready.borrow_mut().extend(woken.iter().copied());
        woken.len()
    }

    /// Wake tasks waiting for `component` to become idle.
    pub fn release_component(&self, component: ComponentId) -> usize {
        self.release(|reason| {
            matches!(reason, BlockReason::Collateral { component: c } if *c == component)
        })
    }

    /// Wake the task waiting for the reply on `port`.
    pub fn release_port(&self, port: PortId) -> usize {
        self.release(|reason| matches!(reason, BlockReason::PortRelease { port: p } if *p == port))
    }

    /// Re-check timers and predicates against the current clock.
    pub fn prune(&self) {
        let now = self.clock.get();
        let mut parked = std::mem::take(&mut *self.blocked.borrow_mut());
        let mut due: Vec<(u64, ChainId)> = Vec::new();
        parked.retain(|chain, reason| {
            let wake = match reason {
                BlockReason::Timer { deadline } => (*deadline <= now).then_some(*deadline),
                BlockReason::Predicate(condition) => condition().then_some(0),
                _ => None,
            };
            if let Some(order) = wake {
                due.push((order, *chain));
            }
            wake.is_none()
        });
        {
            let mut blocked = self.blocked.borrow_mut();
            for (chain, reason) in parked {
                blocked.entry(chain).or_insert(reason);
            }
        }
        due.sort();
        self.ready.borrow_mut().extend(due.into_iter().map(|(_, chain)| chain));
    }

    /// Run until no task is ready, no timer is pending and nothing waits for idle.
    ///
    /// # Errors
    ///
    /// Returns [`PumpError::Stalled`] if tasks are still parked at that
    /// point, or [`PumpError::TickBudget`] if a timer lies past the budget.
    pub fn run(&self) -> Result<(), PumpError> {
        if let Some(chain) = self.current.get() {
            tracing::warn!(%chain, "nested pump run ignored");
            return Ok(());
        }
        self.stopped.set(false);
        loop {
            if self.stopped.get() {
                tracing::debug!("pump stopped");
                return Ok(());
            }
            self.prune();
            let next = self.ready.borrow_mut().pop_front();
            if let Some(chain) = next {
                self.poll_task(chain);
                continue;
            }
            if self.advance_clock()? || self.wake_idle() {
                continue;
            }
            let blocked = self.blocked.borrow().len();
            if blocked == 0 {
                return Ok(());
            }
            tracing::error!(blocked, parked = ?self.blocked.borrow().values().collect::<Vec<_>>(), "pump stalled");
            return Err(PumpError::Stalled { blocked });
        }
    }

    /// Spawn `future`, run the pump and hand back its output.
    ///
    /// # Errors
    ///
    /// Propagates [`Pump::run`] errors, or [`PumpError::Incomplete`] if the
    /// pump was stopped first.
    pub fn run_until<T, F>(&self, future: F) -> Result<T, PumpError>
    where
        T: 'static,
        F: Future<Output = T> + 'static,
    {
        let slot = Rc::new(RefCell::new(None));
        let out = Rc::clone(&slot);
        self.spawn(async move {
            let value = future.await;
            *out.borrow_mut() = Some(value);
        });
        self.run()?;
        let value = slot.borrow_mut().take();
        value.ok_or(PumpError::Incomplete)
    }

    /// Make [`Pump::run`] return after the current task yields.
    pub fn stop(&self) {
        self.stopped.set(true);
    }

    /// Chain of the task being polled, [`ChainId::ROOT`] outside the pump.
    #[must_use]
    pub fn current_chain(&self) -> ChainId {
        self.current.get().unwrap_or(ChainId::ROOT)
    }

    /// Whether the caller runs inside a pump task.
    #[must_use]
    pub fn in_task(&self) -> bool {
        self.current.get().is_some()
    }

    /// Virtual time.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.clock.get()
    }

    /// Tasks ready to run.
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.ready.borrow().len()
    }

    /// Tasks parked.
    #[must_use]
    pub fn blocked_count(&self) -> usize {
        self.blocked.borrow().len()
    }

    /// Timers armed but not yet fired.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Task polls performed so far.
    #[must_use]
    pub fn polls(&self) -> usize {
        self.polls.get()
    }

    fn park(&self, chain: ChainId, reason: BlockReason) {
        tracing::trace!(%chain, ?reason, "task parked");
        self.blocked.borrow_mut().insert(chain, reason);
    }

    fn poll_task(&self, chain: ChainId) {
        let Some(mut task) = self.tasks.borrow_mut().remove(&chain) else {
            return;
        };
        self.polls.set(self.polls.get() + 1);
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        self.current.set(Some(chain));
        let outcome = task.as_mut().poll(&mut cx);
        self.current.set(None);

        let cancelled = self.cancelled.borrow_mut().remove(&chain);
        match outcome {
            Poll::Ready(()) => {
                self.blocked.borrow_mut().remove(&chain);
                tracing::trace!(%chain, "task finished");
            }
            Poll::Pending if cancelled => {
                self.blocked.borrow_mut().remove(&chain);
            }
            Poll::Pending => {
                let parked = self.blocked.borrow().contains_key(&chain);
                self.tasks.borrow_mut().insert(chain, task);
                if !parked {
                    self.ready.borrow_mut().push_back(chain);
                }
            }
        }
    }

    fn advance_clock(&self) -> Result<bool, PumpError> {
        let next = self
            .blocked
            .borrow()
            .values()
            .filter_map(|reason| match reason {
                BlockReason::Timer { deadline } => Some(*deadline),
                _ => None,
            })
            .min();
        let Some(deadline) = next else {
            return Ok(false);
        };
        if let Some(max) = self.budget.get() {
            if deadline > max {
                return Err(PumpError::TickBudget { max });
            }
        }
        let now = deadline.max(self.clock.get());
        tracing::trace!(now, "clock advanced");
        self.clock.set(now);
        Ok(true)
    }

    fn wake_idle(&self) -> bool {
        let chain = {
            let mut blocked = self.blocked.borrow_mut();
            let chain = blocked
                .iter()
                .find(|(_, reason)| matches!(reason, BlockReason::Idle))
                .map(|(chain, _)| *chain);
            if let Some(chain) = chain {
                blocked.remove(&chain);
            }
            chain
        };
        match chain {
            Some(chain) => {
                self.ready.borrow_mut().push_back(chain);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Pump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pump")
            .field("now", &self.clock.get())
            .field("ready", &self.ready.borrow().len())
            .field("blocked", &self.blocked.borrow().len())
            .field("timers", &self.timers.borrow().len())
            .finish()
    }
}

/// Future returned by [`Pump::suspend`] and [`Pump::sleep`].
///
/// Completes on the first poll after the task was released.
#[must_use = "futures do nothing unless awaited"]
pub struct Suspend {
    pump: Weak<Pump>,
    reason: Option<BlockReason>,
}

impl Future for Suspend {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let Some(reason) = this.reason.take() else {
            return Poll::Ready(());
        };
        let Some(pump) = this.pump.upgrade() else {
            return Poll::Ready(());
        };
        match pump.current.get() {
            Some(chain) => {
                pump.park(chain, reason);
                Poll::Pending
            }
            None => {
                tracing::warn!(?reason, "suspend outside a pump task");
                Poll::Ready(())
            }
        }
    }
}

/// Future returned by [`Pump::yield_now`].
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.yielded {
            Poll::Ready(())
        } else {
            this.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
