//! Shared test infrastructure: sample protocols, components and systems.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use cfsm_runtime::{
    BindingError, CaptureSink, ChainId, ComponentId, ComponentKind, HandlingObserver, InEvent,
    Locator, OutEvent, Peer, PortId, Protocol, Pump, FLUSH_LABEL, RETURN_LABEL,
};

/// Deterministic seed for reproducibility.
pub const SEED: [u8; 32] = [
    0x43, 0x46, 0x53, 0x4D, 0x52, 0x75, 0x6E, 0x74, // "CFSMRunt"
    0x69, 0x6D, 0x65, 0x44, 0x69, 0x73, 0x70, 0x61, // "imeDispa"
    0x74, 0x63, 0x68, 0x4B, 0x65, 0x72, 0x6E, 0x65, // "tchKerne"
    0x6C, 0x54, 0x65, 0x73, 0x74, 0x73, 0x30, 0x31, // "lTests01"
];

/// Ticks the motor needs to open or close the valve.
pub const TRAVEL_TICKS: u64 = 3;

// ============================================================================
// Journal
// ============================================================================

/// Ordered log shared between components and the test body.
#[derive(Debug, Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0.borrow().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

/// Pump, locator and trace capture wired together.
pub fn harness() -> (Rc<Pump>, Locator, CaptureSink) {
    let pump = Pump::new();
    let sink = CaptureSink::new();
    let locator = Locator::new().set_pump(Rc::clone(&pump)).set_sink(Rc::new(sink.clone()));
    (pump, locator, sink)
}

// ============================================================================
// Protocols
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Valve {
    Closed,
    OpenCalled,
    Moving,
    Open,
    CloseCalled,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveLabel {
    Open,
    Close,
    Return,
    Opened,
    Closed,
    Flush,
}

/// Interface of a valve: `open`/`close` return at once, the result follows
/// as `opened`/`closed`.
pub struct ValveProtocol;

impl Protocol for ValveProtocol {
    type State = Valve;
    type Label = ValveLabel;

    fn initial() -> Valve {
        Valve::Closed
    }

    fn label(text: &str) -> Option<ValveLabel> {
        match text {
            "open" => Some(ValveLabel::Open),
            "close" => Some(ValveLabel::Close),
            RETURN_LABEL => Some(ValveLabel::Return),
            "opened" => Some(ValveLabel::Opened),
            "closed" => Some(ValveLabel::Closed),
            FLUSH_LABEL => Some(ValveLabel::Flush),
            _ => None,
        }
    }

    fn step(state: Valve, label: ValveLabel) -> Option<Valve> {
        match (state, label) {
            (s, ValveLabel::Flush) => Some(s),
            (Valve::Closed, ValveLabel::Open) => Some(Valve::OpenCalled),
            (Valve::OpenCalled, ValveLabel::Return) => Some(Valve::Moving),
            (Valve::Moving, ValveLabel::Opened) => Some(Valve::Open),
            (Valve::Open, ValveLabel::Close) => Some(Valve::CloseCalled),
            (Valve::CloseCalled, ValveLabel::Return) => Some(Valve::Stopping),
            (Valve::Stopping, ValveLabel::Closed) => Some(Valve::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drive {
    Idle,
    Starting,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveLabel {
    Start,
    Return,
    Done,
    Flush,
}

/// Interface of a motor drive: `start` returns at once, `done` follows.
pub struct DriveProtocol;

impl Protocol for DriveProtocol {
    type State = Drive;
    type Label = DriveLabel;

    fn initial() -> Drive {
        Drive::Idle
    }

    fn label(text: &str) -> Option<DriveLabel> {
        match text {
            "start" => Some(DriveLabel::Start),
            RETURN_LABEL => Some(DriveLabel::Return),
            "done" => Some(DriveLabel::Done),
            FLUSH_LABEL => Some(DriveLabel::Flush),
            _ => None,
        }
    }

    fn step(state: Drive, label: DriveLabel) -> Option<Drive> {
        match (state, label) {
            (s, DriveLabel::Flush) => Some(s),
            (Drive::Idle, DriveLabel::Start) => Some(Drive::Starting),
            (Drive::Starting, DriveLabel::Return) => Some(Drive::Running),
            (Drive::Running, DriveLabel::Done) => Some(Drive::Idle),
            _ => None,
        }
    }
}

/// Accepts every label and counts flush notices.
pub struct FlushCounter;

impl Protocol for FlushCounter {
    type State = u32;
    type Label = bool;

    fn initial() -> u32 {
        0
    }

    fn label(text: &str) -> Option<bool> {
        Some(text == FLUSH_LABEL)
    }

    fn step(state: u32, is_flush: bool) -> Option<u32> {
        Some(if is_flush { state + 1 } else { state })
    }
}

// ============================================================================
// Ports
// ============================================================================

pub struct ValvePort {
    pub port: PortId,
    pub open: InEvent<()>,
    pub close: InEvent<()>,
    pub opened: OutEvent<()>,
    pub closed: OutEvent<()>,
}

impl ValvePort {
    pub fn provide(locator: &Locator, provider: Peer, name: &str) -> Rc<Self> {
        let port = locator.runtime().provide_port::<ValveProtocol>(provider, name);
        Rc::new(Self {
            port,
            open: InEvent::new(locator, port, "open"),
            close: InEvent::new(locator, port, "close"),
            opened: OutEvent::new(locator, port, "opened"),
            closed: OutEvent::new(locator, port, "closed"),
        })
    }
}

pub struct DrivePort {
    pub port: PortId,
    pub start: InEvent<u64>,
    pub done: OutEvent<()>,
}

impl DrivePort {
    pub fn provide(locator: &Locator, provider: Peer, name: &str) -> Rc<Self> {
        let port = locator.runtime().provide_port::<DriveProtocol>(provider, name);
        Rc::new(Self {
            port,
            start: InEvent::new(locator, port, "start"),
            done: OutEvent::new(locator, port, "done"),
        })
    }
}

// ============================================================================
// Valve system: controller + motor
// ============================================================================

/// Hand-written leaf: completes each start after a number of ticks.
pub struct Motor {
    pub id: ComponentId,
    pub drive: Rc<DrivePort>,
    locator: Locator,
}

impl Motor {
    pub fn new(locator: &Locator, parent: ComponentId) -> Rc<Self> {
        let id = locator.runtime().add_component("motor", "Motor", Some(parent), ComponentKind::Native);
        let drive = DrivePort::provide(locator, Some(id), "drive");
        let motor = Rc::new(Self {
            id,
            drive,
            locator: locator.clone(),
        });
        let weak = Rc::downgrade(&motor);
        motor.drive.start.bind(move |ticks| {
            let motor = weak.upgrade();
            async move {
                if let Some(motor) = motor {
                    motor.arm(ticks);
                }
            }
        });
        motor
    }

    fn arm(&self, ticks: u64) {
        let Ok(pump) = self.locator.pump() else { return };
        let drive = Rc::clone(&self.drive);
        pump.handle(ticks, move || async move { drive.done.fire(()).await });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Closed,
    Opening,
    Open,
    Closing,
}

pub struct Controller {
    pub id: ComponentId,
    pub api: Rc<ValvePort>,
    pub phase: Cell<Phase>,
    drive: Rc<DrivePort>,
}

impl Controller {
    pub fn new(
        locator: &Locator,
        parent: ComponentId,
        drive: Rc<DrivePort>,
    ) -> Result<Rc<Self>, BindingError> {
        let runtime = locator.runtime();
        let id = runtime.add_component("controller", "Controller", Some(parent), ComponentKind::Native);
        runtime.require_port(id, "motor");
        runtime.connect(drive.port, Some(id), "motor")?;
        let api = ValvePort::provide(locator, Some(id), "api");
        let controller = Rc::new(Self {
            id,
            api,
            phase: Cell::new(Phase::Closed),
            drive,
        });

        let weak = Rc::downgrade(&controller);
        controller.api.open.bind(move |()| {
            let this = weak.upgrade();
            async move {
                if let Some(this) = this {
                    this.phase.set(Phase::Opening);
                    this.drive.start.call(TRAVEL_TICKS).await;
                }
            }
        });
        let weak = Rc::downgrade(&controller);
        controller.api.close.bind(move |()| {
            let this = weak.upgrade();
            async move {
                if let Some(this) = this {
                    this.phase.set(Phase::Closing);
                    this.drive.start.call(TRAVEL_TICKS).await;
                }
            }
        });
        let weak = Rc::downgrade(&controller);
        controller.drive.done.bind(move |()| {
            let this = weak.upgrade();
            async move {
                let Some(this) = this else { return };
                match this.phase.get() {
                    Phase::Opening => {
                        this.phase.set(Phase::Open);
                        this.api.opened.fire(()).await;
                    }
                    Phase::Closing => {
                        this.phase.set(Phase::Closed);
                        this.api.closed.fire(()).await;
                    }
                    Phase::Open | Phase::Closed => {}
                }
            }
        });
        Ok(controller)
    }
}

pub struct ValveSystem {
    pub root: ComponentId,
    pub api: Rc<ValvePort>,
    pub controller: Rc<Controller>,
    pub motor: Rc<Motor>,
}

/// Assemble the valve system; the caller still binds `api.opened`/`api.closed`.
pub fn valve_system(locator: &Locator, name: &str) -> Result<ValveSystem, BindingError> {
    let runtime = locator.runtime();
    let root = runtime.add_component(name, "ValveSystem", None, ComponentKind::Native);
    let motor = Motor::new(locator, root);
    let controller = Controller::new(locator, root, Rc::clone(&motor.drive))?;
    runtime.connect(controller.api.port, None, "api")?;
    Ok(ValveSystem {
        root,
        api: Rc::clone(&controller.api),
        controller,
        motor,
    })
}

/// Record external out-events of the valve into `journal`.
pub fn observe_valve(api: &ValvePort, journal: &Journal) {
    let log = journal.clone();
    api.opened.bind(move |()| {
        let log = log.clone();
        async move { log.push("opened") }
    });
    let log = journal.clone();
    api.closed.bind(move |()| {
        let log = log.clone();
        async move { log.push("closed") }
    });
}

// ============================================================================
// Worker system: front + slow worker
// ============================================================================

pub struct WorkPort {
    pub port: PortId,
    pub run: InEvent<u64>,
    pub burst: InEvent<u32>,
    pub progress: OutEvent<u32>,
}

pub struct FrontPort {
    pub port: PortId,
    pub start: InEvent<u64>,
    pub poke: InEvent<()>,
    pub kick: InEvent<u32>,
    pub notify: OutEvent<u32>,
}

/// Leaf that reports progress and then occupies its caller for a while.
pub struct Worker {
    pub id: ComponentId,
    pub work: Rc<WorkPort>,
}

impl Worker {
    pub fn new(locator: &Locator, parent: ComponentId) -> Rc<Self> {
        let runtime = locator.runtime();
        let id = runtime.add_component("worker", "Worker", Some(parent), ComponentKind::Native);
        let port = runtime.provide_port::<FlushCounter>(Some(id), "work");
        let work = Rc::new(WorkPort {
            port,
            run: InEvent::new(locator, port, "run"),
            burst: InEvent::new(locator, port, "burst"),
            progress: OutEvent::new(locator, port, "progress"),
        });

        let weak = Rc::downgrade(&work);
        let pump = locator.try_pump().cloned();
        work.run.bind(move |ticks| {
            let work = weak.upgrade();
            let pump = pump.clone();
            async move {
                let Some(work) = work else { return };
                work.progress.fire(0).await;
                if let Some(pump) = pump {
                    pump.sleep(ticks).await;
                }
            }
        });
        let weak = Rc::downgrade(&work);
        work.burst.bind(move |count| {
            let work = weak.upgrade();
            async move {
                let Some(work) = work else { return };
                for step in 0..count {
                    work.progress.fire(step).await;
                }
            }
        });
        Rc::new(Self { id, work })
    }
}

/// Native component in front of the worker.
pub struct Front {
    pub id: ComponentId,
    pub api: Rc<FrontPort>,
    work: Rc<WorkPort>,
    journal: Journal,
}

impl Front {
    pub fn new(
        locator: &Locator,
        parent: ComponentId,
        work: Rc<WorkPort>,
        journal: Journal,
    ) -> Result<Rc<Self>, BindingError> {
        let runtime = locator.runtime();
        let id = runtime.add_component("front", "Front", Some(parent), ComponentKind::Native);
        runtime.require_port(id, "work");
        runtime.connect(work.port, Some(id), "work")?;
        let port = runtime.provide_port::<FlushCounter>(Some(id), "api");
        let api = Rc::new(FrontPort {
            port,
            start: InEvent::new(locator, port, "start"),
            poke: InEvent::new(locator, port, "poke"),
            kick: InEvent::new(locator, port, "kick"),
            notify: OutEvent::new(locator, port, "notify"),
        });
        let front = Rc::new(Self { id, api, work, journal });

        let weak = Rc::downgrade(&front);
        front.api.start.bind(move |ticks| {
            let this = weak.upgrade();
            async move {
                let Some(this) = this else { return };
                this.journal.push("start:begin");
                this.work.run.call(ticks).await;
                this.journal.push("start:end");
            }
        });
        let weak = Rc::downgrade(&front);
        front.api.poke.bind(move |()| {
            let this = weak.upgrade();
            async move {
                if let Some(this) = this {
                    this.journal.push("poke");
                }
            }
        });
        let weak = Rc::downgrade(&front);
        front.api.kick.bind(move |count| {
            let this = weak.upgrade();
            async move {
                if let Some(this) = this {
                    this.work.burst.call(count).await;
                }
            }
        });
        let weak = Rc::downgrade(&front);
        front.work.progress.bind(move |step| {
            let this = weak.upgrade();
            async move {
                let Some(this) = this else { return };
                this.journal.push(format!("progress:{step}"));
                this.api.notify.fire(step).await;
            }
        });
        Ok(front)
    }
}

pub struct WorkerSystem {
    pub root: ComponentId,
    pub front: Rc<Front>,
    pub worker: Rc<Worker>,
}

/// Assemble the worker system with its external side bound to `journal`.
pub fn worker_system(locator: &Locator, journal: &Journal) -> Result<WorkerSystem, BindingError> {
    let runtime = locator.runtime();
    let root = runtime.add_component("sut", "WorkerSystem", None, ComponentKind::Native);
    let worker = Worker::new(locator, root);
    let front = Front::new(locator, root, Rc::clone(&worker.work), journal.clone())?;
    runtime.connect(front.api.port, None, "api")?;
    let log = journal.clone();
    front.api.notify.bind(move |step| {
        let log = log.clone();
        async move { log.push(format!("notify:{step}")) }
    });
    runtime.check_bindings(root)?;
    Ok(WorkerSystem { root, front, worker })
}

// ============================================================================
// Observers
// ============================================================================

/// Flags any handling hand-over between two different chains.
#[derive(Debug, Default)]
pub struct SingleWriter {
    pub violations: RefCell<Vec<(Peer, ChainId, ChainId)>>,
    pub acquisitions: Cell<usize>,
}

impl HandlingObserver for SingleWriter {
    fn handling_changed(&self, peer: Peer, previous: Option<ChainId>, next: Option<ChainId>) {
        if peer.is_none() {
            return;
        }
        if let Some(next) = next {
            self.acquisitions.set(self.acquisitions.get() + 1);
            if let Some(previous) = previous.filter(|previous| *previous != next) {
                self.violations.borrow_mut().push((peer, previous, next));
            }
        }
    }
}
