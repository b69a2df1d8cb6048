//! A motorised valve used to drive the container end to end.

use std::rc::Rc;

use cfsm_container::{Container, ContainerConfig, ContainerError, Matcher, TraceMode};
use cfsm_runtime::{
    BindingError, ComponentId, ComponentKind, InEvent, Locator, OutEvent, PortId, Protocol,
    FLUSH_LABEL, RETURN_LABEL,
};

/// Deterministic seed for reproducibility.
pub const SEED: [u8; 32] = [
    0x43, 0x46, 0x53, 0x4D, 0x43, 0x6F, 0x6E, 0x74, // "CFSMCont"
    0x61, 0x69, 0x6E, 0x65, 0x72, 0x53, 0x63, 0x65, // "ainerSce"
    0x6E, 0x61, 0x72, 0x69, 0x6F, 0x54, 0x65, 0x73, // "narioTes"
    0x74, 0x73, 0x30, 0x30, 0x30, 0x30, 0x30, 0x31, // "ts000001"
];

/// Ticks the valve needs to travel.
pub const TRAVEL: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Closed,
    OpenCalled,
    Opening,
    Open,
    CloseCalled,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Open,
    Close,
    Return,
    Opened,
    Closed,
    Flush,
}

pub struct ValveProtocol;

impl Protocol for ValveProtocol {
    type State = Position;
    type Label = Signal;

    fn initial() -> Position {
        Position::Closed
    }

    fn label(text: &str) -> Option<Signal> {
        Some(match text {
            "open" => Signal::Open,
            "close" => Signal::Close,
            RETURN_LABEL => Signal::Return,
            "opened" => Signal::Opened,
            "closed" => Signal::Closed,
            FLUSH_LABEL => Signal::Flush,
            _ => return None,
        })
    }

    fn step(state: Position, label: Signal) -> Option<Position> {
        use Position as P;
        match (state, label) {
            (s, Signal::Flush) => Some(s),
            (P::Closed, Signal::Open) => Some(P::OpenCalled),
            (P::OpenCalled, Signal::Return) => Some(P::Opening),
            (P::Opening, Signal::Opened) => Some(P::Open),
            (P::Open, Signal::Close) => Some(P::CloseCalled),
            (P::CloseCalled, Signal::Return) => Some(P::Closing),
            (P::Closing, Signal::Closed) => Some(P::Closed),
            _ => None,
        }
    }
}

pub struct ValvePort {
    pub port: PortId,
    pub open: InEvent<()>,
    pub close: InEvent<()>,
    pub opened: OutEvent<()>,
    pub closed: OutEvent<()>,
}

pub struct ValveSystem {
    pub valve: ComponentId,
    pub api: Rc<ValvePort>,
}

/// Assemble the valve without binding its external side.
pub fn bare_valve(locator: &Locator) -> Result<(ComponentId, ValveSystem), BindingError> {
    let runtime = locator.runtime();
    let root = runtime.add_component("system", "ValveSystem", None, ComponentKind::Native);
    let valve = runtime.add_component("valve", "Valve", Some(root), ComponentKind::Native);
    let port = runtime.provide_port::<ValveProtocol>(Some(valve), "api");
    runtime.connect(port, None, "api")?;
    let api = Rc::new(ValvePort {
        port,
        open: InEvent::new(locator, port, "open"),
        close: InEvent::new(locator, port, "close"),
        opened: OutEvent::new(locator, port, "opened"),
        closed: OutEvent::new(locator, port, "closed"),
    });

    let pump = locator.try_pump().cloned();
    let weak = Rc::downgrade(&api);
    let timer = pump.clone();
    api.open.bind(move |()| {
        let api = weak.upgrade();
        let pump = timer.clone();
        async move {
            if let (Some(api), Some(pump)) = (api, pump) {
                pump.handle(TRAVEL, move || async move { api.opened.fire(()).await });
            }
        }
    });
    let weak = Rc::downgrade(&api);
    api.close.bind(move |()| {
        let api = weak.upgrade();
        let pump = pump.clone();
        async move {
            if let (Some(api), Some(pump)) = (api, pump) {
                pump.handle(TRAVEL, move || async move { api.closed.fire(()).await });
            }
        }
    });
    Ok((root, ValveSystem { valve, api }))
}

/// Assemble the valve and report its out-events to `matcher`.
pub fn valve_system(locator: &Locator, matcher: &Matcher) -> Result<(ComponentId, ValveSystem), BindingError> {
    let (root, system) = bare_valve(locator)?;
    let observer = matcher.clone();
    system.api.opened.bind(move |()| {
        let matcher = observer.clone();
        async move { matcher.observe("api.opened") }
    });
    let observer = matcher.clone();
    system.api.closed.bind(move |()| {
        let matcher = observer.clone();
        async move { matcher.observe("api.closed") }
    });
    Ok((root, system))
}

/// Container with `api.open` and `api.close` registered.
pub fn valve_container(config: ContainerConfig) -> Result<Container<ValveSystem>, ContainerError> {
    let mut container = Container::new(config, valve_system)?;
    container
        .register("api.open", |system, matcher| async move {
            system.api.open.call(()).await;
            matcher.reply("api", &())
        })
        .register("api.close", |system, matcher| async move {
            system.api.close.call(()).await;
            matcher.reply("api", &())
        });
    Ok(container)
}

pub fn capture() -> ContainerConfig {
    ContainerConfig::default().with_trace(TraceMode::Capture)
}

/// Input for `cycles` open/close round trips.
pub fn cycles_input(cycles: usize) -> String {
    let mut input = String::new();
    for _ in 0..cycles {
        input.push_str("api.open\napi.return\n<defer>\napi.opened\n");
        input.push_str("api.close\napi.return\n<defer>\napi.closed\n");
    }
    input
}
