//! Facade smoke test: a hand-written lamp driven through the prelude.

#![allow(clippy::unwrap_used)]

use std::cell::Cell;
use std::io::Cursor;
use std::rc::Rc;

use cfsm::prelude::*;
use cfsm::runtime::to_bool;

struct Lamp {
    bulb: ComponentId,
    port: PortId,
    toggle: InEvent<(), bool>,
}

fn lamp(locator: &Locator, _matcher: &Matcher) -> Result<(ComponentId, Lamp), BindingError> {
    let runtime = locator.runtime();
    let root = runtime.add_component("lamp", "Lamp", None, ComponentKind::Native);
    let bulb = runtime.add_component("bulb", "Bulb", Some(root), ComponentKind::Foreign);
    let port = runtime.provide_port::<Unchecked>(Some(bulb), "power");
    runtime.connect(port, None, "power")?;
    let toggle = InEvent::new(locator, port, "toggle");
    let lit = Rc::new(Cell::new(false));
    toggle.bind(move |()| {
        let lit = Rc::clone(&lit);
        async move {
            lit.set(!lit.get());
            lit.get()
        }
    });
    Ok((root, Lamp { bulb, port, toggle }))
}

fn container() -> Container<Lamp> {
    let mut container =
        Container::new(ContainerConfig::default().with_trace(TraceMode::Capture), lamp).unwrap();
    container.register("power.toggle", |lamp, matcher| async move {
        let lit = lamp.toggle.call(()).await;
        matcher.reply("power", &lit)
    });
    container
}

#[test]
fn test_toggle_replies_are_replayed() {
    let container = container();
    container
        .run(Cursor::new("power.toggle\npower.true\npower.toggle\npower.false\n"))
        .unwrap();

    let trace = container.trace();
    assert_eq!(
        trace,
        vec![
            "<external>.power.toggle -> sut.bulb.power.toggle",
            "<external>.power.true <- sut.bulb.power.true",
            "<external>.power.toggle -> sut.bulb.power.toggle",
            "<external>.power.false <- sut.bulb.power.false",
        ]
    );
    let replies: Vec<bool> = trace
        .iter()
        .filter(|line| line.contains(" <- "))
        .filter_map(|line| line.rsplit('.').next())
        .map(to_bool)
        .collect();
    assert_eq!(replies, vec![true, false]);
}

#[test]
fn test_wrong_reply_is_a_mismatch() {
    let container = container();
    let err = container.run(Cursor::new("power.toggle\npower.false\n")).unwrap_err();
    assert_eq!(
        err.to_string(),
        "unmatched expectation: expect \"power.false\" but got \"power.true\""
    );
}

#[test]
fn test_foreign_component_is_exempt_from_collateral_blocking() {
    let container = container();
    let runtime = container.locator().runtime();
    let lamp = container.system();
    assert!(!runtime.native(Some(lamp.bulb)));
    assert_eq!(runtime.provider_of(lamp.port), Some(lamp.bulb));
    assert_eq!(runtime.requirer_of(lamp.port), Some(None));
}
