use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use crate::cast;
use crate::component::{EntityState, Id};
use crate::context::SimulationContext;
use crate::event::Event;
use crate::handler::EventHandler;
use crate::simulation::Simulation;

#[derive(Clone, Serialize)]
struct Ping {
    seq: u32,
}

#[derive(Clone, Serialize)]
struct Tick {}

struct Recorder {
    ctx: SimulationContext,
    received: Rc<RefCell<Vec<(f64, u32)>>>,
    started: Rc<RefCell<u32>>,
    stopped: Rc<RefCell<u32>>,
}

impl EventHandler for Recorder {
    fn on_start(&mut self) {
        *self.started.borrow_mut() += 1;
    }

    fn on(&mut self, event: Event) {
        cast!(match event.data {
            Ping { seq } => {
                self.received.borrow_mut().push((self.ctx.time(), seq));
            }
            Tick {} => {}
        })
    }

    fn on_shutdown(&mut self) {
        *self.stopped.borrow_mut() += 1;
    }
}

fn build_recorder(
    sim: &mut Simulation,
    name: &str,
) -> (Id, Rc<RefCell<Vec<(f64, u32)>>>, Rc<RefCell<u32>>, Rc<RefCell<u32>>) {
    let received = Rc::new(RefCell::new(Vec::new()));
    let started = Rc::new(RefCell::new(0));
    let stopped = Rc::new(RefCell::new(0));
    let recorder = Rc::new(RefCell::new(Recorder {
        ctx: sim.create_context(name),
        received: received.clone(),
        started: started.clone(),
        stopped: stopped.clone(),
    }));
    let id = sim.add_handler(name, recorder);
    (id, received, started, stopped)
}

#[test]
fn fifo_order_at_equal_time() {
    let mut sim = Simulation::new(123);
    let (dest, received, _, _) = build_recorder(&mut sim, "dest");
    let src = sim.create_context("src");
    src.emit(Ping { seq: 0 }, dest, 5.0);
    src.emit(Ping { seq: 1 }, dest, 5.0);
    src.emit(Ping { seq: 2 }, dest, 5.0);
    sim.step_until_no_events();
    assert_eq!(*received.borrow(), vec![(5.0, 0), (5.0, 1), (5.0, 2)]);
}

#[test]
fn clock_is_monotone() {
    let mut sim = Simulation::new(123);
    let (dest, received, _, _) = build_recorder(&mut sim, "dest");
    let src = sim.create_context("src");
    src.emit(Ping { seq: 2 }, dest, 3.0);
    src.emit(Ping { seq: 0 }, dest, 1.0);
    src.emit(Ping { seq: 1 }, dest, 2.0);
    sim.step_until_no_events();
    let received = received.borrow();
    assert_eq!(received.len(), 3);
    for pair in received.windows(2) {
        assert!(pair[0].0 <= pair[1].0);
    }
    assert_eq!(sim.time(), 3.0);
}

#[test]
#[should_panic(expected = "Invalid schedule")]
fn negative_delay_is_rejected() {
    let mut sim = Simulation::new(123);
    let (dest, ..) = build_recorder(&mut sim, "dest");
    let src = sim.create_context("src");
    src.emit(Ping { seq: 0 }, dest, -1.0);
}

#[test]
fn min_event_gap_raises_small_delays() {
    let mut sim = Simulation::new(123);
    sim.set_min_event_gap(0.5);
    let (dest, received, _, _) = build_recorder(&mut sim, "dest");
    let src = sim.create_context("src");
    src.emit_now(Ping { seq: 0 }, dest);
    src.emit(Ping { seq: 1 }, dest, 0.1);
    src.emit(Ping { seq: 2 }, dest, 2.0);
    sim.step_until_no_events();
    assert_eq!(*received.borrow(), vec![(0.5, 0), (0.5, 1), (2.0, 2)]);
}

#[test]
fn cancel_first_removes_only_earliest_match() {
    let mut sim = Simulation::new(123);
    let (dest, received, _, _) = build_recorder(&mut sim, "dest");
    let src = sim.create_context("src");
    src.emit(Ping { seq: 0 }, dest, 1.0);
    src.emit(Ping { seq: 1 }, dest, 2.0);
    src.emit(Ping { seq: 2 }, dest, 3.0);
    let src_id = src.id();
    sim.cancel_first(|e| e.src == src_id && e.data.is::<Ping>());
    sim.step_until_no_events();
    assert_eq!(*received.borrow(), vec![(2.0, 1), (3.0, 2)]);
}

#[test]
fn cancel_all_removes_every_match() {
    let mut sim = Simulation::new(123);
    let (dest, received, _, _) = build_recorder(&mut sim, "dest");
    let src = sim.create_context("src");
    src.emit(Ping { seq: 0 }, dest, 1.0);
    src.emit(Ping { seq: 1 }, dest, 2.0);
    let src_id = src.id();
    sim.cancel_events(|e| e.src == src_id);
    sim.step_until_no_events();
    assert!(received.borrow().is_empty());
    assert_eq!(sim.time(), 0.0);
}

#[test]
fn held_entity_defers_events_until_resume() {
    let mut sim = Simulation::new(123);
    let (dest, received, _, _) = build_recorder(&mut sim, "dest");
    let src = sim.create_context("src");
    src.emit(Ping { seq: 0 }, dest, 1.0);
    src.emit(Ping { seq: 1 }, dest, 2.0);
    sim.step(); // starts entities, delivers the first event
    assert_eq!(received.borrow().len(), 1);
    sim.hold_entity(dest);
    assert_eq!(sim.entity_state(dest), EntityState::Holding);
    sim.step_until_no_events();
    // the second event was parked, not delivered
    assert_eq!(received.borrow().len(), 1);
    sim.resume_entity(dest);
    assert_eq!(*received.borrow(), vec![(1.0, 0), (2.0, 1)]);
}

#[test]
fn termination_bound_clamps_clock() {
    let mut sim = Simulation::new(123);
    let (dest, received, started, stopped) = build_recorder(&mut sim, "dest");
    let src = sim.create_context("src");
    src.emit(Ping { seq: 0 }, dest, 5.0);
    src.emit(Ping { seq: 1 }, dest, 15.0);
    sim.terminate_at(10.0);
    let end_time = sim.run();
    assert_eq!(end_time, 10.0);
    assert_eq!(*received.borrow(), vec![(5.0, 0)]);
    assert_eq!(*started.borrow(), 1);
    assert_eq!(*stopped.borrow(), 1);
}

#[test]
fn run_invokes_lifecycle_callbacks_once() {
    let mut sim = Simulation::new(123);
    let (dest, _, started, stopped) = build_recorder(&mut sim, "dest");
    let src = sim.create_context("src");
    src.emit(Ping { seq: 0 }, dest, 1.0);
    sim.run();
    assert_eq!(*started.borrow(), 1);
    assert_eq!(*stopped.borrow(), 1);
    assert_eq!(sim.entity_state(dest), EntityState::Finished);
}

#[test]
fn event_ids_are_sequential() {
    let mut sim = Simulation::new(123);
    let (dest, ..) = build_recorder(&mut sim, "dest");
    let src = sim.create_context("src");
    let e0 = src.emit(Ping { seq: 0 }, dest, 1.0);
    let e1 = src.emit(Ping { seq: 1 }, dest, 1.0);
    assert_eq!(e0, 0);
    assert_eq!(e1, 1);
    assert_eq!(sim.event_count(), 2);
}
