//! Simulation configuration and execution.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::Level::Trace;
use log::{debug, log_enabled, trace};
use serde_json::json;
use serde_type_name::type_name;

use crate::component::{EntityState, Id};
use crate::context::SimulationContext;
use crate::handler::EventHandler;
use crate::log::log_undelivered_event;
use crate::state::SimulationState;
use crate::Event;

/// Represents a simulation, provides methods for its configuration and execution.
pub struct Simulation {
    sim_state: Rc<RefCell<SimulationState>>,
    name_to_id: HashMap<String, Id>,
    names: Rc<RefCell<Vec<String>>>,
    handlers: Vec<Option<Rc<RefCell<dyn EventHandler>>>>,
    entity_states: Vec<EntityState>,
    termination_time: Option<f64>,
    started: bool,
}

impl Simulation {
    /// Creates a new simulation with specified random seed.
    pub fn new(seed: u64) -> Self {
        Self {
            sim_state: Rc::new(RefCell::new(SimulationState::new(seed))),
            name_to_id: HashMap::new(),
            names: Rc::new(RefCell::new(Vec::new())),
            handlers: Vec::new(),
            entity_states: Vec::new(),
            termination_time: None,
            started: false,
        }
    }

    fn register(&mut self, name: &str) -> Id {
        if let Some(&id) = self.name_to_id.get(name) {
            return id;
        }
        let id = self.name_to_id.len() as Id;
        self.name_to_id.insert(name.to_owned(), id);
        self.names.borrow_mut().push(name.to_owned());
        self.handlers.push(None);
        self.entity_states.push(EntityState::Runnable);
        id
    }

    /// Returns the identifier of component by its name.
    ///
    /// Panics if component with such name does not exist.
    pub fn lookup_id(&self, name: &str) -> Id {
        *self.name_to_id.get(name).unwrap()
    }

    /// Returns the name of component by its identifier.
    ///
    /// Panics if component with such Id does not exist.
    pub fn lookup_name(&self, id: Id) -> String {
        self.names.borrow()[id as usize].clone()
    }

    /// Creates a new simulation context with specified name.
    pub fn create_context<S>(&mut self, name: S) -> SimulationContext
    where
        S: AsRef<str>,
    {
        let ctx = SimulationContext::new(
            self.register(name.as_ref()),
            name.as_ref(),
            self.sim_state.clone(),
            self.names.clone(),
        );
        debug!(
            target: "simulation",
            "[{:.3} {} simulation] Created context: {}",
            self.time(),
            crate::log::get_colored("DEBUG", colored::Color::Blue),
            json!({"name": ctx.name(), "id": ctx.id()})
        );
        ctx
    }

    /// Registers the event handler implementation for component with specified name,
    /// returns the component Id.
    ///
    /// The component becomes a runnable entity. If the simulation is already started, the
    /// entity is started immediately.
    pub fn add_handler<S>(&mut self, name: S, handler: Rc<RefCell<dyn EventHandler>>) -> Id
    where
        S: AsRef<str>,
    {
        let id = self.register(name.as_ref());
        self.handlers[id as usize] = Some(handler.clone());
        debug!(
            target: "simulation",
            "[{:.3} {} simulation] Added handler: {}",
            self.time(),
            crate::log::get_colored("DEBUG", colored::Color::Blue),
            json!({"name": name.as_ref(), "id": id})
        );
        if self.started {
            self.entity_states[id as usize] = EntityState::Running;
            handler.borrow_mut().on_start();
        }
        id
    }

    /// Removes the event handler for component with specified name.
    ///
    /// All subsequent events destined for this component will not be delivered until the
    /// handler is added again.
    pub fn remove_handler<S>(&mut self, name: S)
    where
        S: AsRef<str>,
    {
        let id = self.lookup_id(name.as_ref());
        self.handlers[id as usize] = None;
        self.entity_states[id as usize] = EntityState::Finished;
        debug!(
            target: "simulation",
            "[{:.3} {} simulation] Removed handler: {}",
            self.time(),
            crate::log::get_colored("DEBUG", colored::Color::Blue),
            json!({"name": name.as_ref(), "id": id})
        );
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.sim_state.borrow().time()
    }

    /// Returns the lifecycle state of the given entity.
    pub fn entity_state(&self, id: Id) -> EntityState {
        self.entity_states[id as usize]
    }

    /// Sets the minimum delay enforced for all scheduled events.
    ///
    /// Events emitted with a smaller delay are scheduled after this gap instead.
    pub fn set_min_event_gap(&mut self, gap: f64) {
        self.sim_state.borrow_mut().set_min_event_gap(gap);
    }

    /// Returns the minimum delay enforced for all scheduled events.
    pub fn min_event_gap(&self) -> f64 {
        self.sim_state.borrow().min_event_gap()
    }

    /// Sets the hard upper bound on the simulation time.
    ///
    /// No event with time at or past the bound is delivered, and the clock is set to exactly
    /// the bound when it is reached.
    pub fn terminate_at(&mut self, time: f64) {
        self.termination_time = Some(time);
    }

    /// Parks a running entity: subsequent events destined to it are deferred until it is
    /// resumed.
    pub fn hold_entity(&mut self, id: Id) {
        assert_eq!(
            self.entity_states[id as usize],
            EntityState::Running,
            "Only a running entity can be held"
        );
        self.entity_states[id as usize] = EntityState::Holding;
    }

    /// Resumes a held entity and immediately delivers its deferred events in FIFO order.
    pub fn resume_entity(&mut self, id: Id) {
        assert_eq!(
            self.entity_states[id as usize],
            EntityState::Holding,
            "Only a held entity can be resumed"
        );
        self.entity_states[id as usize] = EntityState::Running;
        let deferred = self.sim_state.borrow_mut().take_deferred(id);
        for event in deferred {
            self.deliver(event);
        }
    }

    fn start_entities(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        for id in 0..self.handlers.len() {
            if self.handlers[id].is_some() && self.entity_states[id] == EntityState::Runnable {
                self.entity_states[id] = EntityState::Running;
                let handler = self.handlers[id].as_ref().unwrap().clone();
                handler.borrow_mut().on_start();
            }
        }
    }

    fn shutdown_entities(&mut self) {
        for id in 0..self.handlers.len() {
            if self.handlers[id].is_some()
                && matches!(self.entity_states[id], EntityState::Running | EntityState::Holding)
            {
                let handler = self.handlers[id].as_ref().unwrap().clone();
                handler.borrow_mut().on_shutdown();
                self.entity_states[id] = EntityState::Finished;
            }
        }
    }

    fn deliver(&mut self, event: Event) {
        let dest = event.dest as usize;
        let handler_opt = self.handlers.get(dest).cloned().flatten();
        match handler_opt {
            Some(handler) => {
                if self.entity_states[dest] != EntityState::Running {
                    self.sim_state.borrow_mut().defer_event(event);
                    return;
                }
                if log_enabled!(Trace) {
                    let src_name = self.lookup_name(event.src);
                    let dest_name = self.lookup_name(event.dest);
                    trace!(
                        target: &dest_name,
                        "[{:.3} {} {}] {}",
                        event.time,
                        crate::log::get_colored("EVENT", colored::Color::BrightBlack),
                        dest_name,
                        json!({"type": type_name(&event.data).unwrap(), "data": event.data, "src": src_name})
                    );
                }
                handler.borrow_mut().on(event);
            }
            None => log_undelivered_event(event),
        }
    }

    /// Performs a single step through the simulation.
    ///
    /// Takes the next event from the queue, advances the simulation time to event time and
    /// delivers the event to the corresponding entity. If the destination entity is registered
    /// but not running, the event is moved to the deferred queue. If there is no handler
    /// registered for the destination, the event is logged and discarded.
    ///
    /// Returns `true` if some pending event was processed (no matter how) and `false` if no
    /// progress can be made: there are no pending events or the termination bound is reached.
    pub fn step(&mut self) -> bool {
        self.start_entities();
        if let Some(limit) = self.termination_time {
            let reached = {
                let mut state = self.sim_state.borrow_mut();
                match state.peek_event() {
                    Some(event) => Some(event.time >= limit),
                    None => None,
                }
            };
            match reached {
                None => return false,
                Some(true) => {
                    self.sim_state.borrow_mut().set_time(limit);
                    return false;
                }
                Some(false) => {}
            }
        }
        let next = self.sim_state.borrow_mut().next_event();
        if let Some(event) = next {
            self.deliver(event);
            true
        } else {
            false
        }
    }

    /// Performs the specified number of steps through the simulation.
    ///
    /// Returns `true` if there could be more pending events and `false` otherwise.
    pub fn steps(&mut self, step_count: u64) -> bool {
        for _ in 0..step_count {
            if !self.step() {
                return false;
            }
        }
        true
    }

    /// Steps through the simulation until there are no pending events left.
    pub fn step_until_no_events(&mut self) {
        while self.step() {}
    }

    /// Steps through the simulation with duration limit.
    ///
    /// Returns `true` if there could be more pending events and `false` otherwise.
    pub fn step_for_duration(&mut self, duration: f64) -> bool {
        self.start_entities();
        let end_time = self.sim_state.borrow().time() + duration;
        loop {
            let has_more = {
                let mut state = self.sim_state.borrow_mut();
                match state.peek_event() {
                    Some(event) => {
                        if event.time > end_time {
                            return true;
                        }
                        true
                    }
                    None => false,
                }
            };
            if !has_more {
                return false;
            }
            if !self.step() {
                return false;
            }
        }
    }

    /// Runs the simulation to completion and returns the final simulation time.
    ///
    /// Starts all runnable entities, processes events until the queue is empty or the
    /// termination bound is reached, then shuts all entities down.
    pub fn run(&mut self) -> f64 {
        self.start_entities();
        while self.step() {}
        self.shutdown_entities();
        self.time()
    }

    /// Drops all pending events without delivering them.
    pub fn stop(&mut self) {
        self.sim_state.borrow_mut().drain_events();
    }

    /// Returns a random float in the range _[0, 1)_
    /// using the simulation-wide random number generator.
    pub fn rand(&mut self) -> f64 {
        self.sim_state.borrow_mut().rand()
    }

    /// Returns the total number of created events.
    ///
    /// Note that cancelled events are also counted here.
    pub fn event_count(&self) -> u64 {
        self.sim_state.borrow().event_count()
    }

    /// Returns the number of events parked in the deferred queue.
    pub fn deferred_event_count(&self) -> usize {
        self.sim_state.borrow().deferred_count()
    }

    /// Cancels events that satisfy the given predicate function.
    ///
    /// Note that already processed or deferred events cannot be cancelled.
    pub fn cancel_events<F>(&mut self, pred: F)
    where
        F: Fn(&Event) -> bool,
    {
        self.sim_state.borrow_mut().cancel_events(pred);
    }

    /// Cancels the earliest (in delivery order) pending event matching the predicate.
    pub fn cancel_first<F>(&mut self, pred: F)
    where
        F: Fn(&Event) -> bool,
    {
        self.sim_state.borrow_mut().cancel_first(pred);
    }
}
