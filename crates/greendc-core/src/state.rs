use std::collections::{BinaryHeap, HashSet, VecDeque};

use rand::distributions::uniform::{SampleRange, SampleUniform};
use rand::prelude::*;
use rand_pcg::Pcg64;

use crate::component::Id;
use crate::event::{Event, EventData, EventId};
use crate::log::log_incorrect_event;

/// Epsilon to compare floating point values for equality.
pub const EPSILON: f64 = 1e-12;

pub struct SimulationState {
    clock: f64,
    rand: Pcg64,
    events: BinaryHeap<Event>,
    deferred_events: VecDeque<Event>,
    canceled_events: HashSet<EventId>,
    event_count: u64,
    min_event_gap: f64,
}

impl SimulationState {
    pub fn new(seed: u64) -> Self {
        Self {
            clock: 0.0,
            rand: Pcg64::seed_from_u64(seed),
            events: BinaryHeap::new(),
            deferred_events: VecDeque::new(),
            canceled_events: HashSet::new(),
            event_count: 0,
            min_event_gap: 0.0,
        }
    }

    pub fn time(&self) -> f64 {
        self.clock
    }

    pub fn set_time(&mut self, time: f64) {
        self.clock = time;
    }

    pub fn min_event_gap(&self) -> f64 {
        self.min_event_gap
    }

    pub fn set_min_event_gap(&mut self, gap: f64) {
        assert!(gap >= 0., "Minimum event gap cannot be negative");
        self.min_event_gap = gap;
    }

    pub fn rand(&mut self) -> f64 {
        self.rand.gen_range(0.0..1.0)
    }

    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: SampleUniform,
        R: SampleRange<T>,
    {
        self.rand.gen_range(range)
    }

    pub fn add_event<T>(&mut self, data: T, src: Id, dest: Id, delay: f64) -> EventId
    where
        T: EventData,
    {
        let event_id = self.event_count;
        let event = Event {
            id: event_id,
            time: self.clock + delay.max(self.min_event_gap),
            src,
            dest,
            data: Box::new(data),
        };
        if delay >= -EPSILON {
            self.events.push(event);
            self.event_count += 1;
            event_id
        } else {
            log_incorrect_event(event, &format!("negative delay {}", delay));
            panic!("Invalid schedule: it is not allowed to add events from the past.");
        }
    }

    pub fn next_event(&mut self) -> Option<Event> {
        while let Some(event) = self.events.pop() {
            if !self.canceled_events.remove(&event.id) {
                // the clock never goes backwards
                self.clock = self.clock.max(event.time);
                return Some(event);
            }
        }
        None
    }

    pub fn peek_event(&mut self) -> Option<&Event> {
        loop {
            let canceled = match self.events.peek() {
                Some(event) => self.canceled_events.contains(&event.id),
                None => return None,
            };
            if canceled {
                let event = self.events.pop().unwrap();
                self.canceled_events.remove(&event.id);
            } else {
                return self.events.peek();
            }
        }
    }

    pub fn cancel_events<F>(&mut self, pred: F)
    where
        F: Fn(&Event) -> bool,
    {
        for event in self.events.iter() {
            if pred(event) {
                self.canceled_events.insert(event.id);
            }
        }
    }

    /// Cancels the earliest pending event matching the predicate.
    ///
    /// "Earliest" is defined by the delivery order, i.e. by `(time, id)`.
    pub fn cancel_first<F>(&mut self, pred: F)
    where
        F: Fn(&Event) -> bool,
    {
        let mut first: Option<(f64, EventId)> = None;
        for event in self.events.iter() {
            if self.canceled_events.contains(&event.id) || !pred(event) {
                continue;
            }
            let earlier = match first {
                Some((time, id)) => event.time < time || (event.time == time && event.id < id),
                None => true,
            };
            if earlier {
                first = Some((event.time, event.id));
            }
        }
        if let Some((_, id)) = first {
            self.canceled_events.insert(id);
        }
    }

    /// Parks an event destined to an entity that is not in running state.
    ///
    /// Events are deferred in delivery order, so the deferred queue stays sorted by `(time, id)`.
    pub fn defer_event(&mut self, event: Event) {
        self.deferred_events.push_back(event);
    }

    /// Removes and returns all deferred events destined to the given entity, in FIFO order.
    pub fn take_deferred(&mut self, dest: Id) -> Vec<Event> {
        let mut taken = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.deferred_events.len());
        for event in self.deferred_events.drain(..) {
            if event.dest == dest {
                taken.push(event);
            } else {
                remaining.push_back(event);
            }
        }
        self.deferred_events = remaining;
        taken
    }

    /// Peeks the first deferred event destined to the given entity that matches the predicate.
    pub fn find_first_deferred<F>(&self, dest: Id, pred: F) -> Option<&Event>
    where
        F: Fn(&Event) -> bool,
    {
        self.deferred_events.iter().find(|event| event.dest == dest && pred(event))
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred_events.len()
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    /// Drops all pending and deferred events without delivering them.
    pub fn drain_events(&mut self) {
        self.events.clear();
        self.deferred_events.clear();
        self.canceled_events.clear();
    }
}
