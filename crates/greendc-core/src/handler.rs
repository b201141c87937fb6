//! Event handling.

use crate::event::Event;

/// Trait for simulation entities.
///
/// An entity is started when the simulation is started, receives events while it is running
/// and is notified once when the simulation is shut down. Only [`on`](EventHandler::on) is
/// mandatory, the lifecycle callbacks default to no-ops.
pub trait EventHandler {
    /// Invoked once when the simulation is started.
    ///
    /// Entities typically bootstrap their activity here by scheduling initial events.
    fn on_start(&mut self) {}

    /// Processes an event destined to this entity.
    fn on(&mut self, event: Event);

    /// Invoked once when the simulation is shut down.
    fn on_shutdown(&mut self) {}
}

/// Enables the use of pattern matching syntax for processing different types of events
/// by downcasting the event payload from [`EventData`](crate::event::EventData) to
/// user-defined types.
///
/// Match arms need not be exhaustive. If the event payload does not match any of the
/// specified arms, the event is logged as unhandled under `ERROR` level.
///
/// # Examples
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use serde::Serialize;
/// use greendc_core::{cast, Event, EventHandler, Simulation, SimulationContext};
///
/// #[derive(Clone, Serialize)]
/// pub struct SomeEvent {
///     some_field: u32,
/// }
///
/// pub struct Component {
///     ctx: SimulationContext,
/// }
///
/// impl EventHandler for Component {
///     fn on(&mut self, event: Event) {
///         cast!(match event.data {
///             SomeEvent { some_field } => {
///                 assert_eq!(some_field, 16);
///             }
///         })
///     }
/// }
///
/// let mut sim = Simulation::new(123);
/// let comp_ctx = sim.create_context("comp");
/// let comp_id = sim.add_handler("comp", Rc::new(RefCell::new(Component { ctx: comp_ctx })));
/// let client_ctx = sim.create_context("client");
/// client_ctx.emit(SomeEvent { some_field: 16 }, comp_id, 1.2);
/// sim.step_until_no_events();
/// ```
#[macro_export]
macro_rules! cast {
    ( match $event:ident.data { $( $type:ident { $($tt:tt)* } => { $($expr:tt)* } )+ } ) => {
        $(
            if $event.data.is::<$type>() {
                if let Ok(__value) = $event.data.downcast::<$type>() {
                    let $type { $($tt)* } = *__value;
                    $($expr)*
                }
            } else
        )*
        {
            $crate::log::log_unhandled_event($event);
        }
    }
}
