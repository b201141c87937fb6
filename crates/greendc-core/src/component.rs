//! Simulation components (entities).

/// Identifier of simulation component.
///
/// Identifiers are assigned sequentially starting from 0 upon component registration.
pub type Id = u32;

/// Lifecycle state of a registered entity.
///
/// A registered entity starts as [`Runnable`](EntityState::Runnable) and is promoted to
/// [`Running`](EntityState::Running) when the simulation is started. A running entity can be
/// parked in [`Holding`](EntityState::Holding) state, in which case events destined to it are
/// moved to the deferred queue until the entity is resumed. After simulation shutdown all
/// entities are [`Finished`](EntityState::Finished).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityState {
    /// Registered but not yet started.
    Runnable,
    /// Started and able to receive events.
    Running,
    /// Temporarily not receiving events, incoming events are deferred.
    Holding,
    /// Shut down, no longer participates in the simulation.
    Finished,
}
