//! Archetype-based entity component system and system scheduler.
//!
//! The three pillars:
//! - [`World`](world::World): entities stored in chunked archetype columns
//!   with per-cell change ticks, plus typed resources.
//! - [`Schedule`](schedule::Schedule): a dependency graph of systems and
//!   system sets, compiled into a topological order and run by a
//!   single-threaded or parallel executor.
//! - [`Events`](event::Events): double-buffered message queues connecting
//!   systems across ticks.

// so the derive macros resolve `verse_ecs::` paths from within this crate
extern crate self as verse_ecs;

pub mod access;
pub mod archetype;
pub mod bitset;
pub mod change_detection;
pub mod component;
pub mod entity;
pub mod event;
pub mod label;
pub mod query;
pub mod resource;
pub mod schedule;
pub mod storage;
pub mod system;
pub mod tick;
pub mod world;

pub use verse_ecs_macros::{Component, Event, Resource, ScheduleLabel, SystemSet};

pub mod prelude {
    pub use crate::change_detection::{DetectChanges, DetectChangesMut, Mut, Res, ResMut};
    pub use crate::component::Component;
    pub use crate::entity::Entity;
    pub use crate::event::{Event, EventCursor, EventReader, EventWriter, Events};
    pub use crate::query::{
        Added, Changed, MarkChanged, Query, QueryState, With, Without,
    };
    pub use crate::resource::{FromWorld, Resource};
    pub use crate::schedule::{
        common_conditions::*, ApplyDeferred, Condition, ExecutorKind, IntoScheduleConfigs,
        Schedule, ScheduleLabel, Schedules, SystemSet,
    };
    pub use crate::system::{Commands, IntoSystem, Local, System};
    pub use crate::tick::Tick;
    pub use crate::world::{EntityWorldMut, World};
    pub use verse_ecs_macros::{Component, Event, Resource, ScheduleLabel, SystemSet};
}
