//! Systems: schedulable units with declared data access.

mod commands;
mod exclusive;
mod function_system;
mod system_param;

pub use commands::{Command, CommandQueue, Commands, EntityCommands};
pub use exclusive::{ExclusiveFunctionSystem, IsExclusiveFunctionSystem};
pub use function_system::{FunctionSystem, IsFunctionSystem, SystemParamFunction};
pub use system_param::{Local, ReadOnlySystemParam, SystemMeta, SystemParam, SystemParamItem};

use crate::access::FilteredAccessSet;
use crate::tick::Tick;
use crate::world::{UnsafeWorldCell, World};
use std::borrow::Cow;

/// A schedulable unit. Systems declare the data they access up front; the
/// scheduler uses those declarations both to reject ambiguous schedules and
/// to admit compatible systems to run concurrently.
pub trait System: Send + Sync + 'static {
    type In;
    type Out;

    fn name(&self) -> Cow<'static, str>;

    /// The declared access of this system. Valid after `initialize`.
    fn component_access(&self) -> &FilteredAccessSet;

    /// `true` if the system needs the whole world to itself.
    fn is_exclusive(&self) -> bool;

    /// `true` if the system records deferred mutations that need an apply.
    fn has_deferred(&self) -> bool;

    /// Registers component ids and builds param state. Must run before the
    /// first `run`.
    fn initialize(&mut self, world: &mut World);

    /// Runs the system against a world cell.
    ///
    /// # Safety
    /// The caller must guarantee that the access this system declared via
    /// [`System::component_access`] is safe to exercise through `world`,
    /// i.e. no other code is concurrently violating it.
    unsafe fn run_unsafe(&mut self, input: Self::In, world: UnsafeWorldCell) -> Self::Out;

    /// Runs the system with exclusive world access.
    fn run(&mut self, input: Self::In, world: &mut World) -> Self::Out {
        let cell = UnsafeWorldCell::new(world);
        // SAFETY: exclusive borrow covers any declared access
        unsafe { self.run_unsafe(input, cell) }
    }

    /// Applies any deferred buffers recorded by this system's params.
    fn apply_deferred(&mut self, world: &mut World);

    /// `true` for the [`ApplyDeferred`](crate::schedule::ApplyDeferred)
    /// flush-barrier marker.
    fn is_apply_deferred(&self) -> bool {
        false
    }

    /// The per-type set this system belongs to, so ordering constraints can
    /// name it by its function.
    fn type_set(&self) -> Option<crate::schedule::InternedSystemSet> {
        None
    }

    /// The tick of this system's previous run; the lower edge of its change
    /// detection window.
    fn last_run(&self) -> Tick;

    fn set_last_run(&mut self, tick: Tick);

    /// Rebases the stored last-run tick. See
    /// [`World::check_change_ticks`](crate::world::World::check_change_ticks).
    fn check_change_tick(&mut self, current: Tick);
}

/// Marker for systems whose declared access contains no writes.
///
/// # Safety
/// The implementation must never write to the world through its declared
/// access.
pub unsafe trait ReadOnlySystem: System {}

/// A type-erased system taking no input.
pub type BoxedSystem<In = (), Out = ()> = Box<dyn System<In = In, Out = Out>>;

/// Conversion into a [`System`]. The `Marker` parameter exists only to keep
/// the blanket impls for plain functions, exclusive functions and
/// already-built systems from overlapping.
pub trait IntoSystem<In, Out, Marker>: Sized {
    type System: System<In = In, Out = Out>;

    fn into_system(this: Self) -> Self::System;
}

// every System trivially converts into itself
impl<S: System> IntoSystem<S::In, S::Out, ()> for S {
    type System = S;

    fn into_system(this: Self) -> Self::System {
        this
    }
}

/// Panic message for params that require a missing resource.
#[track_caller]
pub(crate) fn missing_resource(resource: &str, system: &str) -> ! {
    panic!(
        "resource {resource} requested by system {system} does not exist; \
         insert or init it before running the schedule"
    )
}
