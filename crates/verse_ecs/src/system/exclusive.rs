//! Systems that take the whole world.

use crate::access::FilteredAccessSet;
use crate::system::{IntoSystem, System};
use crate::tick::Tick;
use crate::world::{UnsafeWorldCell, World};
use std::borrow::Cow;

/// A system wrapping a `fn(&mut World)`. Exclusive systems never run
/// concurrently with anything; the executor gives them the world to
/// themselves.
pub struct ExclusiveFunctionSystem<F>
where
    F: FnMut(&mut World) + Send + Sync + 'static,
{
    func: F,
    name: Cow<'static, str>,
    component_access: FilteredAccessSet,
    last_run: Tick,
    initialized: bool,
}

/// Marker distinguishing the exclusive-system [`IntoSystem`] impl.
pub struct IsExclusiveFunctionSystem;

impl<F> IntoSystem<(), (), (IsExclusiveFunctionSystem,)> for F
where
    F: FnMut(&mut World) + Send + Sync + 'static,
{
    type System = ExclusiveFunctionSystem<F>;

    fn into_system(func: Self) -> Self::System {
        ExclusiveFunctionSystem {
            func,
            name: Cow::Borrowed(std::any::type_name::<F>()),
            component_access: FilteredAccessSet::default(),
            last_run: Tick::new(0),
            initialized: false,
        }
    }
}

impl<F> System for ExclusiveFunctionSystem<F>
where
    F: FnMut(&mut World) + Send + Sync + 'static,
{
    type In = ();
    type Out = ();

    fn name(&self) -> Cow<'static, str> {
        self.name.clone()
    }

    fn component_access(&self) -> &FilteredAccessSet {
        &self.component_access
    }

    fn is_exclusive(&self) -> bool {
        true
    }

    fn has_deferred(&self) -> bool {
        false
    }

    fn initialize(&mut self, world: &mut World) {
        if self.initialized {
            return;
        }
        self.component_access.write_all();
        self.last_run = world.change_tick().relative_to(Tick::MAX);
        self.initialized = true;
    }

    unsafe fn run_unsafe(&mut self, _input: (), world: UnsafeWorldCell) -> Self::Out {
        // SAFETY: the executor only runs exclusive systems while nothing
        // else touches the world
        let world = world.world_mut();
        (self.func)(world);
    }

    fn run(&mut self, _input: (), world: &mut World) {
        (self.func)(world);
    }

    fn apply_deferred(&mut self, _world: &mut World) {}

    fn last_run(&self) -> Tick {
        self.last_run
    }

    fn set_last_run(&mut self, tick: Tick) {
        self.last_run = tick;
    }

    fn check_change_tick(&mut self, current: Tick) {
        self.last_run.check_tick(current);
    }

    fn type_set(&self) -> Option<crate::schedule::InternedSystemSet> {
        use crate::schedule::{SystemSet, SystemTypeSet};
        Some(SystemTypeSet::<Self>::new().intern())
    }
}
