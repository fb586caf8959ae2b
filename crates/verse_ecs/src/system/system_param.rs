//! System parameters: how a system's arguments are built from the world.
//!
//! Each parameter type declares its access into the owning system's
//! [`SystemMeta`] in `init_state`, before the system's first run; the
//! schedule builder and the parallel executor rely on those declarations
//! being complete.

use crate::access::FilteredAccessSet;
use crate::change_detection::{Res, ResMut};
use crate::component::ComponentId;
use crate::query::{Query, QueryData, QueryFilter, QueryState, ReadOnlyQueryData};
use crate::resource::{FromWorld, Resource};
use crate::system::{missing_resource, CommandQueue, Commands};
use crate::tick::Tick;
use crate::world::{UnsafeWorldCell, World};
use std::any::type_name;
use std::borrow::Cow;
use std::ops::{Deref, DerefMut};
use variadics_please::all_tuples;

/// Metadata a system accumulates while its params initialize.
pub struct SystemMeta {
    pub(crate) name: Cow<'static, str>,
    pub(crate) component_access_set: FilteredAccessSet,
    pub(crate) has_deferred: bool,
    pub(crate) last_run: Tick,
}

impl SystemMeta {
    pub(crate) fn new(name: Cow<'static, str>) -> Self {
        Self {
            name,
            component_access_set: FilteredAccessSet::default(),
            has_deferred: false,
            last_run: Tick::new(0),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn component_access_set(&self) -> &FilteredAccessSet {
        &self.component_access_set
    }
}

/// A system argument. Implementations register their access in `init_state`
/// and materialize their value in `get_param` each run.
///
/// # Safety
/// `init_state` must register every read and write `get_param` performs; the
/// registered access must not conflict with access already present in the
/// meta (implementations panic on conflict, naming the system).
pub unsafe trait SystemParam: Sized {
    type State: Send + Sync + 'static;
    type Item<'world, 'state>;

    fn init_state(world: &mut World, system_meta: &mut SystemMeta) -> Self::State;

    /// # Safety
    /// The caller must guarantee the access registered by `init_state` is
    /// safe to exercise through `world` for the duration of the item.
    unsafe fn get_param<'world, 'state>(
        state: &'state mut Self::State,
        system_meta: &SystemMeta,
        world: UnsafeWorldCell<'world>,
        this_run: Tick,
    ) -> Self::Item<'world, 'state>;

    /// Applies deferred buffers recorded by this param.
    fn apply(_state: &mut Self::State, _world: &mut World) {}
}

/// Marker for params that never write through their declared access.
///
/// # Safety
/// The implementation must register (and perform) reads only.
pub unsafe trait ReadOnlySystemParam: SystemParam {}

/// Shorthand for the materialized value of a param.
pub type SystemParamItem<'w, 's, P> = <P as SystemParam>::Item<'w, 's>;

// ----- Res / ResMut ---------------------------------------------------------

unsafe impl<'a, T: Resource> SystemParam for Res<'a, T> {
    type State = ComponentId;
    type Item<'w, 's> = Res<'w, T>;

    fn init_state(world: &mut World, system_meta: &mut SystemMeta) -> Self::State {
        let id = world.register_resource::<T>();
        assert!(
            !system_meta.component_access_set.combined_access().has_write(id),
            "Res<{}> in system {} conflicts with a previous mutable access",
            type_name::<T>(),
            system_meta.name
        );
        system_meta.component_access_set.add_unfiltered_read(id);
        id
    }

    unsafe fn get_param<'w, 's>(
        state: &'s mut Self::State,
        system_meta: &SystemMeta,
        world: UnsafeWorldCell<'w>,
        this_run: Tick,
    ) -> Self::Item<'w, 's> {
        // SAFETY: read access was declared
        let world = world.world();
        let Some((value, ticks)) = world.resources.get(*state) else {
            missing_resource(type_name::<T>(), &system_meta.name);
        };
        Res {
            value: value.downcast_ref::<T>().expect("resource type mismatch"),
            ticks,
            last_run: system_meta.last_run,
            this_run,
        }
    }
}

unsafe impl<'a, T: Resource> ReadOnlySystemParam for Res<'a, T> {}

unsafe impl<'a, T: Resource> SystemParam for Option<Res<'a, T>> {
    type State = ComponentId;
    type Item<'w, 's> = Option<Res<'w, T>>;

    fn init_state(world: &mut World, system_meta: &mut SystemMeta) -> Self::State {
        Res::<T>::init_state(world, system_meta)
    }

    unsafe fn get_param<'w, 's>(
        state: &'s mut Self::State,
        system_meta: &SystemMeta,
        world: UnsafeWorldCell<'w>,
        this_run: Tick,
    ) -> Self::Item<'w, 's> {
        // SAFETY: read access was declared
        let world_ref = world.world();
        world_ref.resources.get(*state).map(|(value, ticks)| Res {
            value: value.downcast_ref::<T>().expect("resource type mismatch"),
            ticks,
            last_run: system_meta.last_run,
            this_run,
        })
    }
}

unsafe impl<'a, T: Resource> ReadOnlySystemParam for Option<Res<'a, T>> {}

unsafe impl<'a, T: Resource> SystemParam for ResMut<'a, T> {
    type State = ComponentId;
    type Item<'w, 's> = ResMut<'w, T>;

    fn init_state(world: &mut World, system_meta: &mut SystemMeta) -> Self::State {
        let id = world.register_resource::<T>();
        let combined = system_meta.component_access_set.combined_access();
        assert!(
            !combined.has_read(id),
            "ResMut<{}> in system {} conflicts with a previous access",
            type_name::<T>(),
            system_meta.name
        );
        system_meta.component_access_set.add_unfiltered_write(id);
        id
    }

    unsafe fn get_param<'w, 's>(
        state: &'s mut Self::State,
        system_meta: &SystemMeta,
        world: UnsafeWorldCell<'w>,
        this_run: Tick,
    ) -> Self::Item<'w, 's> {
        // SAFETY: write access was declared; the executor admits no
        // conflicting system concurrently
        let world = world.world_mut();
        let Some((value, ticks)) = world.resources.get_mut(*state) else {
            missing_resource(type_name::<T>(), &system_meta.name);
        };
        ResMut {
            value: value.downcast_mut::<T>().expect("resource type mismatch"),
            ticks,
            last_run: system_meta.last_run,
            this_run,
        }
    }
}

unsafe impl<'a, T: Resource> SystemParam for Option<ResMut<'a, T>> {
    type State = ComponentId;
    type Item<'w, 's> = Option<ResMut<'w, T>>;

    fn init_state(world: &mut World, system_meta: &mut SystemMeta) -> Self::State {
        ResMut::<T>::init_state(world, system_meta)
    }

    unsafe fn get_param<'w, 's>(
        state: &'s mut Self::State,
        system_meta: &SystemMeta,
        world: UnsafeWorldCell<'w>,
        this_run: Tick,
    ) -> Self::Item<'w, 's> {
        // SAFETY: write access was declared
        let world_mut = world.world_mut();
        world_mut.resources.get_mut(*state).map(|(value, ticks)| ResMut {
            value: value.downcast_mut::<T>().expect("resource type mismatch"),
            ticks,
            last_run: system_meta.last_run,
            this_run,
        })
    }
}

// ----- Query ----------------------------------------------------------------

unsafe impl<'w2, 's2, D: QueryData + 'static, F: QueryFilter + 'static> SystemParam
    for Query<'w2, 's2, D, F>
{
    type State = QueryState<D, F>;
    type Item<'w, 's> = Query<'w, 's, D, F>;

    fn init_state(world: &mut World, system_meta: &mut SystemMeta) -> Self::State {
        let state = QueryState::<D, F>::new(world);
        let mut candidate = FilteredAccessSet::default();
        candidate.add(state.component_access().clone());
        assert!(
            system_meta.component_access_set.is_compatible(&candidate),
            "query in system {} conflicts with a previous param of the same system; \
             conflicting components: {:?}",
            system_meta.name,
            system_meta.component_access_set.get_conflicts(&candidate)
        );
        system_meta.component_access_set.extend(&candidate);
        state
    }

    unsafe fn get_param<'w, 's>(
        state: &'s mut Self::State,
        system_meta: &SystemMeta,
        world: UnsafeWorldCell<'w>,
        this_run: Tick,
    ) -> Self::Item<'w, 's> {
        // SAFETY: reading archetype metadata is always allowed
        state.update_archetypes(world.world());
        // SAFETY: the query's access was declared in init_state
        Query::new(world, state, system_meta.last_run, this_run)
    }
}

unsafe impl<'w2, 's2, D: ReadOnlyQueryData + 'static, F: QueryFilter + 'static>
    ReadOnlySystemParam for Query<'w2, 's2, D, F>
{
}

// ----- Commands -------------------------------------------------------------

unsafe impl<'a> SystemParam for Commands<'a> {
    type State = CommandQueue;
    type Item<'w, 's> = Commands<'s>;

    fn init_state(_world: &mut World, system_meta: &mut SystemMeta) -> Self::State {
        system_meta.has_deferred = true;
        CommandQueue::default()
    }

    unsafe fn get_param<'w, 's>(
        state: &'s mut Self::State,
        _system_meta: &SystemMeta,
        _world: UnsafeWorldCell<'w>,
        _this_run: Tick,
    ) -> Self::Item<'w, 's> {
        Commands::new(state)
    }

    fn apply(state: &mut Self::State, world: &mut World) {
        state.apply(world);
    }
}

// a command queue is system-local until applied
unsafe impl<'a> ReadOnlySystemParam for Commands<'a> {}

// ----- Local ----------------------------------------------------------------

/// Per-system state living across runs, invisible to the rest of the world.
pub struct Local<'s, T: FromWorld + Send + Sync + 'static>(pub(crate) &'s mut T);

impl<'s, T: FromWorld + Send + Sync + 'static> Deref for Local<'s, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.0
    }
}

impl<'s, T: FromWorld + Send + Sync + 'static> DerefMut for Local<'s, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        self.0
    }
}

unsafe impl<'a, T: FromWorld + Send + Sync + 'static> SystemParam for Local<'a, T> {
    type State = T;
    type Item<'w, 's> = Local<'s, T>;

    fn init_state(world: &mut World, _system_meta: &mut SystemMeta) -> Self::State {
        T::from_world(world)
    }

    unsafe fn get_param<'w, 's>(
        state: &'s mut Self::State,
        _system_meta: &SystemMeta,
        _world: UnsafeWorldCell<'w>,
        _this_run: Tick,
    ) -> Self::Item<'w, 's> {
        Local(state)
    }
}

unsafe impl<'a, T: FromWorld + Send + Sync + 'static> ReadOnlySystemParam for Local<'a, T> {}

// ----- &World ---------------------------------------------------------------

unsafe impl<'w2> SystemParam for &'w2 World {
    type State = ();
    type Item<'w, 's> = &'w World;

    fn init_state(_world: &mut World, system_meta: &mut SystemMeta) -> Self::State {
        assert!(
            !system_meta
                .component_access_set
                .combined_access()
                .has_writes_all(),
            "&World in system {} conflicts with a previous exclusive access",
            system_meta.name
        );
        system_meta.component_access_set.read_all();
    }

    unsafe fn get_param<'w, 's>(
        _state: &'s mut Self::State,
        _system_meta: &SystemMeta,
        world: UnsafeWorldCell<'w>,
        _this_run: Tick,
    ) -> Self::Item<'w, 's> {
        // SAFETY: read-all access was declared
        world.world()
    }
}

unsafe impl<'w2> ReadOnlySystemParam for &'w2 World {}

// ----- tuples ---------------------------------------------------------------

macro_rules! impl_system_param_tuple {
    ($(#[$meta:meta])* $($param: ident),*) => {
        $(#[$meta])*
        unsafe impl<$($param: SystemParam),*> SystemParam for ($($param,)*) {
            type State = ($($param::State,)*);
            type Item<'w, 's> = ($($param::Item<'w, 's>,)*);

            #[allow(unused_variables, clippy::unused_unit)]
            fn init_state(world: &mut World, system_meta: &mut SystemMeta) -> Self::State {
                ($($param::init_state(world, system_meta),)*)
            }

            #[allow(unused_variables, non_snake_case, clippy::unused_unit)]
            unsafe fn get_param<'w, 's>(
                state: &'s mut Self::State,
                system_meta: &SystemMeta,
                world: UnsafeWorldCell<'w>,
                this_run: Tick,
            ) -> Self::Item<'w, 's> {
                let ($($param,)*) = state;
                ($($param::get_param($param, system_meta, world, this_run),)*)
            }

            #[allow(unused_variables, non_snake_case)]
            fn apply(state: &mut Self::State, world: &mut World) {
                let ($($param,)*) = state;
                $($param::apply($param, world);)*
            }
        }

        $(#[$meta])*
        unsafe impl<$($param: ReadOnlySystemParam),*> ReadOnlySystemParam for ($($param,)*) {}
    };
}

all_tuples!(impl_system_param_tuple, 0, 16, P);
