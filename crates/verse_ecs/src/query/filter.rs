//! Query filter terms: which rows a query yields.

use super::{QueryTerm, TermKind};
use crate::access::FilteredAccess;
use crate::archetype::ArchetypeId;
use crate::component::{Component, ComponentId};
use crate::entity::Entity;
use crate::tick::{ComponentTicks, Tick};
use crate::world::{UnsafeWorldCell, World};
use std::marker::PhantomData;
use variadics_please::all_tuples;

/// A filter over query rows. Archetype-level filters (`With`, `Without`)
/// participate only in matching; tick filters (`Added`, `Changed`) and
/// [`MarkChanged`] also run per row, advancing in lock-step with the data
/// columns.
///
/// # Safety
/// `update_component_access` must declare everything `filter_fetch` touches.
pub unsafe trait QueryFilter {
    type Fetch<'w>;
    type State: Send + Sync + Clone + 'static;

    fn init_state(world: &mut World) -> Self::State;

    fn collect_terms(state: &Self::State, terms: &mut Vec<QueryTerm>);

    fn update_component_access(state: &Self::State, access: &mut FilteredAccess);

    /// # Safety
    /// Same contract as [`QueryData::init_fetch`](super::QueryData::init_fetch).
    unsafe fn init_fetch<'w>(
        world: UnsafeWorldCell<'w>,
        state: &Self::State,
        archetype: ArchetypeId,
        chunk: usize,
        last_run: Tick,
        this_run: Tick,
    ) -> Self::Fetch<'w>;

    /// Returns `true` if the row passes the filter.
    ///
    /// # Safety
    /// `row` must be in bounds for the chunk `fetch` was initialized with.
    unsafe fn filter_fetch(fetch: &mut Self::Fetch<'_>, entity: Entity, row: usize) -> bool;
}

/// Matches archetypes that contain `T`, without accessing it.
pub struct With<T>(PhantomData<T>);

unsafe impl<T: Component> QueryFilter for With<T> {
    type Fetch<'w> = ();
    type State = ComponentId;

    fn init_state(world: &mut World) -> Self::State {
        world.register_component::<T>()
    }

    fn collect_terms(state: &Self::State, terms: &mut Vec<QueryTerm>) {
        terms.push(QueryTerm {
            component: *state,
            kind: TermKind::With,
        });
    }

    fn update_component_access(state: &Self::State, access: &mut FilteredAccess) {
        access.and_with(*state);
    }

    unsafe fn init_fetch<'w>(
        _world: UnsafeWorldCell<'w>,
        _state: &Self::State,
        _archetype: ArchetypeId,
        _chunk: usize,
        _last_run: Tick,
        _this_run: Tick,
    ) -> Self::Fetch<'w> {
    }

    unsafe fn filter_fetch(_fetch: &mut Self::Fetch<'_>, _entity: Entity, _row: usize) -> bool {
        true
    }
}

/// Matches archetypes that do not contain `T`. Stops graph traversal at the
/// first archetype containing `T`.
pub struct Without<T>(PhantomData<T>);

unsafe impl<T: Component> QueryFilter for Without<T> {
    type Fetch<'w> = ();
    type State = ComponentId;

    fn init_state(world: &mut World) -> Self::State {
        world.register_component::<T>()
    }

    fn collect_terms(state: &Self::State, terms: &mut Vec<QueryTerm>) {
        terms.push(QueryTerm {
            component: *state,
            kind: TermKind::Without,
        });
    }

    fn update_component_access(state: &Self::State, access: &mut FilteredAccess) {
        access.and_without(*state);
    }

    unsafe fn init_fetch<'w>(
        _world: UnsafeWorldCell<'w>,
        _state: &Self::State,
        _archetype: ArchetypeId,
        _chunk: usize,
        _last_run: Tick,
        _this_run: Tick,
    ) -> Self::Fetch<'w> {
    }

    unsafe fn filter_fetch(_fetch: &mut Self::Fetch<'_>, _entity: Entity, _row: usize) -> bool {
        true
    }
}

/// Per-chunk cursor over a tick column, read-only.
pub struct TickFetch<'w> {
    ticks: &'w [ComponentTicks],
    last_run: Tick,
    this_run: Tick,
}

/// SAFETY: reads the component's tick column only; declares a read.
unsafe fn init_tick_fetch<'w>(
    world: UnsafeWorldCell<'w>,
    state: &ComponentId,
    archetype: ArchetypeId,
    chunk: usize,
    last_run: Tick,
    this_run: Tick,
) -> TickFetch<'w> {
    let world = world.world();
    let archetype = world
        .archetypes()
        .get(archetype)
        .expect("matched archetype exists");
    let position = archetype
        .column_position(*state)
        .expect("matched archetype contains the filtered component");
    TickFetch {
        ticks: &archetype.chunks[chunk].columns[position].ticks,
        last_run,
        this_run,
    }
}

/// Yields only rows whose `T` was added after the system's last run.
pub struct Added<T>(PhantomData<T>);

unsafe impl<T: Component> QueryFilter for Added<T> {
    type Fetch<'w> = TickFetch<'w>;
    type State = ComponentId;

    fn init_state(world: &mut World) -> Self::State {
        world.register_component::<T>()
    }

    fn collect_terms(state: &Self::State, terms: &mut Vec<QueryTerm>) {
        terms.push(QueryTerm {
            component: *state,
            kind: TermKind::Added,
        });
    }

    fn update_component_access(state: &Self::State, access: &mut FilteredAccess) {
        access.add_read(*state);
    }

    unsafe fn init_fetch<'w>(
        world: UnsafeWorldCell<'w>,
        state: &Self::State,
        archetype: ArchetypeId,
        chunk: usize,
        last_run: Tick,
        this_run: Tick,
    ) -> Self::Fetch<'w> {
        init_tick_fetch(world, state, archetype, chunk, last_run, this_run)
    }

    unsafe fn filter_fetch(fetch: &mut Self::Fetch<'_>, _entity: Entity, row: usize) -> bool {
        fetch.ticks[row].is_added(fetch.last_run, fetch.this_run)
    }
}

/// Yields only rows whose `T` was written after the system's last run.
pub struct Changed<T>(PhantomData<T>);

unsafe impl<T: Component> QueryFilter for Changed<T> {
    type Fetch<'w> = TickFetch<'w>;
    type State = ComponentId;

    fn init_state(world: &mut World) -> Self::State {
        world.register_component::<T>()
    }

    fn collect_terms(state: &Self::State, terms: &mut Vec<QueryTerm>) {
        terms.push(QueryTerm {
            component: *state,
            kind: TermKind::Changed,
        });
    }

    fn update_component_access(state: &Self::State, access: &mut FilteredAccess) {
        access.add_read(*state);
    }

    unsafe fn init_fetch<'w>(
        world: UnsafeWorldCell<'w>,
        state: &Self::State,
        archetype: ArchetypeId,
        chunk: usize,
        last_run: Tick,
        this_run: Tick,
    ) -> Self::Fetch<'w> {
        init_tick_fetch(world, state, archetype, chunk, last_run, this_run)
    }

    unsafe fn filter_fetch(fetch: &mut Self::Fetch<'_>, _entity: Entity, row: usize) -> bool {
        fetch.ticks[row].is_changed(fetch.last_run, fetch.this_run)
    }
}

/// Matches every row of archetypes containing `T`, stamping the current tick
/// into each visited row's changed tick.
pub struct MarkChanged<T>(PhantomData<T>);

/// Per-chunk mutable cursor over a tick column.
pub struct MarkChangedFetch<'w> {
    ticks: *mut ComponentTicks,
    this_run: Tick,
    marker: PhantomData<&'w mut ComponentTicks>,
}

unsafe impl<T: Component> QueryFilter for MarkChanged<T> {
    type Fetch<'w> = MarkChangedFetch<'w>;
    type State = ComponentId;

    fn init_state(world: &mut World) -> Self::State {
        world.register_component::<T>()
    }

    fn collect_terms(state: &Self::State, terms: &mut Vec<QueryTerm>) {
        terms.push(QueryTerm {
            component: *state,
            kind: TermKind::MarkChanged,
        });
    }

    fn update_component_access(state: &Self::State, access: &mut FilteredAccess) {
        // stamping ticks is a write as far as scheduling is concerned
        access.add_write(*state);
    }

    unsafe fn init_fetch<'w>(
        world: UnsafeWorldCell<'w>,
        state: &Self::State,
        archetype: ArchetypeId,
        chunk: usize,
        _last_run: Tick,
        this_run: Tick,
    ) -> Self::Fetch<'w> {
        // SAFETY: write access was declared; no conflicting system runs
        let world = world.world_mut();
        let archetype = world.archetypes.get_mut(archetype);
        let position = archetype
            .column_position(*state)
            .expect("matched archetype contains the filtered component");
        MarkChangedFetch {
            ticks: archetype.chunks[chunk].columns[position].ticks.as_mut_ptr(),
            this_run,
            marker: PhantomData,
        }
    }

    unsafe fn filter_fetch(fetch: &mut Self::Fetch<'_>, _entity: Entity, row: usize) -> bool {
        (*fetch.ticks.add(row)).set_changed(fetch.this_run);
        true
    }
}

macro_rules! impl_tuple_query_filter {
    ($(#[$meta:meta])* $(($name:ident, $state:ident)),*) => {
        $(#[$meta])*
        unsafe impl<$($name: QueryFilter),*> QueryFilter for ($($name,)*) {
            type Fetch<'w> = ($($name::Fetch<'w>,)*);
            type State = ($($name::State,)*);

            #[allow(unused_variables, clippy::unused_unit)]
            fn init_state(world: &mut World) -> Self::State {
                ($($name::init_state(world),)*)
            }

            #[allow(unused_variables, non_snake_case)]
            fn collect_terms(state: &Self::State, terms: &mut Vec<QueryTerm>) {
                let ($($state,)*) = state;
                $($name::collect_terms($state, terms);)*
            }

            #[allow(unused_variables, non_snake_case)]
            fn update_component_access(state: &Self::State, access: &mut FilteredAccess) {
                let ($($state,)*) = state;
                $($name::update_component_access($state, access);)*
            }

            #[allow(unused_variables, non_snake_case, clippy::unused_unit)]
            unsafe fn init_fetch<'w>(
                world: UnsafeWorldCell<'w>,
                state: &Self::State,
                archetype: ArchetypeId,
                chunk: usize,
                last_run: Tick,
                this_run: Tick,
            ) -> Self::Fetch<'w> {
                let ($($state,)*) = state;
                ($($name::init_fetch(world, $state, archetype, chunk, last_run, this_run),)*)
            }

            #[allow(unused_variables, non_snake_case)]
            unsafe fn filter_fetch(fetch: &mut Self::Fetch<'_>, entity: Entity, row: usize) -> bool {
                let ($($name,)*) = fetch;
                true $(&& $name::filter_fetch($name, entity, row))*
            }
        }
    };
}

all_tuples!(impl_tuple_query_filter, 0, 12, F, S);
