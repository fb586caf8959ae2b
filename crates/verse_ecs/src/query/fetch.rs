//! Query data terms: what a query yields per matching row.

use super::{QueryTerm, TermKind};
use crate::access::FilteredAccess;
use crate::archetype::ArchetypeId;
use crate::change_detection::Mut;
use crate::component::{Component, ComponentId};
use crate::entity::Entity;
use crate::tick::{ComponentTicks, Tick};
use crate::world::{UnsafeWorldCell, World};
use std::marker::PhantomData;
use variadics_please::all_tuples;

/// A type that can be fetched from matching rows: `Entity`, `&T`, `&mut T`,
/// `Option<_>` of those, and tuples thereof.
///
/// # Safety
/// `update_component_access` must declare every component the implementation
/// reads or writes in `fetch`, with the correct mutability.
pub unsafe trait QueryData {
    /// The value yielded per row.
    type Item<'w>;
    /// Per-chunk cursor state: raw column pointers advanced in lock-step
    /// with the tick arrays.
    type Fetch<'w>;
    /// World-independent identity of this term (registered component ids).
    type State: Send + Sync + Clone + 'static;

    fn init_state(world: &mut World) -> Self::State;

    /// Appends this term's canonical form.
    fn collect_terms(state: &Self::State, terms: &mut Vec<QueryTerm>);

    fn update_component_access(state: &Self::State, access: &mut FilteredAccess);

    /// Prepares per-chunk pointers.
    ///
    /// # Safety
    /// The caller must hold the declared access for this chunk's columns and
    /// keep the chunk alive and un-moved for `'w` (chunks never reallocate).
    unsafe fn init_fetch<'w>(
        world: UnsafeWorldCell<'w>,
        state: &Self::State,
        archetype: ArchetypeId,
        chunk: usize,
        last_run: Tick,
        this_run: Tick,
    ) -> Self::Fetch<'w>;

    /// Yields the item for `row`.
    ///
    /// # Safety
    /// `row` must be in bounds for the chunk `fetch` was initialized with,
    /// and each row may be fetched at most once per pass for write terms.
    unsafe fn fetch<'w>(fetch: &mut Self::Fetch<'w>, entity: Entity, row: usize) -> Self::Item<'w>;
}

/// Marker for [`QueryData`] implementations that never write.
///
/// # Safety
/// The implementation must not declare or perform any write access.
pub unsafe trait ReadOnlyQueryData: QueryData {}

// `Entity` yields the row's entity id.
unsafe impl QueryData for Entity {
    type Item<'w> = Entity;
    type Fetch<'w> = ();
    type State = ();

    fn init_state(_world: &mut World) -> Self::State {}

    fn collect_terms(_state: &Self::State, _terms: &mut Vec<QueryTerm>) {}

    fn update_component_access(_state: &Self::State, _access: &mut FilteredAccess) {}

    unsafe fn init_fetch<'w>(
        _world: UnsafeWorldCell<'w>,
        _state: &Self::State,
        _archetype: ArchetypeId,
        _chunk: usize,
        _last_run: Tick,
        _this_run: Tick,
    ) -> Self::Fetch<'w> {
    }

    unsafe fn fetch<'w>(_fetch: &mut Self::Fetch<'w>, entity: Entity, _row: usize) -> Self::Item<'w> {
        entity
    }
}

unsafe impl ReadOnlyQueryData for Entity {}

unsafe impl<T: Component> QueryData for &T {
    type Item<'w> = &'w T;
    type Fetch<'w> = &'w [T];
    type State = ComponentId;

    fn init_state(world: &mut World) -> Self::State {
        world.register_component::<T>()
    }

    fn collect_terms(state: &Self::State, terms: &mut Vec<QueryTerm>) {
        terms.push(QueryTerm {
            component: *state,
            kind: TermKind::Read,
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
        _last_run: Tick,
        _this_run: Tick,
    ) -> Self::Fetch<'w> {
        // SAFETY: read access to this column was declared by the caller
        let world = world.world();
        let archetype = world
            .archetypes()
            .get(archetype)
            .expect("matched archetype exists");
        let position = archetype
            .column_position(*state)
            .expect("matched archetype contains the queried component");
        &archetype.chunks[chunk].columns[position].typed::<T>().values
    }

    unsafe fn fetch<'w>(fetch: &mut Self::Fetch<'w>, _entity: Entity, row: usize) -> &'w T {
        &fetch[row]
    }
}

unsafe impl<T: Component> ReadOnlyQueryData for &T {}

/// Per-chunk cursor of a mutable component column: value and tick pointers
/// advanced together.
pub struct WriteFetch<'w, T> {
    values: *mut T,
    ticks: *mut ComponentTicks,
    last_run: Tick,
    this_run: Tick,
    marker: PhantomData<&'w mut T>,
}

unsafe impl<T: Component> QueryData for &mut T {
    type Item<'w> = Mut<'w, T>;
    type Fetch<'w> = WriteFetch<'w, T>;
    type State = ComponentId;

    fn init_state(world: &mut World) -> Self::State {
        world.register_component::<T>()
    }

    fn collect_terms(state: &Self::State, terms: &mut Vec<QueryTerm>) {
        terms.push(QueryTerm {
            component: *state,
            kind: TermKind::Write,
        });
    }

    fn update_component_access(state: &Self::State, access: &mut FilteredAccess) {
        access.add_write(*state);
    }

    unsafe fn init_fetch<'w>(
        world: UnsafeWorldCell<'w>,
        state: &Self::State,
        archetype: ArchetypeId,
        chunk: usize,
        last_run: Tick,
        this_run: Tick,
    ) -> Self::Fetch<'w> {
        // SAFETY: write access to this column was declared by the caller and
        // the executor admits no conflicting system concurrently
        let world = world.world_mut();
        let archetype = world.archetypes.get_mut(archetype);
        let position = archetype
            .column_position(*state)
            .expect("matched archetype contains the queried component");
        let column = &mut archetype.chunks[chunk].columns[position];
        WriteFetch {
            values: column.typed_mut::<T>().values.as_mut_ptr(),
            ticks: column.ticks.as_mut_ptr(),
            last_run,
            this_run,
            marker: PhantomData,
        }
    }

    unsafe fn fetch<'w>(fetch: &mut Self::Fetch<'w>, _entity: Entity, row: usize) -> Mut<'w, T> {
        // SAFETY: each row is fetched at most once per pass, so the returned
        // borrows never alias
        Mut::new(
            &mut *fetch.values.add(row),
            &mut *fetch.ticks.add(row),
            fetch.last_run,
            fetch.this_run,
        )
    }
}

unsafe impl<D: QueryData> QueryData for Option<D> {
    type Item<'w> = Option<D::Item<'w>>;
    type Fetch<'w> = Option<D::Fetch<'w>>;
    type State = D::State;

    fn init_state(world: &mut World) -> Self::State {
        D::init_state(world)
    }

    fn collect_terms(state: &Self::State, terms: &mut Vec<QueryTerm>) {
        let mut inner = Vec::new();
        D::collect_terms(state, &mut inner);
        terms.extend(inner.into_iter().map(|term| QueryTerm {
            component: term.component,
            kind: term.kind.into_optional(),
        }));
    }

    fn update_component_access(state: &Self::State, access: &mut FilteredAccess) {
        // the inner access applies, but the presence requirement and the
        // `with` conjunct do not
        let mut inner = FilteredAccess::default();
        D::update_component_access(state, &mut inner);
        access.access_mut().extend(inner.access());
    }

    unsafe fn init_fetch<'w>(
        world: UnsafeWorldCell<'w>,
        state: &Self::State,
        archetype: ArchetypeId,
        chunk: usize,
        last_run: Tick,
        this_run: Tick,
    ) -> Self::Fetch<'w> {
        // SAFETY: forwarded caller contract
        let contains = {
            let world = world.world();
            let archetype = world
                .archetypes()
                .get(archetype)
                .expect("matched archetype exists");
            let mut inner_terms = Vec::new();
            D::collect_terms(state, &mut inner_terms);
            inner_terms
                .iter()
                .all(|term| archetype.contains(term.component))
        };
        // SAFETY: forwards the caller's contract
        contains.then(|| unsafe { D::init_fetch(world, state, archetype, chunk, last_run, this_run) })
    }

    unsafe fn fetch<'w>(
        fetch: &mut Self::Fetch<'w>,
        entity: Entity,
        row: usize,
    ) -> Self::Item<'w> {
        // SAFETY: forwards the caller's contract
        fetch
            .as_mut()
            .map(|inner| unsafe { D::fetch(inner, entity, row) })
    }
}

unsafe impl<D: ReadOnlyQueryData> ReadOnlyQueryData for Option<D> {}

macro_rules! impl_tuple_query_data {
    ($(#[$meta:meta])* $(($name:ident, $state:ident)),*) => {
        $(#[$meta])*
        unsafe impl<$($name: QueryData),*> QueryData for ($($name,)*) {
            type Item<'w> = ($($name::Item<'w>,)*);
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

            #[allow(unused_variables, non_snake_case, clippy::unused_unit)]
            unsafe fn fetch<'w>(
                fetch: &mut Self::Fetch<'w>,
                entity: Entity,
                row: usize,
            ) -> Self::Item<'w> {
                let ($($name,)*) = fetch;
                ($($name::fetch($name, entity, row),)*)
            }
        }

        $(#[$meta])*
        unsafe impl<$($name: ReadOnlyQueryData),*> ReadOnlyQueryData for ($($name,)*) {}
    };
}

all_tuples!(impl_tuple_query_data, 0, 12, D, S);
