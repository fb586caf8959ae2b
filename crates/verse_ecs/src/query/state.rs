//! Query state, iteration and the system-facing [`Query`] view.

use super::{
    matches_archetype, CachedMatches, QueryData, QueryEntityError, QueryFilter, QuerySingleError,
    QueryTerm, ReadOnlyQueryData, TermKind,
};
use crate::access::FilteredAccess;
use crate::entity::Entity;
use crate::tick::Tick;
use crate::world::{UnsafeWorldCell, World};
use parking_lot::{RwLock, RwLockReadGuard};
use std::marker::PhantomData;
use std::sync::Arc;

/// Compiled form of a query: its canonical terms, declared access, typed
/// term state, and a handle to the shared match cache.
pub struct QueryState<D: QueryData, F: QueryFilter = ()> {
    terms: Box<[QueryTerm]>,
    component_access: FilteredAccess,
    cache: Arc<RwLock<CachedMatches>>,
    data_state: D::State,
    filter_state: F::State,
    marker: PhantomData<fn() -> (D, F)>,
}

impl<D: QueryData, F: QueryFilter> QueryState<D, F> {
    pub fn new(world: &mut World) -> Self {
        let data_state = D::init_state(world);
        let filter_state = F::init_state(world);

        let mut data_terms = Vec::new();
        D::collect_terms(&data_state, &mut data_terms);
        assert_no_aliasing(&data_terms);

        let mut terms = data_terms;
        F::collect_terms(&filter_state, &mut terms);
        terms.sort_unstable();
        terms.dedup();
        let terms: Box<[QueryTerm]> = terms.into();

        let mut component_access = FilteredAccess::default();
        D::update_component_access(&data_state, &mut component_access);
        F::update_component_access(&filter_state, &mut component_access);

        let cache = world.query_caches.get_or_create(&terms);
        Self {
            terms,
            component_access,
            cache,
            data_state,
            filter_state,
            marker: PhantomData,
        }
    }

    /// The canonical sorted term list.
    pub fn terms(&self) -> &[QueryTerm] {
        &self.terms
    }

    pub fn component_access(&self) -> &FilteredAccess {
        &self.component_access
    }

    /// Refreshes the shared match cache if archetypes were created since it
    /// was last brought up to date.
    pub fn update_archetypes(&self, world: &World) {
        let generation = world.archetypes().generation();
        if self.cache.read().seen == generation {
            return;
        }
        let mut cache = self.cache.write();
        if cache.seen != generation {
            cache.matched = super::match_archetypes(&self.terms, world.archetypes());
            cache.seen = generation;
        }
    }

    /// Read-only iteration directly against a world.
    pub fn iter<'w, 's>(&'s self, world: &'w World) -> QueryIter<'w, 's, D, F>
    where
        D: ReadOnlyQueryData,
    {
        self.update_archetypes(world);
        let (last_run, this_run) = (world.last_change_tick(), world.change_tick());
        // SAFETY: a read-only query over a shared world borrow
        unsafe { self.iter_unchecked_manual(UnsafeWorldCell::new_readonly(world), last_run, this_run) }
    }

    /// Mutable iteration directly against a world.
    pub fn iter_mut<'w, 's>(&'s mut self, world: &'w mut World) -> QueryIter<'w, 's, D, F> {
        self.update_archetypes(world);
        let (last_run, this_run) = (world.last_change_tick(), world.change_tick());
        // SAFETY: exclusive world borrow
        unsafe { self.iter_unchecked_manual(UnsafeWorldCell::new(world), last_run, this_run) }
    }

    /// # Safety
    /// The caller must guarantee the declared access of this query is safe to
    /// exercise through `world` for the duration of the iteration.
    pub(crate) unsafe fn iter_unchecked_manual<'w, 's>(
        &'s self,
        world: UnsafeWorldCell<'w>,
        last_run: Tick,
        this_run: Tick,
    ) -> QueryIter<'w, 's, D, F> {
        QueryIter {
            world,
            state: self,
            matches: self.cache.read(),
            archetype_cursor: 0,
            chunk_cursor: 0,
            row: 0,
            chunk_len: 0,
            entities: &[],
            data_fetch: None,
            filter_fetch: None,
            last_run,
            this_run,
        }
    }

    /// # Safety
    /// Same contract as [`QueryState::iter_unchecked_manual`].
    pub(crate) unsafe fn get_unchecked_manual<'w>(
        &self,
        world: UnsafeWorldCell<'w>,
        entity: Entity,
        last_run: Tick,
        this_run: Tick,
    ) -> Result<D::Item<'w>, QueryEntityError> {
        let (archetype_id, chunk, row) = {
            let world_ref = world.world();
            let location = world_ref
                .entities()
                .get(entity)
                .ok_or(QueryEntityError::NoSuchEntity)?;
            let archetype = world_ref
                .archetypes()
                .get(location.archetype)
                .expect("entity record points at a live archetype");
            if !matches_archetype(&self.terms, archetype) {
                return Err(QueryEntityError::QueryDoesNotMatch);
            }
            (location.archetype, location.chunk, location.row)
        };
        let mut filter_fetch = F::init_fetch(
            world,
            &self.filter_state,
            archetype_id,
            chunk,
            last_run,
            this_run,
        );
        if !F::filter_fetch(&mut filter_fetch, entity, row) {
            return Err(QueryEntityError::QueryDoesNotMatch);
        }
        let mut data_fetch = D::init_fetch(
            world,
            &self.data_state,
            archetype_id,
            chunk,
            last_run,
            this_run,
        );
        Ok(D::fetch(&mut data_fetch, entity, row))
    }

    /// Fetches one entity's item directly against a world.
    pub fn get_mut<'w>(
        &mut self,
        world: &'w mut World,
        entity: Entity,
    ) -> Result<D::Item<'w>, QueryEntityError> {
        self.update_archetypes(world);
        let (last_run, this_run) = (world.last_change_tick(), world.change_tick());
        // SAFETY: exclusive world borrow
        unsafe { self.get_unchecked_manual(UnsafeWorldCell::new(world), entity, last_run, this_run) }
    }

    /// The single matching item; errors when there are zero or several.
    pub fn single_mut<'w>(&mut self, world: &'w mut World) -> Result<D::Item<'w>, QuerySingleError> {
        self.update_archetypes(world);
        let (last_run, this_run) = (world.last_change_tick(), world.change_tick());
        // SAFETY: exclusive world borrow
        let mut iter =
            unsafe { self.iter_unchecked_manual(UnsafeWorldCell::new(world), last_run, this_run) };
        let first = iter.next().ok_or(QuerySingleError::NoEntities)?;
        if iter.next().is_some() {
            return Err(QuerySingleError::MultipleEntities);
        }
        Ok(first)
    }
}

/// Panics if the data terms alias a component mutably.
fn assert_no_aliasing(data_terms: &[QueryTerm]) {
    for (index, term) in data_terms.iter().enumerate() {
        let writes = matches!(term.kind, TermKind::Write | TermKind::OptionalWrite);
        for other in &data_terms[index + 1..] {
            if other.component != term.component {
                continue;
            }
            let other_writes = matches!(other.kind, TermKind::Write | TermKind::OptionalWrite);
            let other_accesses = other_writes
                || matches!(other.kind, TermKind::Read | TermKind::OptionalRead);
            let accesses =
                writes || matches!(term.kind, TermKind::Read | TermKind::OptionalRead);
            if (writes && other_accesses) || (other_writes && accesses) {
                panic!(
                    "query data accesses {:?} mutably while also accessing it elsewhere in the same query",
                    term.component
                );
            }
        }
    }
}

/// A forward pass over all matching rows, chunk by chunk. Data and filter
/// cursors advance in lock-step; only rows passing the filter are yielded.
pub struct QueryIter<'w, 's, D: QueryData, F: QueryFilter> {
    world: UnsafeWorldCell<'w>,
    state: &'s QueryState<D, F>,
    matches: RwLockReadGuard<'s, CachedMatches>,
    archetype_cursor: usize,
    chunk_cursor: usize,
    row: usize,
    chunk_len: usize,
    entities: &'w [Entity],
    data_fetch: Option<D::Fetch<'w>>,
    filter_fetch: Option<F::Fetch<'w>>,
    last_run: Tick,
    this_run: Tick,
}

impl<'w, 's, D: QueryData, F: QueryFilter> QueryIter<'w, 's, D, F> {
    /// Moves the cursors to the next non-empty chunk. Returns `false` when
    /// the matched archetypes are exhausted.
    fn advance_chunk(&mut self) -> bool {
        loop {
            let Some(&archetype_id) = self.matches.matched.get(self.archetype_cursor) else {
                return false;
            };
            // SAFETY: reading archetype metadata is covered by any query
            let archetype = unsafe { self.world.world() }
                .archetypes()
                .get(archetype_id)
                .expect("matched archetype exists");
            if self.chunk_cursor >= archetype.chunks.len() {
                self.archetype_cursor += 1;
                self.chunk_cursor = 0;
                continue;
            }
            let chunk_index = self.chunk_cursor;
            self.chunk_cursor += 1;
            let chunk = &archetype.chunks[chunk_index];
            if chunk.len() == 0 {
                continue;
            }
            self.chunk_len = chunk.len();
            self.row = 0;
            self.entities = &chunk.entities;
            // SAFETY: the query declared its access; the chunk stays valid
            // for 'w because chunk storage never reallocates
            unsafe {
                self.data_fetch = Some(D::init_fetch(
                    self.world,
                    &self.state.data_state,
                    archetype_id,
                    chunk_index,
                    self.last_run,
                    self.this_run,
                ));
                self.filter_fetch = Some(F::init_fetch(
                    self.world,
                    &self.state.filter_state,
                    archetype_id,
                    chunk_index,
                    self.last_run,
                    self.this_run,
                ));
            }
            return true;
        }
    }
}

impl<'w, 's, D: QueryData, F: QueryFilter> Iterator for QueryIter<'w, 's, D, F> {
    type Item = D::Item<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.data_fetch.is_none() || self.row >= self.chunk_len {
                if !self.advance_chunk() {
                    return None;
                }
            }
            while self.row < self.chunk_len {
                let row = self.row;
                self.row += 1;
                let entity = self.entities[row];
                // SAFETY: row is in bounds and visited exactly once
                unsafe {
                    let filter = self.filter_fetch.as_mut().expect("chunk cursors initialized");
                    if !F::filter_fetch(filter, entity, row) {
                        continue;
                    }
                    let data = self.data_fetch.as_mut().expect("chunk cursors initialized");
                    return Some(D::fetch(data, entity, row));
                }
            }
        }
    }
}

/// The system-facing view of a query. Carries the running system's change
/// window so `Added`/`Changed` filters and `Mut` write stamps use the right
/// ticks.
pub struct Query<'w, 's, D: QueryData, F: QueryFilter = ()> {
    world: UnsafeWorldCell<'w>,
    state: &'s QueryState<D, F>,
    last_run: Tick,
    this_run: Tick,
}

impl<'w, 's, D: QueryData, F: QueryFilter> Query<'w, 's, D, F> {
    /// # Safety
    /// The caller (the system executor) must guarantee the query's declared
    /// access is safe to exercise through `world`.
    pub(crate) unsafe fn new(
        world: UnsafeWorldCell<'w>,
        state: &'s QueryState<D, F>,
        last_run: Tick,
        this_run: Tick,
    ) -> Self {
        Self {
            world,
            state,
            last_run,
            this_run,
        }
    }

    /// Iterates matching rows read-only.
    pub fn iter(&self) -> QueryIter<'_, 's, D, F>
    where
        D: ReadOnlyQueryData,
    {
        // SAFETY: read-only items; declared access covers the reads
        unsafe {
            self.state
                .iter_unchecked_manual(self.world, self.last_run, self.this_run)
        }
    }

    /// Iterates matching rows, allowing mutation through `Mut` items.
    pub fn iter_mut(&mut self) -> QueryIter<'_, 's, D, F> {
        // SAFETY: &mut self prevents a second live iterator over this data
        unsafe {
            self.state
                .iter_unchecked_manual(self.world, self.last_run, self.this_run)
        }
    }

    /// Fetches one entity's item, short-circuiting to its archetype.
    pub fn get(&mut self, entity: Entity) -> Result<D::Item<'_>, QueryEntityError> {
        // SAFETY: &mut self; declared access covers the fetch
        unsafe {
            self.state
                .get_unchecked_manual(self.world, entity, self.last_run, self.this_run)
        }
    }

    /// The single matching item; errors when there are zero or several.
    pub fn single(&mut self) -> Result<D::Item<'_>, QuerySingleError> {
        let mut iter = self.iter_mut();
        let first = iter.next().ok_or(QuerySingleError::NoEntities)?;
        if iter.next().is_some() {
            return Err(QuerySingleError::MultipleEntities);
        }
        Ok(first)
    }

    /// Number of rows the query currently matches.
    pub fn count(&mut self) -> usize {
        self.iter_mut().count()
    }

    pub fn is_empty(&mut self) -> bool {
        self.iter_mut().next().is_none()
    }

    /// `true` if `entity` would be yielded by this query.
    pub fn contains(&mut self, entity: Entity) -> bool {
        self.get(entity).is_ok()
    }
}
