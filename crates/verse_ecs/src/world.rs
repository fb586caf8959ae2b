//! The world: entities, their components, and resources.

use crate::archetype::{ArchetypeId, Archetypes};
use crate::change_detection::Mut;
use crate::component::{Component, ComponentId, Components};
use crate::entity::{Entities, Entity, EntityLocation};
use crate::query::{QueryCaches, QueryData, QueryFilter, QueryState};
use crate::resource::{FromWorld, Resource, ResourceEntry, Resources};
use crate::tick::{ComponentTicks, Tick, CHECK_TICK_THRESHOLD};
use std::any::type_name;
use std::marker::PhantomData;

/// Stores all entities, components and resources, and hands out the access
/// primitives systems and queries are built from.
#[derive(Default)]
pub struct World {
    pub(crate) entities: Entities,
    pub(crate) components: Components,
    pub(crate) archetypes: Archetypes,
    pub(crate) resources: Resources,
    pub(crate) query_caches: QueryCaches,
    change_tick: Tick,
    last_change_tick: Tick,
    last_check_tick: Tick,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn entities(&self) -> &Entities {
        &self.entities
    }

    #[inline]
    pub fn components(&self) -> &Components {
        &self.components
    }

    #[inline]
    pub fn archetypes(&self) -> &Archetypes {
        &self.archetypes
    }

    /// The shared query match caches.
    #[inline]
    pub fn query_caches(&self) -> &QueryCaches {
        &self.query_caches
    }

    /// The tick all writes are currently stamped with.
    #[inline]
    pub fn change_tick(&self) -> Tick {
        self.change_tick
    }

    /// The tick the previous advance happened at; direct world access uses
    /// `(last_change_tick, change_tick)` as its change-detection window.
    #[inline]
    pub fn last_change_tick(&self) -> Tick {
        self.last_change_tick
    }

    /// Advances the world tick. Called exactly once per schedule run, at the
    /// tick boundary, so all systems in the run observe the same tick.
    pub fn increment_change_tick(&mut self) -> Tick {
        self.last_change_tick = self.change_tick;
        self.change_tick = Tick::new(self.change_tick.get().wrapping_add(1));
        self.change_tick
    }

    /// Rebases all stored ticks once the tick counter has advanced far enough
    /// that ages could alias under wrapping arithmetic. Requires `&mut self`:
    /// no system may hold a tick while stored ticks move.
    pub fn check_change_ticks(&mut self) {
        let age = self.change_tick.relative_to(self.last_check_tick);
        if age.get() < CHECK_TICK_THRESHOLD {
            return;
        }
        let current = self.change_tick;
        self.archetypes.check_ticks(current);
        self.resources.check_ticks(current);
        if self.contains_resource::<crate::schedule::Schedules>() {
            self.resource_scope(|_world, mut schedules: Mut<crate::schedule::Schedules>| {
                schedules.check_change_ticks(current);
            });
        }
        self.last_check_tick = current;
    }

    // ----- entities ---------------------------------------------------------

    /// Creates a new empty entity and returns a builder for it.
    pub fn spawn_empty(&mut self) -> EntityWorldMut<'_> {
        let entity = self.entities.alloc();
        let archetype = self.archetypes.get_mut(ArchetypeId::EMPTY);
        let chunk_index = archetype.chunk_with_room();
        let chunk = &mut archetype.chunks[chunk_index];
        chunk.entities.push(entity);
        let row = chunk.entities.len() - 1;
        self.entities.set_location(
            entity,
            EntityLocation {
                archetype: ArchetypeId::EMPTY,
                chunk: chunk_index,
                row,
            },
        );
        EntityWorldMut { world: self, entity }
    }

    /// Alias for [`World::spawn_empty`]; components are attached through the
    /// returned builder.
    pub fn spawn(&mut self) -> EntityWorldMut<'_> {
        self.spawn_empty()
    }

    /// `true` if `entity` is live.
    #[inline]
    pub fn contains_entity(&self, entity: Entity) -> bool {
        self.entities.contains(entity)
    }

    /// A builder for a live entity. Panics if the entity does not exist.
    pub fn entity_mut(&mut self, entity: Entity) -> EntityWorldMut<'_> {
        assert!(
            self.entities.contains(entity),
            "entity {entity:?} does not exist"
        );
        EntityWorldMut { world: self, entity }
    }

    /// Despawns an entity, dropping its components. Returns `false` for a
    /// stale handle.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        let Some(location) = self.entities.free(entity) else {
            return false;
        };
        let archetype = self.archetypes.get_mut(location.archetype);
        let moved = archetype.chunks[location.chunk].swap_remove(location.row);
        if let Some(moved) = moved {
            self.entities.set_location(moved, location);
        }
        true
    }

    // ----- components -------------------------------------------------------

    pub fn register_component<T: Component>(&mut self) -> ComponentId {
        self.components.register_component::<T>()
    }

    /// Attaches `value` to `entity`, moving it to the archetype extended with
    /// `T`. If the entity already has a `T` the value is replaced in place
    /// and its changed tick stamped.
    pub(crate) fn insert_component<T: Component>(&mut self, entity: Entity, value: T) -> bool {
        let Some(location) = self.entities.get(entity) else {
            return false;
        };
        let component_id = self.components.register_component::<T>();
        let change_tick = self.change_tick;

        let archetype = self.archetypes.get_mut(location.archetype);
        if let Some(position) = archetype.column_position(component_id) {
            let column = &mut archetype.chunks[location.chunk].columns[position];
            column.typed_mut::<T>().values[location.row] = value;
            column.ticks[location.row].set_changed(change_tick);
            return true;
        }

        let destination =
            self.archetypes
                .add_target(location.archetype, component_id, &self.components);
        let (source, target) = self.archetypes.get_2_mut(location.archetype, destination);
        let target_chunk_index = target.chunk_with_room();

        // plan the column mapping before touching the chunks
        let moves: Vec<(usize, usize)> = source
            .components()
            .iter()
            .enumerate()
            .map(|(source_position, &component)| {
                (
                    source_position,
                    target
                        .column_position(component)
                        .expect("destination archetype must be a superset"),
                )
            })
            .collect();
        let new_position = target
            .column_position(component_id)
            .expect("destination archetype must contain the attached component");

        let source_chunk = &mut source.chunks[location.chunk];
        let target_chunk = &mut target.chunks[target_chunk_index];
        for (source_position, target_position) in moves {
            let source_column = &mut source_chunk.columns[source_position];
            let target_column = &mut target_chunk.columns[target_position];
            source_column
                .data
                .swap_remove_into(location.row, &mut *target_column.data);
            let ticks = source_column.ticks.swap_remove(location.row);
            target_column.ticks.push(ticks);
        }
        let new_column = &mut target_chunk.columns[new_position];
        new_column.typed_mut::<T>().values.push(value);
        new_column.ticks.push(ComponentTicks::new(change_tick));

        source_chunk.entities.swap_remove(location.row);
        let moved = source_chunk.entities.get(location.row).copied();
        target_chunk.entities.push(entity);
        let target_row = target_chunk.entities.len() - 1;

        self.entities.set_location(
            entity,
            EntityLocation {
                archetype: destination,
                chunk: target_chunk_index,
                row: target_row,
            },
        );
        if let Some(moved) = moved {
            self.entities.set_location(moved, location);
        }
        true
    }

    /// Detaches `T` from `entity`, returning its value, and moves the entity
    /// to the archetype without `T`.
    pub(crate) fn remove_component<T: Component>(&mut self, entity: Entity) -> Option<T> {
        let location = self.entities.get(entity)?;
        let component_id = self.components.component_id::<T>()?;
        let archetype = self.archetypes.get(location.archetype)?;
        let removed_position = archetype.column_position(component_id)?;

        let destination =
            self.archetypes
                .remove_target(location.archetype, component_id, &self.components);
        let (source, target) = self.archetypes.get_2_mut(location.archetype, destination);
        let target_chunk_index = target.chunk_with_room();

        let moves: Vec<(usize, usize)> = source
            .components()
            .iter()
            .enumerate()
            .filter(|&(_, &component)| component != component_id)
            .map(|(source_position, &component)| {
                (
                    source_position,
                    target
                        .column_position(component)
                        .expect("destination archetype must keep the remaining components"),
                )
            })
            .collect();

        let source_chunk = &mut source.chunks[location.chunk];
        let target_chunk = &mut target.chunks[target_chunk_index];
        for (source_position, target_position) in moves {
            let source_column = &mut source_chunk.columns[source_position];
            let target_column = &mut target_chunk.columns[target_position];
            source_column
                .data
                .swap_remove_into(location.row, &mut *target_column.data);
            let ticks = source_column.ticks.swap_remove(location.row);
            target_column.ticks.push(ticks);
        }
        let removed_column = &mut source_chunk.columns[removed_position];
        let removed = removed_column
            .typed_mut::<T>()
            .values
            .swap_remove(location.row);
        removed_column.ticks.swap_remove(location.row);

        source_chunk.entities.swap_remove(location.row);
        let moved = source_chunk.entities.get(location.row).copied();
        target_chunk.entities.push(entity);
        let target_row = target_chunk.entities.len() - 1;

        self.entities.set_location(
            entity,
            EntityLocation {
                archetype: destination,
                chunk: target_chunk_index,
                row: target_row,
            },
        );
        if let Some(moved) = moved {
            self.entities.set_location(moved, location);
        }
        Some(removed)
    }

    /// A shared reference to `entity`'s `T`.
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        let location = self.entities.get(entity)?;
        let component_id = self.components.component_id::<T>()?;
        let archetype = self.archetypes.get(location.archetype)?;
        let position = archetype.column_position(component_id)?;
        let column = &archetype.chunks[location.chunk].columns[position];
        Some(&column.typed::<T>().values[location.row])
    }

    /// A change-tracked mutable reference to `entity`'s `T`.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<Mut<'_, T>> {
        let (last_run, this_run) = (self.last_change_tick, self.change_tick);
        let location = self.entities.get(entity)?;
        let component_id = self.components.component_id::<T>()?;
        let archetype = self.archetypes.get_mut(location.archetype);
        let position = archetype.column_position(component_id)?;
        let column = &mut archetype.chunks[location.chunk].columns[position];
        let crate::storage::ColumnEntry { data, ticks } = column;
        let values = &mut data
            .as_any_mut()
            .downcast_mut::<crate::storage::TypedColumn<T>>()?
            .values;
        Some(Mut::new(
            &mut values[location.row],
            &mut ticks[location.row],
            last_run,
            this_run,
        ))
    }

    /// Stamps the changed tick of `entity`'s `T` without touching the value.
    pub fn set_changed<T: Component>(&mut self, entity: Entity) -> bool {
        let Some(component_id) = self.components.component_id::<T>() else {
            return false;
        };
        self.set_changed_by_id(entity, component_id)
    }

    pub(crate) fn set_changed_by_id(&mut self, entity: Entity, component_id: ComponentId) -> bool {
        let change_tick = self.change_tick;
        let Some(location) = self.entities.get(entity) else {
            return false;
        };
        let archetype = self.archetypes.get_mut(location.archetype);
        let Some(position) = archetype.column_position(component_id) else {
            return false;
        };
        archetype.chunks[location.chunk].columns[position].ticks[location.row]
            .set_changed(change_tick);
        true
    }

    // ----- resources --------------------------------------------------------

    pub fn register_resource<T: Resource>(&mut self) -> ComponentId {
        self.components.register_resource::<T>()
    }

    /// Inserts a resource, replacing (and dropping) any previous value.
    pub fn insert_resource<T: Resource>(&mut self, value: T) {
        let id = self.components.register_resource::<T>();
        let change_tick = self.change_tick;
        self.resources.insert(id, Box::new(value), change_tick);
    }

    /// Inserts `T::from_world` if the resource is not present yet.
    pub fn init_resource<T: Resource + FromWorld>(&mut self) -> ComponentId {
        let id = self.components.register_resource::<T>();
        if !self.resources.contains(id) {
            let value = T::from_world(self);
            let change_tick = self.change_tick;
            self.resources.insert(id, Box::new(value), change_tick);
        }
        id
    }

    pub fn remove_resource<T: Resource>(&mut self) -> Option<T> {
        let id = self.components.resource_id::<T>()?;
        let value = self.resources.remove(id)?;
        Some(*value.downcast::<T>().ok().expect("resource type mismatch"))
    }

    pub fn contains_resource<T: Resource>(&self) -> bool {
        self.components
            .resource_id::<T>()
            .is_some_and(|id| self.resources.contains(id))
    }

    pub fn get_resource<T: Resource>(&self) -> Option<&T> {
        let id = self.components.resource_id::<T>()?;
        let (value, _) = self.resources.get(id)?;
        value.downcast_ref::<T>()
    }

    pub fn get_resource_mut<T: Resource>(&mut self) -> Option<Mut<'_, T>> {
        let (last_run, this_run) = (self.last_change_tick, self.change_tick);
        let id = self.components.resource_id::<T>()?;
        let (value, ticks) = self.resources.get_mut(id)?;
        Some(Mut::new(
            value.downcast_mut::<T>()?,
            ticks,
            last_run,
            this_run,
        ))
    }

    /// Panicking accessor for a required resource.
    #[track_caller]
    pub fn resource<T: Resource>(&self) -> &T {
        self.get_resource::<T>().unwrap_or_else(|| {
            panic!(
                "requested resource {} does not exist in the world",
                type_name::<T>()
            )
        })
    }

    #[track_caller]
    pub fn resource_mut<T: Resource>(&mut self) -> Mut<'_, T> {
        self.get_resource_mut::<T>().unwrap_or_else(|| {
            panic!(
                "requested resource {} does not exist in the world",
                type_name::<T>()
            )
        })
    }

    /// Temporarily removes resource `T` from the world, giving the closure
    /// both the world and the value. The entry (with its ticks) is restored
    /// afterwards, which makes recursive world operations safe while the
    /// resource is held.
    #[track_caller]
    pub fn resource_scope<T: Resource, U>(
        &mut self,
        f: impl FnOnce(&mut World, Mut<T>) -> U,
    ) -> U {
        let id = self
            .components
            .resource_id::<T>()
            .unwrap_or_else(|| panic!("resource {} is not registered", type_name::<T>()));
        let ResourceEntry { mut value, mut ticks } = self
            .resources
            .remove_entry(id)
            .unwrap_or_else(|| panic!("resource {} does not exist", type_name::<T>()));
        let (last_run, this_run) = (self.last_change_tick, self.change_tick);
        let result = {
            let typed = value.downcast_mut::<T>().expect("resource type mismatch");
            let wrapped = Mut::new(typed, &mut ticks, last_run, this_run);
            f(self, wrapped)
        };
        assert!(
            !self.resources.contains(id),
            "resource {} was inserted during its own resource_scope",
            type_name::<T>()
        );
        self.resources.insert_entry(id, ResourceEntry { value, ticks });
        result
    }

    // ----- queries ----------------------------------------------------------

    /// Builds (or reuses) query state for the given data terms.
    pub fn query<D: QueryData>(&mut self) -> QueryState<D, ()> {
        self.query_filtered::<D, ()>()
    }

    pub fn query_filtered<D: QueryData, F: QueryFilter>(&mut self) -> QueryState<D, F> {
        QueryState::new(self)
    }
}

/// A mutable builder view of one entity.
pub struct EntityWorldMut<'w> {
    world: &'w mut World,
    entity: Entity,
}

impl<'w> EntityWorldMut<'w> {
    #[inline]
    pub fn id(&self) -> Entity {
        self.entity
    }

    /// Attaches a component, replacing any existing value of the same type.
    pub fn insert<T: Component>(&mut self, value: T) -> &mut Self {
        self.world.insert_component(self.entity, value);
        self
    }

    /// Detaches a component, returning its value.
    pub fn remove<T: Component>(&mut self) -> Option<T> {
        self.world.remove_component::<T>(self.entity)
    }

    pub fn get<T: Component>(&self) -> Option<&T> {
        self.world.get::<T>(self.entity)
    }

    pub fn get_mut<T: Component>(&mut self) -> Option<Mut<'_, T>> {
        self.world.get_mut::<T>(self.entity)
    }

    pub fn contains<T: Component>(&self) -> bool {
        self.get::<T>().is_some()
    }

    /// Despawns the entity.
    pub fn despawn(self) {
        self.world.despawn(self.entity);
    }
}

/// Unsafe interior-mutable view of a world, used by the executors to hand
/// systems concurrent access after the scheduler has proven their declared
/// accesses disjoint.
///
/// Every dereference is `unsafe`; the safety argument is always "the schedule
/// build rejected conflicting systems and the executor only admits
/// compatible ones concurrently".
#[derive(Clone, Copy)]
pub struct UnsafeWorldCell<'w>(*mut World, PhantomData<&'w World>);

// SAFETY: access through the cell is gated by the executor's conflict checks;
// World itself only contains Send + Sync storage.
unsafe impl Send for UnsafeWorldCell<'_> {}
unsafe impl Sync for UnsafeWorldCell<'_> {}

impl<'w> UnsafeWorldCell<'w> {
    pub(crate) fn new(world: &'w mut World) -> Self {
        Self(world, PhantomData)
    }

    /// A cell over a shared borrow. Only read access may ever be exercised
    /// through it.
    pub(crate) fn new_readonly(world: &'w World) -> Self {
        Self(world as *const World as *mut World, PhantomData)
    }

    /// # Safety
    /// The caller must have declared read access covering everything it reads
    /// through the returned reference, and no concurrently running system may
    /// write any of it.
    #[inline]
    pub unsafe fn world(self) -> &'w World {
        &*self.0
    }

    /// # Safety
    /// The caller must hold exclusive logical access to everything it touches
    /// through the returned reference.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn world_mut(self) -> &'w mut World {
        &mut *self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position {
        x: f32,
        y: f32,
    }
    impl Component for Position {}

    struct Velocity(f32);
    impl Component for Velocity {}

    #[derive(Default, PartialEq, Debug)]
    struct Counter(u32);
    impl Resource for Counter {}

    #[test]
    fn spawn_insert_get() {
        let mut world = World::new();
        let entity = {
            let mut builder = world.spawn();
            builder.insert(Position { x: 1.0, y: 2.0 });
            builder.id()
        };
        let position = world.get::<Position>(entity).unwrap();
        assert_eq!(position.x, 1.0);
        assert_eq!(position.y, 2.0);
        assert!(world.contains_entity(entity));
    }

    #[test]
    fn entity_is_in_exactly_one_archetype() {
        let mut world = World::new();
        let entity = {
            let mut builder = world.spawn();
            builder.insert(Position { x: 0.0, y: 0.0 }).insert(Velocity(1.0));
            builder.id()
        };
        let mut appearances = 0;
        for archetype in world.archetypes.iter() {
            for chunk in &archetype.chunks {
                appearances += chunk.entities.iter().filter(|&&e| e == entity).count();
            }
        }
        assert_eq!(appearances, 1);

        // the archetype's component list equals the entity's component set
        let location = world.entities.get(entity).unwrap();
        let archetype = world.archetypes.get(location.archetype).unwrap();
        let position_id = world.components.component_id::<Position>().unwrap();
        let velocity_id = world.components.component_id::<Velocity>().unwrap();
        let mut expected = vec![position_id, velocity_id];
        expected.sort();
        assert_eq!(archetype.components(), expected.as_slice());
    }

    #[test]
    fn remove_returns_value_and_moves_back() {
        let mut world = World::new();
        let entity = {
            let mut builder = world.spawn();
            builder.insert(Position { x: 3.0, y: 4.0 }).insert(Velocity(9.0));
            builder.id()
        };
        let removed = world.remove_component::<Velocity>(entity).unwrap();
        assert_eq!(removed.0, 9.0);
        assert!(world.get::<Velocity>(entity).is_none());
        assert_eq!(world.get::<Position>(entity).unwrap().x, 3.0);
    }

    #[test]
    fn despawn_invalidates_handle_and_fixes_swapped_row() {
        let mut world = World::new();
        let a = {
            let mut b = world.spawn();
            b.insert(Velocity(1.0));
            b.id()
        };
        let b = {
            let mut builder = world.spawn();
            builder.insert(Velocity(2.0));
            builder.id()
        };
        assert!(world.despawn(a));
        assert!(!world.contains_entity(a));
        // b was swapped into a's row; its data must still resolve
        assert_eq!(world.get::<Velocity>(b).unwrap().0, 2.0);
        assert!(!world.despawn(a), "double despawn is a no-op");
    }

    #[test]
    fn insert_existing_component_replaces_in_place() {
        let mut world = World::new();
        let entity = {
            let mut b = world.spawn();
            b.insert(Velocity(1.0));
            b.id()
        };
        let archetype_count = world.archetypes.len();
        world.insert_component(entity, Velocity(5.0));
        assert_eq!(world.archetypes.len(), archetype_count, "no structural move");
        assert_eq!(world.get::<Velocity>(entity).unwrap().0, 5.0);
    }

    #[test]
    fn chunk_boundary_allocates_new_chunk() {
        use crate::storage::CHUNK_CAPACITY;
        let mut world = World::new();
        let mut first = None;
        for i in 0..=CHUNK_CAPACITY {
            let mut b = world.spawn();
            b.insert(Velocity(i as f32));
            let id = b.id();
            first.get_or_insert(id);
        }
        let first = first.unwrap();
        let location = world.entities.get(first).unwrap();
        let archetype = world.archetypes.get(location.archetype).unwrap();
        assert_eq!(archetype.chunks.len(), 2);
        assert_eq!(archetype.chunks[0].len(), CHUNK_CAPACITY);
        assert_eq!(archetype.chunks[1].len(), 1);
        // the first entity's data survived the chunk append
        assert_eq!(world.get::<Velocity>(first).unwrap().0, 0.0);
    }

    #[test]
    fn resource_insert_twice_keeps_one_copy() {
        let mut world = World::new();
        world.insert_resource(Counter(1));
        world.insert_resource(Counter(1));
        assert_eq!(world.resource::<Counter>(), &Counter(1));
        let removed = world.remove_resource::<Counter>().unwrap();
        assert_eq!(removed, Counter(1));
        assert!(world.get_resource::<Counter>().is_none());
    }

    #[test]
    fn resource_scope_restores_entry() {
        let mut world = World::new();
        world.insert_resource(Counter(3));
        let seen = world.resource_scope(|world, mut counter: Mut<Counter>| {
            assert!(!world.contains_resource::<Counter>());
            counter.0 += 1;
            counter.0
        });
        assert_eq!(seen, 4);
        assert_eq!(world.resource::<Counter>().0, 4);
    }

    #[test]
    fn set_changed_updates_tick() {
        let mut world = World::new();
        let entity = {
            let mut b = world.spawn();
            b.insert(Velocity(0.0));
            b.id()
        };
        world.increment_change_tick();
        assert!(world.set_changed::<Velocity>(entity));
        let location = world.entities.get(entity).unwrap();
        let archetype = world.archetypes.get(location.archetype).unwrap();
        let id = world.components.component_id::<Velocity>().unwrap();
        let position = archetype.column_position(id).unwrap();
        let ticks = archetype.chunks[location.chunk].columns[position].ticks[location.row];
        assert_eq!(ticks.changed, world.change_tick());
        assert!(ticks.added.get() <= ticks.changed.get());
    }
}
