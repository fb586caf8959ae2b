//! Typed singleton storage with change ticks.

use crate::component::ComponentId;
use crate::tick::{ComponentTicks, Tick};
use std::any::Any;
use std::collections::HashMap;

/// A world-unique singleton value. Prefer `#[derive(Resource)]`.
pub trait Resource: Send + Sync + 'static {}

/// Constructs a value from the world it will live in. Implemented for every
/// `Default` type; implement manually when initialization needs world state.
pub trait FromWorld: Sized {
    fn from_world(world: &mut crate::world::World) -> Self;
}

impl<T: Default> FromWorld for T {
    fn from_world(_world: &mut crate::world::World) -> Self {
        T::default()
    }
}

pub(crate) struct ResourceEntry {
    pub(crate) value: Box<dyn Any + Send + Sync>,
    pub(crate) ticks: ComponentTicks,
}

/// Resource entries keyed by their id in the resource namespace.
#[derive(Default)]
pub(crate) struct Resources {
    entries: HashMap<ComponentId, ResourceEntry>,
}

impl Resources {
    /// Inserts or replaces. Replacement keeps the added tick and stamps the
    /// changed tick.
    pub(crate) fn insert(
        &mut self,
        id: ComponentId,
        value: Box<dyn Any + Send + Sync>,
        change_tick: Tick,
    ) {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.value = value;
                entry.ticks.set_changed(change_tick);
            }
            None => {
                self.entries.insert(
                    id,
                    ResourceEntry {
                        value,
                        ticks: ComponentTicks::new(change_tick),
                    },
                );
            }
        }
    }

    /// Re-inserts an entry removed by `remove_entry` (used by
    /// `World::resource_scope`), preserving its ticks.
    pub(crate) fn insert_entry(&mut self, id: ComponentId, entry: ResourceEntry) {
        self.entries.insert(id, entry);
    }

    pub(crate) fn remove_entry(&mut self, id: ComponentId) -> Option<ResourceEntry> {
        self.entries.remove(&id)
    }

    pub(crate) fn remove(&mut self, id: ComponentId) -> Option<Box<dyn Any + Send + Sync>> {
        self.entries.remove(&id).map(|entry| entry.value)
    }

    #[inline]
    pub(crate) fn contains(&self, id: ComponentId) -> bool {
        self.entries.contains_key(&id)
    }

    pub(crate) fn get(&self, id: ComponentId) -> Option<(&(dyn Any + Send + Sync), &ComponentTicks)> {
        let entry = self.entries.get(&id)?;
        Some((&*entry.value, &entry.ticks))
    }

    pub(crate) fn get_mut(
        &mut self,
        id: ComponentId,
    ) -> Option<(&mut (dyn Any + Send + Sync), &mut ComponentTicks)> {
        let entry = self.entries.get_mut(&id)?;
        Some((&mut *entry.value, &mut entry.ticks))
    }

    pub(crate) fn check_ticks(&mut self, current: Tick) {
        for entry in self.entries.values_mut() {
            entry.ticks.check_ticks(current);
        }
    }
}
