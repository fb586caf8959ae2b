//! Chunked column storage.
//!
//! An archetype stores its entities in a list of fixed-capacity chunks. Each
//! chunk holds, per component of the archetype, a type-erased value column
//! and a parallel array of change ticks, plus the entities occupying its
//! rows. Chunks are only ever appended; existing chunks never reallocate, so
//! raw pointers into a chunk stay valid for the duration of an iteration.

use crate::component::Component;
use crate::entity::Entity;
use crate::tick::{ComponentTicks, Tick};
use std::any::Any;

/// Rows per chunk (2^12).
pub const CHUNK_CAPACITY: usize = 1 << 12;

/// Type-erased storage for one component column within a chunk.
pub(crate) trait ColumnData: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn len(&self) -> usize;
    /// Drops the value at `row`, moving the last value into its place.
    fn swap_remove(&mut self, row: usize);
    /// Moves the value at `row` to the end of `target` (which must store the
    /// same component type), back-filling from the last row.
    fn swap_remove_into(&mut self, row: usize, target: &mut dyn ColumnData);
    /// An empty column of the same component type.
    fn new_empty(&self) -> Box<dyn ColumnData>;
}

pub(crate) struct TypedColumn<T: Component> {
    pub(crate) values: Vec<T>,
}

impl<T: Component> ColumnData for TypedColumn<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn swap_remove(&mut self, row: usize) {
        self.values.swap_remove(row);
    }

    fn swap_remove_into(&mut self, row: usize, target: &mut dyn ColumnData) {
        let value = self.values.swap_remove(row);
        let target = target
            .as_any_mut()
            .downcast_mut::<TypedColumn<T>>()
            .expect("column moved between mismatched component types");
        target.values.push(value);
    }

    fn new_empty(&self) -> Box<dyn ColumnData> {
        Box::new(TypedColumn::<T> { values: Vec::new() })
    }
}

/// Returns a constructor for an empty column of `T`, stored in the component
/// registry so archetypes can build chunks without knowing `T`.
pub(crate) fn column_constructor<T: Component>() -> fn() -> Box<dyn ColumnData> {
    || Box::new(TypedColumn::<T> { values: Vec::new() })
}

/// One component column of a chunk: values plus their parallel tick array.
pub(crate) struct ColumnEntry {
    pub(crate) data: Box<dyn ColumnData>,
    pub(crate) ticks: Vec<ComponentTicks>,
}

impl ColumnEntry {
    pub(crate) fn typed<T: Component>(&self) -> &TypedColumn<T> {
        self.data
            .as_any()
            .downcast_ref::<TypedColumn<T>>()
            .expect("column type mismatch")
    }

    pub(crate) fn typed_mut<T: Component>(&mut self) -> &mut TypedColumn<T> {
        self.data
            .as_any_mut()
            .downcast_mut::<TypedColumn<T>>()
            .expect("column type mismatch")
    }
}

/// A bounded slab of rows. Columns are parallel to the owning archetype's
/// sorted component list.
pub(crate) struct Chunk {
    pub(crate) entities: Vec<Entity>,
    pub(crate) columns: Vec<ColumnEntry>,
}

impl Chunk {
    pub(crate) fn new(constructors: &[fn() -> Box<dyn ColumnData>]) -> Self {
        Self {
            entities: Vec::new(),
            columns: constructors
                .iter()
                .map(|new_column| ColumnEntry {
                    data: new_column(),
                    ticks: Vec::new(),
                })
                .collect(),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.entities.len() >= CHUNK_CAPACITY
    }

    /// Removes the row, dropping its component values. Returns the entity
    /// that was moved into `row` to back-fill, if any.
    pub(crate) fn swap_remove(&mut self, row: usize) -> Option<Entity> {
        for column in &mut self.columns {
            column.data.swap_remove(row);
            column.ticks.swap_remove(row);
        }
        self.entities.swap_remove(row);
        // if `row` was not the last row, its slot now holds the moved entity
        self.entities.get(row).copied()
    }

    /// Rebase all tick cells against `current`.
    pub(crate) fn check_ticks(&mut self, current: Tick) {
        for column in &mut self.columns {
            for ticks in &mut column.ticks {
                ticks.check_ticks(current);
            }
        }
    }
}
