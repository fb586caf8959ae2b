//! Typed asset storage and the systems that keep it in sync with handle
//! lifetimes.

use crate::events::AssetEvent;
use crate::handle::{AssetHandleProvider, Handle};
use crate::id::AssetId;
use crate::index::{AssetIndex, AssetIndexAllocator};
use crate::server::AssetServer;
use crate::Asset;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;
use verse_ecs::change_detection::{Res, ResMut};
use verse_ecs::event::EventWriter;
use verse_ecs::resource::Resource;

/// Inserting into a slot whose generation moved on.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum InvalidGenerationError {
    #[error("asset index {index:?} is occupied by generation {current_generation}")]
    Occupied {
        index: AssetIndex,
        current_generation: u32,
    },
    #[error("asset index {index:?} was removed")]
    Removed { index: AssetIndex },
}

#[derive(Default)]
enum Entry<A: Asset> {
    /// No live handles point here.
    #[default]
    None,
    /// A live slot; `value` is `None` while the asset is still loading.
    Some { value: Option<A>, generation: u32 },
}

/// Vec-backed storage addressed by [`AssetIndex`].
struct DenseAssetStorage<A: Asset> {
    storage: Vec<Entry<A>>,
    len: u32,
    allocator: Arc<AssetIndexAllocator>,
}

impl<A: Asset> Default for DenseAssetStorage<A> {
    fn default() -> Self {
        Self {
            storage: Vec::new(),
            len: 0,
            allocator: Arc::new(AssetIndexAllocator::default()),
        }
    }
}

impl<A: Asset> DenseAssetStorage<A> {
    fn len(&self) -> usize {
        self.len as usize
    }

    /// Inserts at `index`. Returns whether a value was replaced.
    fn insert(&mut self, index: AssetIndex, asset: A) -> Result<bool, InvalidGenerationError> {
        self.flush();
        let entry = &mut self.storage[index.index() as usize];
        match entry {
            Entry::Some { value, generation } if *generation == index.generation() => {
                let replaced = value.is_some();
                if !replaced {
                    self.len += 1;
                }
                *value = Some(asset);
                Ok(replaced)
            }
            Entry::Some { generation, .. } => Err(InvalidGenerationError::Occupied {
                index,
                current_generation: *generation,
            }),
            Entry::None => Err(InvalidGenerationError::Removed { index }),
        }
    }

    /// Removes the value and releases the slot, recycling the index.
    fn remove_dropped(&mut self, index: AssetIndex) -> Option<A> {
        let removed = self.remove_value(index);
        self.storage[index.index() as usize] = Entry::None;
        self.allocator.recycle(index);
        removed
    }

    /// Removes the value but keeps the slot alive for the current handles.
    fn remove_still_alive(&mut self, index: AssetIndex) -> Option<A> {
        self.remove_value(index)
    }

    fn remove_value(&mut self, index: AssetIndex) -> Option<A> {
        self.flush();
        match &mut self.storage[index.index() as usize] {
            Entry::Some { value, generation } if *generation == index.generation() => {
                let taken = value.take();
                if taken.is_some() {
                    self.len -= 1;
                }
                taken
            }
            _ => None,
        }
    }

    fn get(&self, index: AssetIndex) -> Option<&A> {
        match self.storage.get(index.index() as usize)? {
            Entry::Some { value, generation } if *generation == index.generation() => {
                value.as_ref()
            }
            _ => None,
        }
    }

    fn get_mut(&mut self, index: AssetIndex) -> Option<&mut A> {
        match self.storage.get_mut(index.index() as usize)? {
            Entry::Some { value, generation } if *generation == index.generation() => {
                value.as_mut()
            }
            _ => None,
        }
    }

    /// Grows to the allocator's high-water mark and resets recycled slots.
    fn flush(&mut self) {
        let new_len = self.allocator.next_index();
        self.storage.resize_with(new_len as usize, || Entry::Some {
            value: None,
            generation: 1,
        });
        for recycled in self.allocator.drain_recycled_storage() {
            self.storage[recycled.index() as usize] = Entry::Some {
                value: None,
                generation: recycled.generation(),
            };
        }
    }

    fn ids(&self) -> impl Iterator<Item = AssetId<A>> + '_ {
        self.storage.iter().enumerate().filter_map(|(index, entry)| match entry {
            Entry::Some {
                value: Some(_),
                generation,
            } => Some(AssetId::from(AssetIndex {
                index: index as u32,
                generation: *generation,
            })),
            _ => None,
        })
    }
}

/// The world-hosted collection of loaded `A` values, addressed by
/// [`AssetId`]. Dense-index ids land in vec storage; GUID ids in a map.
/// Mutating operations queue [`AssetEvent`]s flushed by
/// [`Assets::asset_events`] at the end of the tick.
pub struct Assets<A: Asset> {
    dense_storage: DenseAssetStorage<A>,
    guid_map: HashMap<Uuid, A>,
    handle_provider: AssetHandleProvider,
    queued_events: Vec<AssetEvent<A>>,
}

impl<A: Asset> Default for Assets<A> {
    fn default() -> Self {
        let dense_storage = DenseAssetStorage::<A>::default();
        let handle_provider =
            AssetHandleProvider::new(TypeId::of::<A>(), dense_storage.allocator.clone());
        Self {
            dense_storage,
            guid_map: HashMap::new(),
            handle_provider,
            queued_events: Vec::new(),
        }
    }
}

impl<A: Asset> Resource for Assets<A> {}

impl<A: Asset> Assets<A> {
    /// The provider that reserves handles pointing into this collection.
    pub fn get_handle_provider(&self) -> AssetHandleProvider {
        self.handle_provider.clone()
    }

    /// Reserves a strong handle whose asset can be inserted later.
    pub fn reserve_handle(&self) -> Handle<A> {
        self.handle_provider.reserve_handle().typed()
    }

    /// Inserts (or replaces) the asset under `id`.
    pub fn insert(
        &mut self,
        id: impl Into<AssetId<A>>,
        asset: A,
    ) -> Result<(), InvalidGenerationError> {
        match id.into() {
            AssetId::Index { index, .. } => {
                let replaced = self.dense_storage.insert(index, asset)?;
                self.queued_events.push(if replaced {
                    AssetEvent::Modified { id: index.into() }
                } else {
                    AssetEvent::Added { id: index.into() }
                });
                Ok(())
            }
            AssetId::Guid { guid } => {
                let replaced = self.guid_map.insert(guid, asset).is_some();
                self.queued_events.push(if replaced {
                    AssetEvent::Modified { id: guid.into() }
                } else {
                    AssetEvent::Added { id: guid.into() }
                });
                Ok(())
            }
        }
    }

    /// Adds a new asset, returning a fresh strong handle to it.
    pub fn add(&mut self, asset: impl Into<A>) -> Handle<A> {
        let index = self.dense_storage.allocator.reserve();
        self.dense_storage
            .insert(index, asset.into())
            .expect("freshly reserved index is insertable");
        self.queued_events.push(AssetEvent::Added { id: index.into() });
        Handle::Strong(self.handle_provider.get_handle(
            crate::id::InternalAssetId::Index(index),
            false,
            None,
        ))
    }

    pub fn contains(&self, id: impl Into<AssetId<A>>) -> bool {
        match id.into() {
            AssetId::Index { index, .. } => self.dense_storage.get(index).is_some(),
            AssetId::Guid { guid } => self.guid_map.contains_key(&guid),
        }
    }

    pub fn get(&self, id: impl Into<AssetId<A>>) -> Option<&A> {
        match id.into() {
            AssetId::Index { index, .. } => self.dense_storage.get(index),
            AssetId::Guid { guid } => self.guid_map.get(&guid),
        }
    }

    /// Mutable access; queues [`AssetEvent::Modified`].
    pub fn get_mut(&mut self, id: impl Into<AssetId<A>>) -> Option<&mut A> {
        let id = id.into();
        let value = match id {
            AssetId::Index { index, .. } => self.dense_storage.get_mut(index),
            AssetId::Guid { guid } => self.guid_map.get_mut(&guid),
        };
        if value.is_some() {
            self.queued_events.push(AssetEvent::Modified { id });
        }
        value
    }

    /// Mutable access that does not queue a modification event.
    pub fn get_mut_untracked(&mut self, id: impl Into<AssetId<A>>) -> Option<&mut A> {
        match id.into() {
            AssetId::Index { index, .. } => self.dense_storage.get_mut(index),
            AssetId::Guid { guid } => self.guid_map.get_mut(&guid),
        }
    }

    /// Removes and returns the asset, queueing [`AssetEvent::Removed`]. The
    /// id stays reserved while strong handles are live.
    pub fn remove(&mut self, id: impl Into<AssetId<A>>) -> Option<A> {
        let id = id.into();
        let removed = match id {
            AssetId::Index { index, .. } => self.dense_storage.remove_still_alive(index),
            AssetId::Guid { guid } => self.guid_map.remove(&guid),
        };
        if removed.is_some() {
            self.queued_events.push(AssetEvent::Removed { id });
        }
        removed
    }

    /// Releases a slot whose last handle dropped.
    pub(crate) fn remove_dropped(&mut self, index: AssetIndex) {
        let existed = self.dense_storage.remove_dropped(index).is_some();
        self.queued_events.push(AssetEvent::Unused { id: index.into() });
        if existed {
            self.queued_events.push(AssetEvent::Removed { id: index.into() });
        }
    }

    pub fn len(&self) -> usize {
        self.dense_storage.len() + self.guid_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> impl Iterator<Item = AssetId<A>> + '_ {
        self.dense_storage
            .ids()
            .chain(self.guid_map.keys().map(|&guid| AssetId::from(guid)))
    }

    /// Drains the per-type handle-drop channel, removing each dropped asset
    /// unless the tracker absorbed the drop (the handle was revived).
    ///
    /// Holds the tracker lock for the whole drain so concurrent
    /// `AssetServer::load` calls for the same path stay transactional.
    pub fn track_assets(mut assets: ResMut<Self>, asset_server: Res<AssetServer>) {
        let assets = &mut *assets;
        let mut infos = asset_server.write_infos();
        while let Ok(drop_event) = assets.handle_provider.drop_receiver.try_recv() {
            let id = drop_event.id;
            if drop_event.asset_server_managed {
                if !infos.process_handle_drop(id.untyped(TypeId::of::<A>())) {
                    // revived (or unknown): the drop was superseded
                    continue;
                }
            }
            if let crate::id::InternalAssetId::Index(index) = id {
                assets.remove_dropped(index);
            }
        }
    }

    /// Flushes queued [`AssetEvent`]s into the world's message queue.
    pub fn asset_events(mut assets: ResMut<Self>, mut events: EventWriter<AssetEvent<A>>) {
        events.send_batch(assets.queued_events.drain(..));
    }

    /// Run condition: only flush when there is something to flush.
    pub fn asset_events_condition(assets: Res<Self>) -> bool {
        !assets.queued_events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(verse_asset_macros::Asset, Debug, PartialEq)]
    struct Sound(u32);

    #[test]
    fn add_get_remove() {
        let mut sounds = Assets::<Sound>::default();
        let handle = sounds.add(Sound(1));
        assert_eq!(sounds.get(&handle), Some(&Sound(1)));
        assert_eq!(sounds.len(), 1);
        let removed = sounds.remove(&handle).unwrap();
        assert_eq!(removed, Sound(1));
        assert!(sounds.is_empty());
    }

    #[test]
    fn insert_by_guid() {
        let mut sounds = Assets::<Sound>::default();
        let id = AssetId::<Sound>::from(Uuid::from_u128(42));
        sounds.insert(id, Sound(3)).unwrap();
        assert!(sounds.contains(id));
        assert_eq!(sounds.ids().count(), 1);
    }

    #[test]
    fn stale_generation_insert_fails() {
        let mut sounds = Assets::<Sound>::default();
        let handle = sounds.add(Sound(1));
        let AssetId::Index { index, .. } = handle.id() else {
            panic!("add returns an index id")
        };
        // release the slot, then try to insert with the old generation
        sounds.remove_dropped(index);
        drop(handle);
        let _ = sounds.handle_provider.drop_receiver.try_recv();
        let reused = sounds.dense_storage.allocator.reserve();
        assert_eq!(reused.index(), index.index());
        let error = sounds.insert(AssetId::<Sound>::from(index), Sound(9)).unwrap_err();
        assert!(matches!(error, InvalidGenerationError::Occupied { .. }));
    }

    #[test]
    fn get_mut_queues_modified_event() {
        let mut sounds = Assets::<Sound>::default();
        let handle = sounds.add(Sound(1));
        sounds.queued_events.clear();
        sounds.get_mut(&handle).unwrap().0 = 2;
        assert!(matches!(
            sounds.queued_events.as_slice(),
            [AssetEvent::Modified { .. }]
        ));
        sounds.queued_events.clear();
        sounds.get_mut_untracked(&handle).unwrap().0 = 3;
        assert!(sounds.queued_events.is_empty());
    }
}
