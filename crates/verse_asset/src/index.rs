//! Generational dense asset indices and their allocator.

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// A generational runtime identifier for an asset slot in dense storage.
/// Not stable across app runs; use GUID ids for that.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AssetIndex {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl AssetIndex {
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Packs into an opaque u64 for transport; recover with
    /// [`AssetIndex::from_bits`].
    pub fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

/// Allocates [`AssetIndex`] values and recycles freed ones.
///
/// Freed indices travel through two channels: `recycle` pushes onto the
/// queue; `reserve` pops from it (bumping the generation) and republishes
/// the reused index on the storage sink so the dense storage can reset the
/// slot before the next insert.
pub struct AssetIndexAllocator {
    next_index: AtomicU32,
    recycled_queue_sender: Sender<AssetIndex>,
    recycled_queue_receiver: Receiver<AssetIndex>,
    recycled_storage_sender: Sender<AssetIndex>,
    recycled_storage_receiver: Receiver<AssetIndex>,
}

impl Default for AssetIndexAllocator {
    fn default() -> Self {
        let (recycled_queue_sender, recycled_queue_receiver) = crossbeam_channel::unbounded();
        let (recycled_storage_sender, recycled_storage_receiver) = crossbeam_channel::unbounded();
        Self {
            next_index: AtomicU32::new(0),
            recycled_queue_sender,
            recycled_queue_receiver,
            recycled_storage_sender,
            recycled_storage_receiver,
        }
    }
}

impl AssetIndexAllocator {
    /// Pops a recycled index (with a fresh generation) or allocates a new
    /// one (generation 1).
    pub fn reserve(&self) -> AssetIndex {
        if let Ok(mut recycled) = self.recycled_queue_receiver.try_recv() {
            recycled.generation += 1;
            self.recycled_storage_sender
                .send(recycled)
                .expect("unbounded channel send cannot fail");
            recycled
        } else {
            AssetIndex {
                index: self.next_index.fetch_add(1, Ordering::Relaxed),
                generation: 1,
            }
        }
    }

    /// Queues `index` for reuse. Only call once the slot's value is gone.
    pub fn recycle(&self, index: AssetIndex) {
        self.recycled_queue_sender
            .send(index)
            .expect("unbounded channel send cannot fail");
    }

    /// High-water mark of allocated indices; the dense storage sizes itself
    /// with this.
    pub(crate) fn next_index(&self) -> u32 {
        self.next_index.load(Ordering::Relaxed)
    }

    /// Drains the indices whose slots must be reset before reuse.
    pub(crate) fn drain_recycled_storage(&self) -> impl Iterator<Item = AssetIndex> + '_ {
        self.recycled_storage_receiver.try_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_indices_are_sequential() {
        let allocator = AssetIndexAllocator::default();
        let a = allocator.reserve();
        let b = allocator.reserve();
        assert_eq!((a.index(), a.generation()), (0, 1));
        assert_eq!((b.index(), b.generation()), (1, 1));
    }

    #[test]
    fn recycling_bumps_generation_and_publishes_to_storage() {
        let allocator = AssetIndexAllocator::default();
        let first = allocator.reserve();
        allocator.recycle(first);
        let reused = allocator.reserve();
        assert_eq!(reused.index(), first.index());
        assert_eq!(reused.generation(), first.generation() + 1);
        let to_reset: Vec<_> = allocator.drain_recycled_storage().collect();
        assert_eq!(to_reset, vec![reused]);
    }

    #[test]
    fn bits_round_trip() {
        let index = AssetIndex {
            index: 77,
            generation: 12,
        };
        assert_eq!(AssetIndex::from_bits(index.to_bits()), index);
    }
}
