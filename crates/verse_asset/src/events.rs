//! User-visible asset lifecycle events, queued into the world's message
//! queues.

use crate::id::{AssetId, UntypedAssetId};
use crate::path::AssetPath;
use crate::server::AssetLoadError;
use crate::Asset;
use std::sync::Arc;
use verse_ecs::event::Event;

/// Something happened to the asset `id` in its [`Assets`](crate::Assets)
/// collection.
#[derive(Debug, PartialEq, Eq)]
pub enum AssetEvent<A: Asset> {
    /// The asset value was inserted for the first time.
    Added { id: AssetId<A> },
    /// The asset value was replaced or mutably accessed.
    Modified { id: AssetId<A> },
    /// The asset value was removed.
    Removed { id: AssetId<A> },
    /// The last strong handle dropped; the slot was released.
    Unused { id: AssetId<A> },
    /// The asset and its entire transitive dependency tree finished
    /// loading.
    LoadedWithDependencies { id: AssetId<A> },
}

// manual impls: `A` itself is never stored, so no `A: Clone` bound applies
impl<A: Asset> Clone for AssetEvent<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: Asset> Copy for AssetEvent<A> {}

impl<A: Asset> AssetEvent<A> {
    pub fn is_added(&self, asset_id: impl Into<AssetId<A>>) -> bool {
        matches!(self, Self::Added { id } if *id == asset_id.into())
    }

    pub fn is_modified(&self, asset_id: impl Into<AssetId<A>>) -> bool {
        matches!(self, Self::Modified { id } if *id == asset_id.into())
    }

    pub fn is_removed(&self, asset_id: impl Into<AssetId<A>>) -> bool {
        matches!(self, Self::Removed { id } if *id == asset_id.into())
    }

    pub fn is_loaded_with_dependencies(&self, asset_id: impl Into<AssetId<A>>) -> bool {
        matches!(self, Self::LoadedWithDependencies { id } if *id == asset_id.into())
    }
}

impl<A: Asset> Event for AssetEvent<A> {}

/// A load of the asset `id` failed. Queued after the tracker processed the
/// failure; the error is shared verbatim with every dependent.
#[derive(Clone, Debug)]
pub struct AssetLoadFailedEvent<A: Asset> {
    pub id: AssetId<A>,
    pub path: AssetPath<'static>,
    pub error: Arc<AssetLoadError>,
}

impl<A: Asset> Event for AssetLoadFailedEvent<A> {}

/// Untyped twin of [`AssetLoadFailedEvent`], for consumers that watch every
/// asset type.
#[derive(Clone, Debug)]
pub struct UntypedAssetLoadFailedEvent {
    pub id: UntypedAssetId,
    pub path: AssetPath<'static>,
    pub error: Arc<AssetLoadError>,
}

impl Event for UntypedAssetLoadFailedEvent {}

impl<A: Asset> From<&AssetLoadFailedEvent<A>> for UntypedAssetLoadFailedEvent {
    fn from(event: &AssetLoadFailedEvent<A>) -> Self {
        Self {
            id: event.id.untyped(),
            path: event.path.clone(),
            error: event.error.clone(),
        }
    }
}
