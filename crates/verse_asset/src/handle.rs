//! Asset handles and the per-type handle provider.

use crate::id::{AssetId, InternalAssetId, UntypedAssetId};
use crate::index::AssetIndexAllocator;
use crate::path::AssetPath;
use crate::Asset;
use crossbeam_channel::{Receiver, Sender};
use std::any::TypeId;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

/// Creates handles for one specific asset type, and owns the channel their
/// destructors report into.
#[derive(Clone)]
pub struct AssetHandleProvider {
    pub(crate) allocator: Arc<AssetIndexAllocator>,
    pub(crate) drop_sender: Sender<DropEvent>,
    pub(crate) drop_receiver: Receiver<DropEvent>,
    pub(crate) type_id: TypeId,
}

/// Emitted exactly once when the last clone of a strong handle is released.
pub(crate) struct DropEvent {
    pub(crate) id: InternalAssetId,
    pub(crate) asset_server_managed: bool,
}

impl AssetHandleProvider {
    pub(crate) fn new(type_id: TypeId, allocator: Arc<AssetIndexAllocator>) -> Self {
        let (drop_sender, drop_receiver) = crossbeam_channel::unbounded();
        Self {
            allocator,
            drop_sender,
            drop_receiver,
            type_id,
        }
    }

    /// Allocates a fresh index and returns a strong untyped handle to it,
    /// not owned by the asset server.
    pub fn reserve_handle(&self) -> UntypedHandle {
        let index = self.allocator.reserve();
        UntypedHandle::Strong(self.get_handle(InternalAssetId::Index(index), false, None))
    }

    pub(crate) fn get_handle(
        &self,
        id: InternalAssetId,
        asset_server_managed: bool,
        path: Option<AssetPath<'static>>,
    ) -> Arc<StrongHandle> {
        Arc::new(StrongHandle {
            id: id.untyped(self.type_id),
            asset_server_managed,
            path,
            drop_sender: self.drop_sender.clone(),
        })
    }

    pub(crate) fn reserve_handle_internal(
        &self,
        asset_server_managed: bool,
        path: Option<AssetPath<'static>>,
    ) -> Arc<StrongHandle> {
        let index = self.allocator.reserve();
        self.get_handle(InternalAssetId::Index(index), asset_server_managed, path)
    }
}

/// The shared record behind every clone of a strong handle. Dropping the
/// last clone enqueues exactly one [`DropEvent`] for the tracker.
pub struct StrongHandle {
    pub(crate) id: UntypedAssetId,
    pub(crate) asset_server_managed: bool,
    pub(crate) path: Option<AssetPath<'static>>,
    pub(crate) drop_sender: Sender<DropEvent>,
}

impl Drop for StrongHandle {
    fn drop(&mut self) {
        // a failed send here means the provider (and with it the whole asset
        // system) is already gone
        let _ = self.drop_sender.send(DropEvent {
            id: self.id.internal(),
            asset_server_managed: self.asset_server_managed,
        });
    }
}

impl std::fmt::Debug for StrongHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrongHandle")
            .field("id", &self.id)
            .field("asset_server_managed", &self.asset_server_managed)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// A reference to an asset of type `A`.
///
/// `Strong` handles keep the asset alive: when the last clone drops, the
/// tracker removes the asset. `Guid` handles name an asset by stable GUID
/// and do not participate in lifetime tracking.
pub enum Handle<A: Asset> {
    Strong(Arc<StrongHandle>),
    Guid(Uuid, PhantomData<fn() -> A>),
}

impl<A: Asset> Handle<A> {
    /// A GUID handle from the `u128` encoding of the GUID.
    pub const fn guid_from_u128(value: u128) -> Self {
        Handle::Guid(Uuid::from_u128(value), PhantomData)
    }

    pub const fn from_guid(guid: Uuid) -> Self {
        Handle::Guid(guid, PhantomData)
    }

    #[inline]
    pub fn id(&self) -> AssetId<A> {
        match self {
            Handle::Strong(handle) => handle.id.typed_unchecked(),
            Handle::Guid(guid, _) => AssetId::from(*guid),
        }
    }

    /// The path this handle was loaded from, if any.
    #[inline]
    pub fn path(&self) -> Option<&AssetPath<'static>> {
        match self {
            Handle::Strong(handle) => handle.path.as_ref(),
            Handle::Guid(..) => None,
        }
    }

    #[inline]
    pub fn is_strong(&self) -> bool {
        matches!(self, Handle::Strong(_))
    }

    /// Erases the compile-time asset type into a runtime tag.
    #[inline]
    pub fn untyped(self) -> UntypedHandle {
        match self {
            Handle::Strong(handle) => UntypedHandle::Strong(handle),
            Handle::Guid(guid, _) => UntypedHandle::Guid {
                type_id: TypeId::of::<A>(),
                guid,
            },
        }
    }
}

impl<A: Asset> Clone for Handle<A> {
    fn clone(&self) -> Self {
        match self {
            Handle::Strong(handle) => Handle::Strong(handle.clone()),
            Handle::Guid(guid, marker) => Handle::Guid(*guid, *marker),
        }
    }
}

// handles are routinely attached to entities
impl<A: Asset> verse_ecs::component::Component for Handle<A> {}

impl<A: Asset> Default for Handle<A> {
    fn default() -> Self {
        Handle::Guid(AssetId::<A>::DEFAULT_GUID, PhantomData)
    }
}

impl<A: Asset> std::fmt::Debug for Handle<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = std::any::type_name::<A>().rsplit("::").next().unwrap_or("?");
        match self {
            Handle::Strong(handle) => write!(
                f,
                "StrongHandle<{name}>{{ id: {:?}, path: {:?} }}",
                handle.id, handle.path
            ),
            Handle::Guid(guid, _) => write!(f, "GuidHandle<{name}>({guid})"),
        }
    }
}

impl<A: Asset> Hash for Handle<A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl<A: Asset> PartialEq for Handle<A> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<A: Asset> Eq for Handle<A> {}

impl<A: Asset> From<Handle<A>> for AssetId<A> {
    fn from(handle: Handle<A>) -> Self {
        handle.id()
    }
}

impl<A: Asset> From<&Handle<A>> for AssetId<A> {
    fn from(handle: &Handle<A>) -> Self {
        handle.id()
    }
}

/// A [`Handle`] whose asset type is a runtime tag, so handles of different
/// asset types can be stored together.
#[derive(Clone)]
pub enum UntypedHandle {
    Strong(Arc<StrongHandle>),
    Guid { type_id: TypeId, guid: Uuid },
}

impl UntypedHandle {
    #[inline]
    pub fn id(&self) -> UntypedAssetId {
        match self {
            UntypedHandle::Strong(handle) => handle.id,
            UntypedHandle::Guid { type_id, guid } => UntypedAssetId::Guid {
                type_id: *type_id,
                guid: *guid,
            },
        }
    }

    #[inline]
    pub fn path(&self) -> Option<&AssetPath<'static>> {
        match self {
            UntypedHandle::Strong(handle) => handle.path.as_ref(),
            UntypedHandle::Guid { .. } => None,
        }
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        match self {
            UntypedHandle::Strong(handle) => handle.id.type_id(),
            UntypedHandle::Guid { type_id, .. } => *type_id,
        }
    }

    /// Converts to a typed handle without checking the type tag.
    #[inline]
    pub fn typed_unchecked<A: Asset>(self) -> Handle<A> {
        match self {
            UntypedHandle::Strong(handle) => Handle::Strong(handle),
            UntypedHandle::Guid { guid, .. } => Handle::Guid(guid, PhantomData),
        }
    }

    /// Converts to a typed handle, panicking on a type mismatch.
    #[track_caller]
    pub fn typed<A: Asset>(self) -> Handle<A> {
        assert_eq!(
            self.type_id(),
            TypeId::of::<A>(),
            "UntypedHandle type does not match {}",
            std::any::type_name::<A>()
        );
        self.typed_unchecked()
    }
}

impl PartialEq for UntypedHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for UntypedHandle {}

impl Hash for UntypedHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl std::fmt::Debug for UntypedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UntypedHandle::Strong(handle) => write!(
                f,
                "StrongHandle{{ id: {:?}, path: {:?} }}",
                handle.id, handle.path
            ),
            UntypedHandle::Guid { type_id, guid } => {
                write!(f, "GuidHandle{{ type: {type_id:?}, guid: {guid} }}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VisitAssetDependencies;

    struct Image;
    impl VisitAssetDependencies for Image {
        fn visit_dependencies(&self, _visit: &mut dyn FnMut(UntypedAssetId)) {}
    }
    impl Asset for Image {}

    #[test]
    fn drop_emits_exactly_one_event() {
        let provider =
            AssetHandleProvider::new(TypeId::of::<Image>(), Arc::new(Default::default()));
        let handle = provider.reserve_handle();
        let id = handle.id();
        let clone = handle.clone();
        drop(handle);
        assert!(provider.drop_receiver.try_recv().is_err(), "clone alive");
        drop(clone);
        let event = provider.drop_receiver.try_recv().unwrap();
        assert_eq!(event.id.untyped(TypeId::of::<Image>()), id);
        assert!(provider.drop_receiver.try_recv().is_err(), "exactly one");
    }

    #[test]
    fn guid_handles_do_not_track_lifetime() {
        let provider =
            AssetHandleProvider::new(TypeId::of::<Image>(), Arc::new(Default::default()));
        let handle = Handle::<Image>::guid_from_u128(7);
        drop(handle);
        assert!(provider.drop_receiver.try_recv().is_err());
    }

    #[test]
    fn typed_untyped_round_trip() {
        let provider =
            AssetHandleProvider::new(TypeId::of::<Image>(), Arc::new(Default::default()));
        let untyped = provider.reserve_handle();
        let id = untyped.id();
        let typed: Handle<Image> = untyped.typed();
        assert_eq!(typed.id().untyped(), id);
    }
}
