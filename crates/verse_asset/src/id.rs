//! Asset identifiers: generational dense indices or GUIDs, typed and
//! untyped.

use crate::index::AssetIndex;
use crate::Asset;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use uuid::Uuid;

/// Identifies an asset of type `A` for its lifetime in the registry.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub enum AssetId<A: Asset> {
    /// A dense runtime index.
    Index {
        index: AssetIndex,
        #[serde(skip)]
        marker: PhantomData<fn() -> A>,
    },
    /// A user-assigned GUID, stable across runs.
    Guid { guid: Uuid },
}

impl<A: Asset> AssetId<A> {
    /// The GUID of the conventional default asset of a type.
    pub const DEFAULT_GUID: Uuid = Uuid::from_u128(0xd67f_2f17_47c9_4a2e_9e95_1ecd_2338_5b11);

    pub const fn from_guid(guid: Uuid) -> Self {
        Self::Guid { guid }
    }

    #[inline]
    pub(crate) fn internal(self) -> InternalAssetId {
        match self {
            AssetId::Index { index, .. } => InternalAssetId::Index(index),
            AssetId::Guid { guid } => InternalAssetId::Guid(guid),
        }
    }

    /// Attaches the runtime type tag.
    #[inline]
    pub fn untyped(self) -> UntypedAssetId {
        self.internal().untyped(TypeId::of::<A>())
    }
}

impl<A: Asset> Default for AssetId<A> {
    fn default() -> Self {
        AssetId::Guid {
            guid: Self::DEFAULT_GUID,
        }
    }
}

impl<A: Asset> Clone for AssetId<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: Asset> Copy for AssetId<A> {}

impl<A: Asset> Debug for AssetId<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = std::any::type_name::<A>().rsplit("::").next().unwrap_or("?");
        match self {
            AssetId::Index { index, .. } => write!(
                f,
                "AssetId<{name}>{{ index: {}, generation: {} }}",
                index.index, index.generation
            ),
            AssetId::Guid { guid } => write!(f, "AssetId<{name}>{{ guid: {guid} }}"),
        }
    }
}

impl<A: Asset> Display for AssetId<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl<A: Asset> Hash for AssetId<A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.internal().hash(state);
    }
}

impl<A: Asset> PartialEq for AssetId<A> {
    fn eq(&self, other: &Self) -> bool {
        self.internal() == other.internal()
    }
}

impl<A: Asset> Eq for AssetId<A> {}

impl<A: Asset> PartialOrd for AssetId<A> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<A: Asset> Ord for AssetId<A> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.internal().cmp(&other.internal())
    }
}

impl<A: Asset> From<AssetIndex> for AssetId<A> {
    fn from(index: AssetIndex) -> Self {
        Self::Index {
            index,
            marker: PhantomData,
        }
    }
}

impl<A: Asset> From<Uuid> for AssetId<A> {
    fn from(guid: Uuid) -> Self {
        Self::Guid { guid }
    }
}

/// An [`AssetId`] with its asset type carried as a runtime [`TypeId`].
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum UntypedAssetId {
    Index { type_id: TypeId, index: AssetIndex },
    Guid { type_id: TypeId, guid: Uuid },
}

impl UntypedAssetId {
    #[inline]
    pub fn type_id(&self) -> TypeId {
        match self {
            UntypedAssetId::Index { type_id, .. } | UntypedAssetId::Guid { type_id, .. } => {
                *type_id
            }
        }
    }

    #[inline]
    pub(crate) fn internal(self) -> InternalAssetId {
        match self {
            UntypedAssetId::Index { index, .. } => InternalAssetId::Index(index),
            UntypedAssetId::Guid { guid, .. } => InternalAssetId::Guid(guid),
        }
    }

    /// Converts to a typed id without checking the type tag.
    #[inline]
    pub fn typed_unchecked<A: Asset>(self) -> AssetId<A> {
        match self {
            UntypedAssetId::Index { index, .. } => AssetId::from(index),
            UntypedAssetId::Guid { guid, .. } => AssetId::from(guid),
        }
    }

    /// Converts to a typed id, panicking on a type mismatch.
    #[track_caller]
    pub fn typed<A: Asset>(self) -> AssetId<A> {
        assert_eq!(
            self.type_id(),
            TypeId::of::<A>(),
            "UntypedAssetId type does not match {}",
            std::any::type_name::<A>()
        );
        self.typed_unchecked()
    }
}

impl Debug for UntypedAssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UntypedAssetId::Index { type_id, index } => write!(
                f,
                "UntypedAssetId{{ type: {type_id:?}, index: {}, generation: {} }}",
                index.index, index.generation
            ),
            UntypedAssetId::Guid { type_id, guid } => {
                write!(f, "UntypedAssetId{{ type: {type_id:?}, guid: {guid} }}")
            }
        }
    }
}

impl<A: Asset> From<AssetId<A>> for UntypedAssetId {
    fn from(id: AssetId<A>) -> Self {
        id.untyped()
    }
}

/// An id without its type tag; the internal key of allocators and handle
/// providers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum InternalAssetId {
    Index(AssetIndex),
    Guid(Uuid),
}

impl InternalAssetId {
    #[inline]
    pub(crate) fn untyped(self, type_id: TypeId) -> UntypedAssetId {
        match self {
            InternalAssetId::Index(index) => UntypedAssetId::Index { type_id, index },
            InternalAssetId::Guid(guid) => UntypedAssetId::Guid { type_id, guid },
        }
    }
}
