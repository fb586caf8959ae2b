//! Asset loaders and the context they run in.

use crate::id::UntypedAssetId;
use crate::io::{read_all, AssetReaderError, Reader};
use crate::meta::{AssetMeta, AssetMetaDyn, DeserializeMetaError};
use crate::path::AssetPath;
use crate::server::{AssetLoadError, AssetServer, HandleLoadingMode};
use crate::{Asset, BoxedFuture, Handle, UntypedHandle};
use downcast_rs::{impl_downcast, Downcast};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use verse_ecs::world::World;

/// Deserializes bytes from an [`AssetSource`](crate::io::AssetSource) into
/// an [`Asset`], inside a [`LoadContext`] used to declare dependencies and
/// publish labeled sub-assets.
pub trait AssetLoader: Send + Sync + 'static {
    /// The top-level asset this loader produces.
    type Asset: Asset;
    /// Loader configuration, parsed from the meta side-car's
    /// `LoaderSettings` element.
    type Settings: Serialize + DeserializeOwned + Default + Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    fn load<'a>(
        &'a self,
        reader: &'a mut dyn Reader,
        settings: &'a Self::Settings,
        load_context: &'a mut LoadContext<'_>,
    ) -> BoxedFuture<'a, Result<Self::Asset, Self::Error>>;

    /// File extensions this loader serves when the meta names no loader.
    fn extensions(&self) -> &[&str] {
        &[]
    }
}

/// Object-safe facade over a typed [`AssetLoader`].
pub trait ErasedAssetLoader: Send + Sync + 'static {
    fn load<'a>(
        &'a self,
        reader: &'a mut dyn Reader,
        meta: Box<dyn AssetMetaDyn>,
        load_context: LoadContext<'a>,
    ) -> BoxedFuture<'a, Result<ErasedLoadedAsset, AssetLoadError>>;

    fn extensions(&self) -> &[&str];
    fn deserialize_meta(&self, bytes: &[u8]) -> Result<Box<dyn AssetMetaDyn>, DeserializeMetaError>;
    fn default_meta(&self) -> Box<dyn AssetMetaDyn>;
    fn type_name(&self) -> &'static str;
    fn type_id(&self) -> TypeId;
    fn asset_type_name(&self) -> &'static str;
    fn asset_type_id(&self) -> TypeId;
}

impl<L: AssetLoader> ErasedAssetLoader for L {
    fn load<'a>(
        &'a self,
        reader: &'a mut dyn Reader,
        meta: Box<dyn AssetMetaDyn>,
        mut load_context: LoadContext<'a>,
    ) -> BoxedFuture<'a, Result<ErasedLoadedAsset, AssetLoadError>> {
        Box::pin(async move {
            let meta = meta
                .downcast::<AssetMeta<L>>()
                .map_err(|_| AssetLoadError::MismatchedLoaderMeta {
                    path: load_context.asset_path().clone_owned(),
                    loader_name: std::any::type_name::<L>(),
                })?;
            let asset = self
                .load(reader, &meta.asset.settings, &mut load_context)
                .await
                .map_err(|error| AssetLoadError::AssetLoaderError {
                    path: load_context.asset_path().clone_owned(),
                    loader_name: std::any::type_name::<L>(),
                    error: Arc::new(error),
                })?;
            Ok(load_context.finish(asset).into())
        })
    }

    fn extensions(&self) -> &[&str] {
        AssetLoader::extensions(self)
    }

    fn deserialize_meta(&self, bytes: &[u8]) -> Result<Box<dyn AssetMetaDyn>, DeserializeMetaError> {
        Ok(Box::new(AssetMeta::<L>::deserialize(bytes)?))
    }

    fn default_meta(&self) -> Box<dyn AssetMetaDyn> {
        Box::new(AssetMeta::<L>::new(
            crate::meta::AssetActionType::Load,
            L::Settings::default(),
        ))
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<L>()
    }

    fn type_id(&self) -> TypeId {
        TypeId::of::<L>()
    }

    fn asset_type_name(&self) -> &'static str {
        std::any::type_name::<L::Asset>()
    }

    fn asset_type_id(&self) -> TypeId {
        TypeId::of::<L::Asset>()
    }
}

/// A loaded asset plus everything the loader declared about it.
pub struct LoadedAsset<A: Asset> {
    pub(crate) value: A,
    pub(crate) dependencies: HashSet<UntypedAssetId>,
    pub(crate) loader_dependencies: HashMap<AssetPath<'static>, u64>,
    pub(crate) labeled_assets: HashMap<String, LabeledAsset>,
}

impl<A: Asset> LoadedAsset<A> {
    /// Wraps a bare value, collecting the dependencies it declares through
    /// [`VisitAssetDependencies`](crate::VisitAssetDependencies).
    pub fn new_with_dependencies(value: A) -> Self {
        let mut dependencies = HashSet::new();
        value.visit_dependencies(&mut |id| {
            dependencies.insert(id);
        });
        Self {
            value,
            dependencies,
            loader_dependencies: HashMap::new(),
            labeled_assets: HashMap::new(),
        }
    }

    pub fn get(&self) -> &A {
        &self.value
    }

    pub fn take(self) -> A {
        self.value
    }
}

impl<A: Asset> From<A> for LoadedAsset<A> {
    fn from(value: A) -> Self {
        LoadedAsset::new_with_dependencies(value)
    }
}

/// A sub-asset published under a label inside another asset's load.
pub(crate) struct LabeledAsset {
    pub(crate) asset: ErasedLoadedAsset,
    pub(crate) handle: UntypedHandle,
}

/// [`LoadedAsset`] with the value type erased.
pub struct ErasedLoadedAsset {
    pub(crate) value: Box<dyn AssetContainer>,
    pub(crate) dependencies: HashSet<UntypedAssetId>,
    pub(crate) loader_dependencies: HashMap<AssetPath<'static>, u64>,
    pub(crate) labeled_assets: HashMap<String, LabeledAsset>,
}

impl<A: Asset> From<LoadedAsset<A>> for ErasedLoadedAsset {
    fn from(asset: LoadedAsset<A>) -> Self {
        Self {
            value: Box::new(asset.value),
            dependencies: asset.dependencies,
            loader_dependencies: asset.loader_dependencies,
            labeled_assets: asset.labeled_assets,
        }
    }
}

impl ErasedLoadedAsset {
    pub fn asset_type_id(&self) -> TypeId {
        self.value.asset_type_id()
    }

    pub fn asset_type_name(&self) -> &'static str {
        self.value.asset_type_name()
    }

    pub fn dependencies(&self) -> impl Iterator<Item = UntypedAssetId> + '_ {
        self.dependencies.iter().copied()
    }

    pub fn take<A: Asset>(self) -> Option<A> {
        AssetContainer::into_any(self.value).downcast::<A>().map(|value| *value).ok()
    }
}

/// Moves an erased asset value into its typed `Assets<A>` collection.
pub trait AssetContainer: Downcast + Any + Send + Sync + 'static {
    fn insert(self: Box<Self>, id: UntypedAssetId, world: &mut World);
    fn asset_type_id(&self) -> TypeId;
    fn asset_type_name(&self) -> &'static str;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl_downcast!(AssetContainer);

impl<A: Asset> AssetContainer for A {
    fn insert(self: Box<Self>, id: UntypedAssetId, world: &mut World) {
        let Some(mut assets) = world.get_resource_mut::<crate::Assets<A>>() else {
            tracing::error!(
                "cannot store loaded asset {}: call init_asset::<{0}>() first",
                std::any::type_name::<A>()
            );
            return;
        };
        if let Err(error) = assets.insert(id.typed::<A>(), *self) {
            tracing::error!("failed to store loaded asset: {error}");
        }
    }

    fn asset_type_id(&self) -> TypeId {
        TypeId::of::<A>()
    }

    fn asset_type_name(&self) -> &'static str {
        std::any::type_name::<A>()
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// The environment a loader runs in: it records declared dependencies,
/// labeled sub-assets and nested reads, all of which end up in the
/// resulting [`LoadedAsset`].
pub struct LoadContext<'a> {
    server: &'a AssetServer,
    asset_path: AssetPath<'static>,
    dependencies: HashSet<UntypedAssetId>,
    loader_dependencies: HashMap<AssetPath<'static>, u64>,
    labeled_assets: HashMap<String, LabeledAsset>,
}

impl<'a> LoadContext<'a> {
    pub(crate) fn new(server: &'a AssetServer, asset_path: AssetPath<'static>) -> Self {
        Self {
            server,
            asset_path,
            dependencies: HashSet::new(),
            loader_dependencies: HashMap::new(),
            labeled_assets: HashMap::new(),
        }
    }

    /// The path of the asset being loaded.
    pub fn path(&self) -> &std::path::Path {
        self.asset_path.path()
    }

    pub fn asset_path(&self) -> &AssetPath<'static> {
        &self.asset_path
    }

    /// Declares (and starts loading) a dependency of this asset. The
    /// returned handle keeps the dependency alive as long as the caller
    /// stores it.
    pub fn load<A: Asset>(&mut self, path: impl Into<AssetPath<'static>>) -> Handle<A> {
        let handle = self.server.load::<A>(path.into());
        self.dependencies.insert(handle.id().untyped());
        handle
    }

    /// Publishes `asset` as a labeled sub-asset of the one being loaded.
    pub fn add_labeled_asset<A: Asset>(&mut self, label: String, asset: A) -> Handle<A> {
        let labeled_path = self.asset_path.with_label(label.clone()).into_owned();
        let (handle, _) = self.server.get_or_create_path_handle::<A>(
            labeled_path,
            HandleLoadingMode::NotLoading,
        );
        self.labeled_assets.insert(
            label,
            LabeledAsset {
                asset: LoadedAsset::new_with_dependencies(asset).into(),
                handle: handle.clone().untyped(),
            },
        );
        handle
    }

    pub fn has_labeled_asset(&self, label: &str) -> bool {
        self.labeled_assets.contains_key(label)
    }

    /// Reads another asset's raw bytes, recording its content hash so the
    /// load can be invalidated when the nested file changes.
    pub async fn read_asset_bytes(
        &mut self,
        path: AssetPath<'static>,
    ) -> Result<Vec<u8>, AssetReaderError> {
        let source = self
            .server
            .sources()
            .get(path.source())
            .map_err(|_| AssetReaderError::NotFound(path.path().to_path_buf()))?;
        let mut reader = source.read(path.path()).await?;
        let bytes = read_all(&mut *reader, path.path()).await?;
        let hash = blake3::hash(&bytes);
        let hash64 = u64::from_le_bytes(
            hash.as_bytes()[..8]
                .try_into()
                .expect("blake3 hashes are 32 bytes"),
        );
        self.loader_dependencies.insert(path, hash64);
        Ok(bytes)
    }

    /// Seals the context into the final [`LoadedAsset`].
    pub fn finish<A: Asset>(self, value: A) -> LoadedAsset<A> {
        let mut dependencies = self.dependencies;
        value.visit_dependencies(&mut |id| {
            dependencies.insert(id);
        });
        LoadedAsset {
            value,
            dependencies,
            loader_dependencies: self.loader_dependencies,
            labeled_assets: self.labeled_assets,
        }
    }
}
