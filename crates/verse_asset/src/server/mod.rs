//! The asset server: load orchestration, loader selection and load-state
//! queries.

mod info;
mod loaders;

pub(crate) use info::{AssetInfos, HandleLoadingMode};
pub use loaders::{MissingAssetLoaderForExtensionError, MissingAssetLoaderForTypeNameError};
pub(crate) use loaders::AssetLoaders;

use crate::assets::Assets;
use crate::events::{AssetEvent, AssetLoadFailedEvent, UntypedAssetLoadFailedEvent};
use crate::handle::Handle;
use crate::id::{AssetId, UntypedAssetId};
use crate::io::{
    read_all, AssetReaderError, AssetSources, MissingAssetSourceError,
};
use crate::loader::{AssetLoader, ErasedAssetLoader, ErasedLoadedAsset, LoadContext};
use crate::meta::{AssetActionType, AssetMetaMinimal, DeserializeMetaError};
use crate::path::AssetPath;
use crate::Asset;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::any::TypeId;
use std::sync::Arc;
use thiserror::Error;
use verse_ecs::resource::Resource;
use verse_ecs::world::World;
use verse_tasks::IoTaskPool;

/// The load state of a single asset.
#[derive(Clone, Debug, Default)]
pub enum LoadState {
    /// No load was ever requested.
    #[default]
    NotLoaded,
    /// A load task is in flight.
    Loading,
    /// The asset bytes finished loading.
    Loaded,
    /// The load failed; the error is shared with every dependent.
    Failed(Arc<AssetLoadError>),
}

impl LoadState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// The aggregate load state of an asset's direct dependencies.
#[derive(Clone, Debug, Default)]
pub enum DependencyLoadState {
    #[default]
    NotLoaded,
    Loading,
    Loaded,
    Failed(Arc<AssetLoadError>),
}

impl DependencyLoadState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded)
    }
}

/// The aggregate load state over the transitive closure of an asset's
/// dependencies. `Loaded` only once the asset itself and everything
/// reachable from it finished loading.
#[derive(Clone, Debug, Default)]
pub enum RecursiveDependencyLoadState {
    #[default]
    NotLoaded,
    Loading,
    Loaded,
    Failed(Arc<AssetLoadError>),
}

impl RecursiveDependencyLoadState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Why a load failed. Never fatal: the failure is recorded on the asset id
/// and propagated to its dependents.
#[derive(Error, Debug)]
pub enum AssetLoadError {
    #[error(transparent)]
    MissingAssetSource(#[from] MissingAssetSourceError),
    #[error(transparent)]
    AssetReaderError(#[from] AssetReaderError),
    #[error(transparent)]
    DeserializeMeta(#[from] DeserializeMetaError),
    #[error(transparent)]
    MissingAssetLoaderForExtension(#[from] MissingAssetLoaderForExtensionError),
    #[error(transparent)]
    MissingAssetLoaderForTypeName(#[from] MissingAssetLoaderForTypeNameError),
    #[error("asset '{path}' is configured for processing and cannot be loaded directly")]
    CannotLoadProcessedAsset { path: AssetPath<'static> },
    #[error("asset '{path}' is configured to be ignored")]
    CannotLoadIgnoredAsset { path: AssetPath<'static> },
    #[error("loader {loader_name} cannot parse the meta of '{path}'")]
    MismatchedLoaderMeta {
        path: AssetPath<'static>,
        loader_name: &'static str,
    },
    #[error("asset '{path}' has no labeled sub-asset named {label:?}")]
    MissingAssetLabel {
        path: AssetPath<'static>,
        label: String,
    },
    #[error(
        "requested asset '{path}' with type {requested_type:?}, but its loader {loader_name} \
         produces {actual_asset_name}"
    )]
    RequestedHandleTypeMismatch {
        path: AssetPath<'static>,
        requested_type: TypeId,
        loader_name: &'static str,
        actual_asset_name: &'static str,
    },
    #[error("loader {loader_name} failed to load '{path}': {error}")]
    AssetLoaderError {
        path: AssetPath<'static>,
        loader_name: &'static str,
        error: Arc<dyn std::error::Error + Send + Sync>,
    },
}

/// Events flowing from load tasks into the tracker.
pub(crate) enum InternalAssetEvent {
    Loaded {
        id: UntypedAssetId,
        loaded_asset: ErasedLoadedAsset,
    },
    LoadedWithDependencies {
        id: UntypedAssetId,
    },
    Failed {
        id: UntypedAssetId,
        path: AssetPath<'static>,
        error: AssetLoadError,
    },
}

pub(crate) struct AssetServerData {
    pub(crate) infos: RwLock<AssetInfos>,
    pub(crate) loaders: RwLock<AssetLoaders>,
    asset_event_sender: Sender<InternalAssetEvent>,
    asset_event_receiver: Receiver<InternalAssetEvent>,
    sources: AssetSources,
}

/// Loads assets from registered [`AssetSources`] and tracks their load
/// states. Cheap to clone; clones share state and may be used from any
/// thread.
#[derive(Clone)]
pub struct AssetServer {
    pub(crate) data: Arc<AssetServerData>,
}

impl Resource for AssetServer {}

impl AssetServer {
    pub fn new(sources: AssetSources) -> Self {
        let (asset_event_sender, asset_event_receiver) = crossbeam_channel::unbounded();
        Self {
            data: Arc::new(AssetServerData {
                infos: RwLock::new(AssetInfos::default()),
                loaders: RwLock::new(AssetLoaders::default()),
                asset_event_sender,
                asset_event_receiver,
                sources,
            }),
        }
    }

    /// The registered byte sources.
    pub fn sources(&self) -> &AssetSources {
        &self.data.sources
    }

    pub(crate) fn write_infos(&self) -> RwLockWriteGuard<'_, AssetInfos> {
        self.data.infos.write()
    }

    /// Registers a loader. Loaders must be registered before a load can
    /// select them.
    pub fn register_loader<L: AssetLoader>(&self, loader: L) {
        self.data.loaders.write().push(loader);
    }

    /// Connects an asset type's storage to this server: its handle provider
    /// and the per-type event bridges.
    pub fn register_asset<A: Asset>(&self, assets: &Assets<A>) {
        fn loaded_sender<A: Asset>(world: &mut World, id: UntypedAssetId) {
            world.send_event(AssetEvent::<A>::LoadedWithDependencies {
                id: id.typed_unchecked(),
            });
        }
        fn failed_sender<A: Asset>(
            world: &mut World,
            id: UntypedAssetId,
            path: AssetPath<'static>,
            error: Arc<AssetLoadError>,
        ) {
            let event = AssetLoadFailedEvent::<A> {
                id: id.typed_unchecked(),
                path,
                error,
            };
            world.send_event(UntypedAssetLoadFailedEvent::from(&event));
            world.send_event(event);
        }

        let mut infos = self.data.infos.write();
        let type_id = TypeId::of::<A>();
        infos
            .handle_providers
            .insert(type_id, assets.get_handle_provider());
        infos
            .loaded_event_senders
            .insert(type_id, loaded_sender::<A>);
        infos
            .failed_event_senders
            .insert(type_id, failed_sender::<A>);
    }

    // ----- loading ----------------------------------------------------------

    /// Begins loading the asset at `path` and immediately returns a strong
    /// handle to it. Repeated calls for the same path share one handle. The
    /// actual work happens on the IO task pool; progress is observable
    /// through [`AssetServer::get_load_state`] and the queued asset events.
    pub fn load<'a, A: Asset>(&self, path: impl Into<AssetPath<'a>>) -> Handle<A> {
        let path = path.into().into_owned();
        let (handle, should_load) =
            self.get_or_create_path_handle::<A>(path.clone(), HandleLoadingMode::Request);
        if should_load {
            self.spawn_load_task(handle.id().untyped(), path);
        }
        handle
    }

    /// Re-runs the load for `path` even if it already completed. A no-op
    /// for paths that were never requested.
    pub fn reload<'a>(&self, path: impl Into<AssetPath<'a>>) {
        let path = path.into().into_owned();
        let existing = {
            let mut infos = self.data.infos.write();
            infos.get_path_id(&path).map(|id| {
                let (handle, should_load) = infos.get_or_create_path_handle(
                    path.clone(),
                    id.type_id(),
                    HandleLoadingMode::Force,
                );
                (handle.id, should_load)
            })
        };
        match existing {
            Some((id, true)) => self.spawn_load_task(id, path),
            Some((_, false)) => {}
            None => tracing::warn!("cannot reload unknown asset path '{path}'"),
        }
    }

    /// Stores an already-built asset value under a fresh id, as if it had
    /// loaded instantly.
    pub fn add<A: Asset>(&self, asset: A) -> Handle<A> {
        let handle = {
            let mut infos = self.data.infos.write();
            infos.create_loading_handle(TypeId::of::<A>())
        };
        let id = handle.id;
        self.send_asset_event(InternalAssetEvent::Loaded {
            id,
            loaded_asset: crate::loader::LoadedAsset::new_with_dependencies(asset).into(),
        });
        Handle::Strong(handle)
    }

    pub(crate) fn get_or_create_path_handle<A: Asset>(
        &self,
        path: AssetPath<'static>,
        mode: HandleLoadingMode,
    ) -> (Handle<A>, bool) {
        let mut infos = self.data.infos.write();
        let (handle, should_load) =
            infos.get_or_create_path_handle(path, TypeId::of::<A>(), mode);
        assert_eq!(
            handle.id.type_id(),
            TypeId::of::<A>(),
            "asset path was previously requested as a different asset type"
        );
        (Handle::Strong(handle), should_load)
    }

    fn spawn_load_task(&self, id: UntypedAssetId, path: AssetPath<'static>) {
        let server = self.clone();
        let task_path = path.clone();
        let task = IoTaskPool::get().spawn(async move {
            match server.load_internal(id, &task_path).await {
                Ok((base_id, loaded_asset)) => {
                    if let Some(label) = task_path.label() {
                        if !loaded_asset.labeled_assets.contains_key(label) {
                            server.send_asset_event(InternalAssetEvent::Failed {
                                id,
                                path: task_path.clone(),
                                error: AssetLoadError::MissingAssetLabel {
                                    path: task_path.clone_owned(),
                                    label: label.to_string(),
                                },
                            });
                            return;
                        }
                    }
                    server.send_loaded_events(base_id, loaded_asset);
                }
                Err(error) => {
                    tracing::error!("failed to load asset '{task_path}': {error}");
                    server.send_asset_event(InternalAssetEvent::Failed {
                        id,
                        path: task_path.clone(),
                        error,
                    });
                }
            }
        });
        let mut infos = self.data.infos.write();
        if infos
            .get(id)
            .is_some_and(|info| matches!(info.load_state, LoadState::Loading))
        {
            infos.pending_tasks.insert(id, task);
        } else {
            // the load already finished (or the asset died); let the task
            // run out unobserved
            task.detach();
        }
    }

    /// The load pipeline: open streams, parse meta, select a loader, run it.
    /// A labeled request loads its base asset; the labeled sub-asset is
    /// extracted from the result by the caller. Returns the base asset's id
    /// alongside the loaded value.
    async fn load_internal(
        &self,
        id: UntypedAssetId,
        path: &AssetPath<'static>,
    ) -> Result<(UntypedAssetId, ErasedLoadedAsset), AssetLoadError> {
        let base_path = path.without_label().into_owned();
        let source = self.data.sources.get(base_path.source())?;
        // for direct requests the loader must produce the requested type;
        // for labeled requests the base type comes from the loader
        let type_hint = path.label().is_none().then(|| id.type_id());

        let (loader, meta) = match source.read_meta(base_path.path()).await {
            Ok(mut meta_reader) => {
                let meta_bytes = read_all(&mut *meta_reader, base_path.path()).await?;
                let minimal = AssetMetaMinimal::deserialize(&meta_bytes)?;
                match minimal.asset.ty {
                    AssetActionType::Ignore => {
                        return Err(AssetLoadError::CannotLoadIgnoredAsset {
                            path: base_path.clone_owned(),
                        })
                    }
                    AssetActionType::Process => {
                        return Err(AssetLoadError::CannotLoadProcessedAsset {
                            path: base_path.clone_owned(),
                        })
                    }
                    AssetActionType::Load => {}
                }
                let loader = if minimal.asset.name.is_empty() {
                    self.data
                        .loaders
                        .read()
                        .find_by_type_and_extension(type_hint, &base_path)?
                } else {
                    self.data.loaders.read().find_by_name(&minimal.asset.name)?
                };
                let meta = loader.deserialize_meta(&meta_bytes)?;
                (loader, meta)
            }
            // no meta is equivalent to `Type=Load` with default settings
            Err(AssetReaderError::NotFound(_)) => {
                let loader = self
                    .data
                    .loaders
                    .read()
                    .find_by_type_and_extension(type_hint, &base_path)?;
                let meta = loader.default_meta();
                (loader, meta)
            }
            Err(error) => return Err(error.into()),
        };

        let base_id = match type_hint {
            Some(requested_type) => {
                if loader.asset_type_id() != requested_type {
                    return Err(AssetLoadError::RequestedHandleTypeMismatch {
                        path: base_path.clone_owned(),
                        requested_type,
                        loader_name: loader.type_name(),
                        actual_asset_name: loader.asset_type_name(),
                    });
                }
                id
            }
            None => {
                // a labeled request: make sure the base asset is tracked.
                // the temporary strong handle dies with this task; until a
                // direct request revives it, only the labeled sub-assets
                // outlive the load.
                let (base_handle, _) = self.data.infos.write().get_or_create_path_handle(
                    base_path.clone_owned(),
                    loader.asset_type_id(),
                    HandleLoadingMode::NotLoading,
                );
                base_handle.id
            }
        };

        let mut reader = source.read(base_path.path()).await?;
        let load_context = LoadContext::new(self, base_path.clone_owned());
        let loaded = loader.load(&mut *reader, meta, load_context).await?;
        Ok((base_id, loaded))
    }

    /// Emits `Loaded` events for an asset and, first, all of its labeled
    /// sub-assets (each has its own id and load state).
    fn send_loaded_events(&self, id: UntypedAssetId, mut loaded_asset: ErasedLoadedAsset) {
        let labeled: Vec<_> = loaded_asset.labeled_assets.drain().collect();
        for (_, labeled_asset) in labeled {
            self.send_loaded_events(labeled_asset.handle.id(), labeled_asset.asset);
        }
        self.send_asset_event(InternalAssetEvent::Loaded { id, loaded_asset });
    }

    pub(crate) fn send_asset_event(&self, event: InternalAssetEvent) {
        self.data
            .asset_event_sender
            .send(event)
            .expect("unbounded channel send cannot fail");
    }

    // ----- state queries ----------------------------------------------------

    pub fn get_load_state(&self, id: impl Into<UntypedAssetId>) -> Option<LoadState> {
        let infos = self.data.infos.read();
        infos.get(id.into()).map(|info| info.load_state.clone())
    }

    pub fn get_dependency_load_state(
        &self,
        id: impl Into<UntypedAssetId>,
    ) -> Option<DependencyLoadState> {
        let infos = self.data.infos.read();
        infos.get(id.into()).map(|info| info.dep_load_state.clone())
    }

    pub fn get_recursive_dependency_load_state(
        &self,
        id: impl Into<UntypedAssetId>,
    ) -> Option<RecursiveDependencyLoadState> {
        let infos = self.data.infos.read();
        infos
            .get(id.into())
            .map(|info| info.rec_dep_load_state.clone())
    }

    pub fn is_loaded(&self, id: impl Into<UntypedAssetId>) -> bool {
        self.get_load_state(id).is_some_and(|state| state.is_loaded())
    }

    /// `true` once the asset and its entire dependency tree are loaded.
    pub fn is_loaded_with_dependencies(&self, id: impl Into<UntypedAssetId>) -> bool {
        self.get_recursive_dependency_load_state(id)
            .is_some_and(|state| state.is_loaded())
    }

    /// A live strong handle for `path`, if the asset is known and alive.
    pub fn get_handle<'a, A: Asset>(&self, path: impl Into<AssetPath<'a>>) -> Option<Handle<A>> {
        let path = path.into().into_owned();
        let infos = self.data.infos.read();
        let strong = infos.get_path_handle(&path)?;
        (strong.id.type_id() == TypeId::of::<A>()).then(|| Handle::Strong(strong))
    }

    pub fn get_id_handle<A: Asset>(&self, id: AssetId<A>) -> Option<Handle<A>> {
        let infos = self.data.infos.read();
        let strong = infos.get_id_handle(id.untyped())?;
        Some(Handle::Strong(strong))
    }

    /// The path `id` was loaded from, if any.
    pub fn get_path(&self, id: impl Into<UntypedAssetId>) -> Option<AssetPath<'static>> {
        let infos = self.data.infos.read();
        infos.get(id.into())?.path.clone()
    }

    /// The content hashes of the nested reads recorded while `id` loaded,
    /// keyed by path. Hot-reload walkers compare these against fresh hashes
    /// to find stale loads.
    pub fn get_loader_dependencies(
        &self,
        id: impl Into<UntypedAssetId>,
    ) -> Option<std::collections::HashMap<AssetPath<'static>, u64>> {
        let infos = self.data.infos.read();
        Some(infos.get(id.into())?.loader_dependencies.clone())
    }

}

/// A system that drains the internal asset event channel into the tracker:
/// loaded values land in their `Assets<A>` storage, load states update,
/// dependents get notified, and the user-visible per-type events are
/// queued. Runs with exclusive world access early in the tick.
pub fn handle_internal_asset_events(world: &mut World) {
    let server = world.resource::<AssetServer>().clone();
    let mut infos = server.data.infos.write();
    let mut loaded_with_dependencies = Vec::new();
    let mut failed = Vec::new();
    // process_asset_load may push more LoadedWithDependencies events while
    // this drains; try_iter observes them in the same pass
    while let Ok(event) = server.data.asset_event_receiver.try_recv() {
        match event {
            InternalAssetEvent::Loaded { id, loaded_asset } => {
                infos.pending_tasks.remove(&id);
                infos.process_asset_load(id, loaded_asset, world, &server.data.asset_event_sender);
            }
            InternalAssetEvent::LoadedWithDependencies { id } => {
                loaded_with_dependencies.push(id);
            }
            InternalAssetEvent::Failed { id, path, error } => {
                let error = Arc::new(error);
                infos.pending_tasks.remove(&id);
                infos.process_asset_fail(id, error.clone());
                failed.push((id, path, error));
            }
        }
    }
    for id in loaded_with_dependencies {
        if let Some(sender) = infos.loaded_event_senders.get(&id.type_id()).copied() {
            sender(world, id);
        }
    }
    for (id, path, error) in failed {
        if let Some(sender) = infos.failed_event_senders.get(&id.type_id()).copied() {
            sender(world, id, path, error);
        }
    }
}
