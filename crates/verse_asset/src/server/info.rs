//! The load-state tracker: one record per live asset id, plus the
//! dependency DAG used to compute recursive load states.

use crate::handle::{AssetHandleProvider, StrongHandle};
use crate::id::UntypedAssetId;
use crate::loader::{AssetContainer, ErasedLoadedAsset};
use crate::path::AssetPath;
use crate::server::{
    AssetLoadError, DependencyLoadState, InternalAssetEvent, LoadState,
    RecursiveDependencyLoadState,
};
use crossbeam_channel::Sender;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use verse_ecs::world::World;
use verse_tasks::Task;

pub(crate) struct AssetInfo {
    /// Resolves iff the asset's sole strong handle is still live.
    weak_handle: Weak<StrongHandle>,
    pub(crate) path: Option<AssetPath<'static>>,
    pub(crate) load_state: LoadState,
    pub(crate) dep_load_state: DependencyLoadState,
    pub(crate) rec_dep_load_state: RecursiveDependencyLoadState,
    loading_dependencies: usize,
    failed_dependencies: usize,
    loading_rec_dependencies: usize,
    failed_rec_dependencies: usize,
    dependents_waiting_on_load: HashSet<UntypedAssetId>,
    dependents_waiting_on_recursive_dep_load: HashSet<UntypedAssetId>,
    /// Pending drop events to ignore because the tracker revived this asset
    /// after its previous handle died.
    handle_drops_to_skip: usize,
    /// Content hashes of the paths the loader read, kept so a future
    /// hot-reload pass can tell which nested reads went stale.
    pub(crate) loader_dependencies: HashMap<AssetPath<'static>, u64>,
}

impl AssetInfo {
    fn new(weak_handle: Weak<StrongHandle>, path: Option<AssetPath<'static>>) -> Self {
        Self {
            weak_handle,
            path,
            load_state: LoadState::NotLoaded,
            dep_load_state: DependencyLoadState::NotLoaded,
            rec_dep_load_state: RecursiveDependencyLoadState::NotLoaded,
            loading_dependencies: 0,
            failed_dependencies: 0,
            loading_rec_dependencies: 0,
            failed_rec_dependencies: 0,
            dependents_waiting_on_load: HashSet::new(),
            dependents_waiting_on_recursive_dep_load: HashSet::new(),
            handle_drops_to_skip: 0,
            loader_dependencies: HashMap::new(),
        }
    }
}

/// Whether (and how eagerly) acquiring a handle should start a load.
#[derive(Copy, Clone, PartialEq, Eq)]
pub(crate) enum HandleLoadingMode {
    /// Just a handle; no load.
    NotLoading,
    /// Start a load unless one already ran or is running.
    Request,
    /// Always start a load, even over a finished one.
    Force,
}

#[derive(Default)]
pub(crate) struct AssetInfos {
    path_to_id: HashMap<AssetPath<'static>, UntypedAssetId>,
    infos: HashMap<UntypedAssetId, AssetInfo>,
    pub(crate) handle_providers: HashMap<TypeId, AssetHandleProvider>,
    /// Writes `AssetEvent::LoadedWithDependencies` for a concrete type.
    pub(crate) loaded_event_senders: HashMap<TypeId, fn(&mut World, UntypedAssetId)>,
    /// Writes `AssetLoadFailedEvent` for a concrete type.
    pub(crate) failed_event_senders:
        HashMap<TypeId, fn(&mut World, UntypedAssetId, AssetPath<'static>, Arc<AssetLoadError>)>,
    /// In-flight load tasks; dropping one cancels the load.
    pub(crate) pending_tasks: HashMap<UntypedAssetId, Task<()>>,
}

impl AssetInfos {
    /// Creates tracking data and a fresh strong handle for a pathless asset
    /// that is already loading.
    pub(crate) fn create_loading_handle(&mut self, type_id: TypeId) -> Arc<StrongHandle> {
        Self::create_handle_internal(&mut self.infos, &self.handle_providers, type_id, None, true)
    }

    fn create_handle_internal(
        infos: &mut HashMap<UntypedAssetId, AssetInfo>,
        handle_providers: &HashMap<TypeId, AssetHandleProvider>,
        type_id: TypeId,
        path: Option<AssetPath<'static>>,
        loading: bool,
    ) -> Arc<StrongHandle> {
        let provider = handle_providers.get(&type_id).unwrap_or_else(|| {
            panic!("cannot create a handle for unregistered asset type {type_id:?}; call init_asset first")
        });
        let handle = provider.reserve_handle_internal(true, path.clone());
        let mut info = AssetInfo::new(Arc::downgrade(&handle), path);
        if loading {
            info.load_state = LoadState::Loading;
            info.dep_load_state = DependencyLoadState::Loading;
            info.rec_dep_load_state = RecursiveDependencyLoadState::Loading;
        }
        infos.insert(handle.id, info);
        handle
    }

    /// Looks up (or creates) the tracking data for `path`. Returns the
    /// strong handle and whether the caller should start a load.
    ///
    /// If all previous handles died but their drop events have not been
    /// processed yet, the asset is revived: a fresh strong handle is
    /// created and one pending drop is marked to be skipped.
    pub(crate) fn get_or_create_path_handle(
        &mut self,
        path: AssetPath<'static>,
        type_id: TypeId,
        loading_mode: HandleLoadingMode,
    ) -> (Arc<StrongHandle>, bool) {
        match self.path_to_id.get(&path).copied() {
            Some(id) => {
                let info = self
                    .infos
                    .get_mut(&id)
                    .expect("path_to_id entries always have infos");
                let mut should_load = false;
                if loading_mode == HandleLoadingMode::Force
                    || (loading_mode == HandleLoadingMode::Request
                        && matches!(
                            info.load_state,
                            LoadState::NotLoaded | LoadState::Failed(_)
                        ))
                {
                    info.load_state = LoadState::Loading;
                    info.dep_load_state = DependencyLoadState::Loading;
                    info.rec_dep_load_state = RecursiveDependencyLoadState::Loading;
                    should_load = true;
                }

                if let Some(strong_handle) = info.weak_handle.upgrade() {
                    // a live handle exists; share it
                    (strong_handle, should_load)
                } else {
                    // every handle died, but the drop has not been processed:
                    // revive, and absorb exactly one pending drop event
                    info.handle_drops_to_skip += 1;
                    let provider = self.handle_providers.get(&type_id).unwrap_or_else(|| {
                        panic!("cannot create a handle for unregistered asset type {type_id:?}")
                    });
                    let handle = provider.get_handle(id.internal(), true, Some(path));
                    info.weak_handle = Arc::downgrade(&handle);
                    (handle, should_load)
                }
            }
            None => {
                let should_load = match loading_mode {
                    HandleLoadingMode::NotLoading => false,
                    HandleLoadingMode::Request | HandleLoadingMode::Force => true,
                };
                let handle = Self::create_handle_internal(
                    &mut self.infos,
                    &self.handle_providers,
                    type_id,
                    Some(path.clone()),
                    should_load,
                );
                self.path_to_id.insert(path, handle.id);
                (handle, should_load)
            }
        }
    }

    pub(crate) fn get(&self, id: UntypedAssetId) -> Option<&AssetInfo> {
        self.infos.get(&id)
    }

    pub(crate) fn get_path_id(&self, path: &AssetPath<'static>) -> Option<UntypedAssetId> {
        self.path_to_id.get(path).copied()
    }

    pub(crate) fn get_path_handle(&self, path: &AssetPath<'static>) -> Option<Arc<StrongHandle>> {
        let id = self.path_to_id.get(path)?;
        self.infos.get(id)?.weak_handle.upgrade()
    }

    pub(crate) fn get_id_handle(&self, id: UntypedAssetId) -> Option<Arc<StrongHandle>> {
        self.infos.get(&id)?.weak_handle.upgrade()
    }

    /// Registers a finished load: stores the typed value, partitions the
    /// declared dependencies by their current state, updates this asset's
    /// own and dependency load states, and notifies everything that was
    /// waiting on it.
    pub(crate) fn process_asset_load(
        &mut self,
        loaded_asset_id: UntypedAssetId,
        loaded_asset: ErasedLoadedAsset,
        world: &mut World,
        sender: &Sender<InternalAssetEvent>,
    ) {
        // late event from a cancelled or superseded task
        if !self.infos.contains_key(&loaded_asset_id) {
            tracing::debug!("dropping load result for unknown asset {loaded_asset_id:?}");
            return;
        }

        let dependencies: Vec<UntypedAssetId> = loaded_asset.dependencies().collect();
        let loader_dependencies = loaded_asset.loader_dependencies;
        loaded_asset.value.insert(loaded_asset_id, world);

        let mut loading_deps = dependencies.len();
        let mut failed_deps = 0;
        let mut first_dep_error: Option<Arc<AssetLoadError>> = None;
        let mut loading_rec_deps = dependencies.len();
        let mut failed_rec_deps = 0;
        let mut first_rec_dep_error: Option<Arc<AssetLoadError>> = None;

        for dep_id in &dependencies {
            match self.infos.get_mut(dep_id) {
                Some(dep_info) => {
                    match &dep_info.load_state {
                        LoadState::NotLoaded | LoadState::Loading => {
                            // wait for it
                            dep_info.dependents_waiting_on_load.insert(loaded_asset_id);
                        }
                        LoadState::Loaded => {
                            loading_deps -= 1;
                        }
                        LoadState::Failed(error) => {
                            first_dep_error.get_or_insert_with(|| error.clone());
                            failed_deps += 1;
                            loading_deps -= 1;
                        }
                    }
                    match &dep_info.rec_dep_load_state {
                        RecursiveDependencyLoadState::NotLoaded
                        | RecursiveDependencyLoadState::Loading => {
                            dep_info
                                .dependents_waiting_on_recursive_dep_load
                                .insert(loaded_asset_id);
                        }
                        RecursiveDependencyLoadState::Loaded => {
                            loading_rec_deps -= 1;
                        }
                        RecursiveDependencyLoadState::Failed(error) => {
                            first_rec_dep_error.get_or_insert_with(|| error.clone());
                            failed_rec_deps += 1;
                            loading_rec_deps -= 1;
                        }
                    }
                }
                None => {
                    // the dependency id was never registered (or manually
                    // removed); it can never resolve
                    tracing::warn!(
                        "dependency {dep_id:?} of {loaded_asset_id:?} is unknown; its load states \
                         will not reach Loaded until the dependency appears"
                    );
                }
            }
        }

        let dep_load_state = match (loading_deps, failed_deps) {
            (0, 0) => DependencyLoadState::Loaded,
            (_, 0) => DependencyLoadState::Loading,
            (_, _) => DependencyLoadState::Failed(
                first_dep_error.expect("failed dependencies recorded an error"),
            ),
        };
        let rec_dep_load_state = match (loading_rec_deps, failed_rec_deps) {
            (0, 0) => {
                sender
                    .send(InternalAssetEvent::LoadedWithDependencies {
                        id: loaded_asset_id,
                    })
                    .expect("unbounded channel send cannot fail");
                RecursiveDependencyLoadState::Loaded
            }
            (_, 0) => RecursiveDependencyLoadState::Loading,
            (_, _) => RecursiveDependencyLoadState::Failed(
                first_rec_dep_error.expect("failed recursive dependencies recorded an error"),
            ),
        };

        let (waiting_on_load, waiting_on_rec_load) = {
            let info = self
                .infos
                .get_mut(&loaded_asset_id)
                .expect("checked at entry");
            info.loading_dependencies = loading_deps;
            info.failed_dependencies = failed_deps;
            info.loading_rec_dependencies = loading_rec_deps;
            info.failed_rec_dependencies = failed_rec_deps;
            info.load_state = LoadState::Loaded;
            info.dep_load_state = dep_load_state;
            info.rec_dep_load_state = rec_dep_load_state.clone();
            info.loader_dependencies = loader_dependencies;

            let waiting_on_rec_load = matches!(
                rec_dep_load_state,
                RecursiveDependencyLoadState::Loaded | RecursiveDependencyLoadState::Failed(_)
            )
            .then(|| std::mem::take(&mut info.dependents_waiting_on_recursive_dep_load));
            (
                std::mem::take(&mut info.dependents_waiting_on_load),
                waiting_on_rec_load,
            )
        };

        for dependent in waiting_on_load {
            if let Some(info) = self.infos.get_mut(&dependent) {
                info.loading_dependencies -= 1;
                if info.loading_dependencies == 0 && info.failed_dependencies == 0 {
                    info.dep_load_state = DependencyLoadState::Loaded;
                }
            }
        }

        if let Some(waiting) = waiting_on_rec_load {
            match rec_dep_load_state {
                RecursiveDependencyLoadState::Loaded => {
                    for dependent in waiting {
                        self.propagate_loaded_state(dependent, sender);
                    }
                }
                RecursiveDependencyLoadState::Failed(error) => {
                    for dependent in waiting {
                        self.propagate_failed_state(dependent, &error);
                    }
                }
                RecursiveDependencyLoadState::Loading
                | RecursiveDependencyLoadState::NotLoaded => {
                    unreachable!("only terminal states drain the recursive waiter set")
                }
            }
        }
    }

    /// One of `id`'s recursive dependencies became fully loaded.
    fn propagate_loaded_state(&mut self, id: UntypedAssetId, sender: &Sender<InternalAssetEvent>) {
        let waiting = if let Some(info) = self.infos.get_mut(&id) {
            info.loading_rec_dependencies -= 1;
            if info.loading_rec_dependencies == 0 && info.failed_rec_dependencies == 0 {
                info.rec_dep_load_state = RecursiveDependencyLoadState::Loaded;
                if matches!(info.load_state, LoadState::Loaded) {
                    sender
                        .send(InternalAssetEvent::LoadedWithDependencies { id })
                        .expect("unbounded channel send cannot fail");
                }
                Some(std::mem::take(
                    &mut info.dependents_waiting_on_recursive_dep_load,
                ))
            } else {
                None
            }
        } else {
            None
        };
        if let Some(waiting) = waiting {
            for dependent in waiting {
                self.propagate_loaded_state(dependent, sender);
            }
        }
    }

    /// One of `id`'s recursive dependencies failed; the error is re-raised
    /// unchanged to every transitive dependent.
    fn propagate_failed_state(&mut self, id: UntypedAssetId, error: &Arc<AssetLoadError>) {
        let waiting = if let Some(info) = self.infos.get_mut(&id) {
            info.loading_rec_dependencies -= 1;
            info.failed_rec_dependencies += 1;
            info.rec_dep_load_state = RecursiveDependencyLoadState::Failed(error.clone());
            Some(std::mem::take(
                &mut info.dependents_waiting_on_recursive_dep_load,
            ))
        } else {
            None
        };
        if let Some(waiting) = waiting {
            for dependent in waiting {
                self.propagate_failed_state(dependent, error);
            }
        }
    }

    /// Registers a failed load: all three states become `Failed` and the
    /// failure propagates to every waiting dependent.
    pub(crate) fn process_asset_fail(&mut self, id: UntypedAssetId, error: Arc<AssetLoadError>) {
        let (waiting_on_load, waiting_on_rec_load) = {
            let Some(info) = self.infos.get_mut(&id) else {
                tracing::debug!("dropping load failure for unknown asset {id:?}");
                return;
            };
            info.load_state = LoadState::Failed(error.clone());
            info.dep_load_state = DependencyLoadState::Failed(error.clone());
            info.rec_dep_load_state = RecursiveDependencyLoadState::Failed(error.clone());
            (
                std::mem::take(&mut info.dependents_waiting_on_load),
                std::mem::take(&mut info.dependents_waiting_on_recursive_dep_load),
            )
        };

        for dependent in waiting_on_load {
            if let Some(info) = self.infos.get_mut(&dependent) {
                info.loading_dependencies -= 1;
                info.failed_dependencies += 1;
                info.dep_load_state = DependencyLoadState::Failed(error.clone());
            }
        }
        for dependent in waiting_on_rec_load {
            self.propagate_failed_state(dependent, &error);
        }
    }

    /// Handles one drop event. Returns `true` if the asset's storage slot
    /// should be released; `false` if the drop was absorbed by a revival or
    /// the id is unknown.
    pub(crate) fn process_handle_drop(&mut self, id: UntypedAssetId) -> bool {
        let Some(info) = self.infos.get_mut(&id) else {
            // already removed, or never server-managed
            return false;
        };
        if info.handle_drops_to_skip > 0 {
            info.handle_drops_to_skip -= 1;
            return false;
        }
        let info = self.infos.remove(&id).expect("checked above");
        self.pending_tasks.remove(&id);
        if let Some(path) = info.path {
            self.path_to_id.remove(&path);
        }
        true
    }
}
