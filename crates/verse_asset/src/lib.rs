//! Asynchronous asset loading for the Verse engine.
//!
//! The pipeline: [`AssetServer::load`] returns a strong [`Handle`]
//! immediately and spawns a background task that opens the asset (and its
//! XML meta side-car) from an [`io::AssetSource`], selects an
//! [`AssetLoader`], and runs it. Results flow through an internal event
//! channel into the load-state tracker, which resolves dependency and
//! recursive-dependency states and queues the user-visible [`AssetEvent`]s.
//! Dropping the last clone of a strong handle eventually frees the asset.

// so the derive macros resolve `verse_asset::` paths from within this crate
extern crate self as verse_asset;

mod assets;
mod events;
mod handle;
mod id;
mod index;
mod loader;
mod meta;
mod path;
mod server;

pub mod io;

pub use assets::{Assets, InvalidGenerationError};
pub use events::{AssetEvent, AssetLoadFailedEvent, UntypedAssetLoadFailedEvent};
pub use handle::{AssetHandleProvider, Handle, StrongHandle, UntypedHandle};
pub use id::{AssetId, UntypedAssetId};
pub use index::{AssetIndex, AssetIndexAllocator};
pub use loader::{
    AssetContainer, AssetLoader, ErasedAssetLoader, ErasedLoadedAsset, LoadContext, LoadedAsset,
};
pub use meta::{
    meta_path, AssetAction, AssetActionType, AssetMeta, AssetMetaDyn, AssetMetaMinimal,
    DeserializeMetaError, ProcessDependencyInfo, ProcessedInfo, META_FORMAT_VERSION,
};
pub use path::{AssetPath, AssetSourceId, ParseAssetPathError};
pub use server::{
    handle_internal_asset_events, AssetLoadError, AssetServer, DependencyLoadState, LoadState,
    MissingAssetLoaderForExtensionError, MissingAssetLoaderForTypeNameError,
    RecursiveDependencyLoadState,
};
pub use verse_asset_macros::{Asset, VisitAssetDependencies};

use std::future::Future;
use std::pin::Pin;
use verse_app::{App, Last, Plugin, PostUpdate, PreUpdate};
use verse_ecs::prelude::*;
use verse_ecs::resource::FromWorld;

/// A pinned, boxed, `Send` future, as returned by loaders and sources.
pub type BoxedFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A value managed by the asset system. Prefer `#[derive(Asset)]`.
pub trait Asset: VisitAssetDependencies + Send + Sync + 'static {}

/// Enumerates the asset ids a value references as dependencies.
pub trait VisitAssetDependencies {
    fn visit_dependencies(&self, visit: &mut dyn FnMut(UntypedAssetId));
}

impl<A: Asset> VisitAssetDependencies for Handle<A> {
    fn visit_dependencies(&self, visit: &mut dyn FnMut(UntypedAssetId)) {
        visit(self.id().untyped());
    }
}

impl<A: Asset> VisitAssetDependencies for Option<Handle<A>> {
    fn visit_dependencies(&self, visit: &mut dyn FnMut(UntypedAssetId)) {
        if let Some(handle) = self {
            visit(handle.id().untyped());
        }
    }
}

impl<A: Asset> VisitAssetDependencies for Vec<Handle<A>> {
    fn visit_dependencies(&self, visit: &mut dyn FnMut(UntypedAssetId)) {
        for handle in self {
            visit(handle.id().untyped());
        }
    }
}

impl VisitAssetDependencies for UntypedHandle {
    fn visit_dependencies(&self, visit: &mut dyn FnMut(UntypedAssetId)) {
        visit(self.id());
    }
}

/// Systems draining handle-drop channels, in `PostUpdate`.
#[derive(SystemSet, Clone, Debug, PartialEq, Eq, Hash)]
pub struct AssetTrackingSystems;

/// Systems flushing queued asset events, in `Last`.
#[derive(SystemSet, Clone, Debug, PartialEq, Eq, Hash)]
pub struct AssetEventSystems;

/// Installs the [`AssetServer`] and the systems that drive it.
///
/// A custom server (for example one reading from memory) can be inserted as
/// a resource before this plugin builds; it is then left untouched.
pub struct AssetPlugin {
    /// Root directory of the default filesystem source.
    pub file_path: String,
}

impl Default for AssetPlugin {
    fn default() -> Self {
        Self {
            file_path: "assets".to_string(),
        }
    }
}

impl Plugin for AssetPlugin {
    fn build(&self, app: &mut App) {
        if !app.world().contains_resource::<AssetServer>() {
            let sources = io::AssetSources::new(io::FileAssetSource::new(&self.file_path));
            app.insert_resource(AssetServer::new(sources));
        }
        app.add_event::<UntypedAssetLoadFailedEvent>();
        app.add_systems(
            PreUpdate,
            // exclusive; deliberately unordered against app systems that
            // happen to share the schedule
            handle_internal_asset_events.ambiguous_with_all(),
        );
        app.configure_sets(PostUpdate, AssetTrackingSystems);
        app.configure_sets(Last, AssetEventSystems);
    }
}

/// App-side registration of asset types, loaders and sources.
pub trait AssetApp {
    /// Registers the asset type `A`: its [`Assets`] storage, its events,
    /// and the systems tracking its handles.
    fn init_asset<A: Asset>(&mut self) -> &mut Self;

    /// Registers an asset loader instance.
    fn register_asset_loader<L: AssetLoader>(&mut self, loader: L) -> &mut Self;

    /// Registers `L::from_world(..)` as a loader.
    fn init_asset_loader<L: AssetLoader + FromWorld>(&mut self) -> &mut Self;
}

impl AssetApp for App {
    fn init_asset<A: Asset>(&mut self) -> &mut Self {
        if self.world().contains_resource::<Assets<A>>() {
            return self;
        }
        let assets = Assets::<A>::default();
        if let Some(server) = self.world().get_resource::<AssetServer>() {
            server.register_asset(&assets);
        }
        self.insert_resource(assets)
            .add_event::<AssetEvent<A>>()
            .add_event::<AssetLoadFailedEvent<A>>()
            .add_systems(
                PostUpdate,
                Assets::<A>::track_assets.in_set(AssetTrackingSystems),
            )
            .add_systems(
                Last,
                Assets::<A>::asset_events
                    .run_if(Assets::<A>::asset_events_condition)
                    .in_set(AssetEventSystems),
            );
        self
    }

    fn register_asset_loader<L: AssetLoader>(&mut self, loader: L) -> &mut Self {
        self.world()
            .resource::<AssetServer>()
            .register_loader(loader);
        self
    }

    fn init_asset_loader<L: AssetLoader + FromWorld>(&mut self) -> &mut Self {
        let loader = L::from_world(self.world_mut());
        self.register_asset_loader(loader)
    }
}

pub mod prelude {
    // `Asset` and `VisitAssetDependencies` resolve to both the traits and
    // their derive macros
    pub use crate::{
        Asset, AssetApp, AssetEvent, AssetId, AssetLoadFailedEvent, AssetLoader, AssetPath,
        AssetPlugin, AssetServer, Assets, Handle, LoadContext, LoadState, UntypedAssetId,
        UntypedHandle, VisitAssetDependencies,
    };
}
