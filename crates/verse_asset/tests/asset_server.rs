//! End-to-end tests of the load pipeline against an in-memory source.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use verse_app::prelude::*;
use verse_asset::io::{
    AssetReaderError, AssetSource, AssetSources, BoxedReader, Dir, MemoryAssetSource,
};
use verse_asset::prelude::*;
use verse_asset::{AssetLoadError, BoxedFuture};
use verse_ecs::prelude::*;

#[derive(Asset, Debug)]
struct Chunk {
    text: String,
    #[dependency]
    dependency: Option<Handle<Chunk>>,
}

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct ChunkSettings {
    #[serde(rename = "Uppercase", default)]
    uppercase: bool,
}

/// Parses a little text format: an optional `dep:<path>` first line declares
/// a dependency; a `label:` prefix publishes the remainder as a labeled
/// sub-asset.
struct ChunkLoader;

impl AssetLoader for ChunkLoader {
    type Asset = Chunk;
    type Settings = ChunkSettings;
    type Error = std::io::Error;

    fn load<'a>(
        &'a self,
        reader: &'a mut dyn verse_asset::io::Reader,
        settings: &'a Self::Settings,
        load_context: &'a mut LoadContext<'_>,
    ) -> BoxedFuture<'a, Result<Self::Asset, Self::Error>> {
        Box::pin(async move {
            let mut bytes = Vec::new();
            futures_lite::AsyncReadExt::read_to_end(reader, &mut bytes).await?;
            let mut text = String::from_utf8(bytes)
                .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))?;

            let mut dependency = None;
            if let Some(rest) = text.strip_prefix("dep:") {
                let (dep_path, remainder) = rest.split_once('\n').unwrap_or((rest, ""));
                dependency = Some(load_context.load::<Chunk>(dep_path.to_string()));
                text = remainder.to_string();
            }
            if let Some(rest) = text.strip_prefix("label:") {
                let inner = Chunk {
                    text: rest.to_string(),
                    dependency: None,
                };
                load_context.add_labeled_asset("Part".to_string(), inner);
                text = String::new();
            }
            if settings.uppercase {
                text = text.to_uppercase();
            }
            Ok(Chunk { text, dependency })
        })
    }

    fn extensions(&self) -> &[&str] {
        &["chunk"]
    }
}

#[derive(Resource, Default)]
struct CollectedEvents(Vec<AssetEvent<Chunk>>);

fn collect_events(mut reader: EventReader<AssetEvent<Chunk>>, mut collected: ResMut<CollectedEvents>) {
    for event in reader.read() {
        collected.0.push(*event);
    }
}

#[derive(Resource, Default)]
struct CollectedFailures(Vec<String>);

fn collect_failures(
    mut reader: EventReader<AssetLoadFailedEvent<Chunk>>,
    mut collected: ResMut<CollectedFailures>,
) {
    for event in reader.read() {
        collected.0.push(event.error.to_string());
    }
}

fn test_app(source: impl AssetSource) -> App {
    let mut app = App::new();
    app.insert_resource(AssetServer::new(AssetSources::new(source)));
    app.add_plugins(AssetPlugin::default());
    app.init_asset::<Chunk>();
    app.register_asset_loader(ChunkLoader);
    app.init_resource::<CollectedEvents>();
    app.init_resource::<CollectedFailures>();
    app.add_systems(Update, collect_events);
    app.add_systems(Update, collect_failures);
    app
}

fn server(app: &App) -> AssetServer {
    app.world().resource::<AssetServer>().clone()
}

#[track_caller]
fn pump_until(app: &mut App, what: &str, mut predicate: impl FnMut(&mut App) -> bool) {
    let start = Instant::now();
    loop {
        app.update();
        if predicate(app) {
            return;
        }
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "timed out waiting for: {what}"
        );
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn load_returns_immediately_and_completes() {
    let dir = Dir::default();
    dir.insert_asset("hello.chunk", b"hi".to_vec());
    let mut app = test_app(MemoryAssetSource::new(dir));
    let server = server(&app);

    let handle: Handle<Chunk> = server.load("hello.chunk");
    // the handle exists before any update ran
    assert!(handle.is_strong());
    assert!(!server.is_loaded(handle.id()));

    pump_until(&mut app, "chunk to load", |app| {
        app.world().resource::<Assets<Chunk>>().get(&handle).is_some()
    });
    let chunks = app.world().resource::<Assets<Chunk>>();
    assert_eq!(chunks.get(&handle).unwrap().text, "hi");
    assert!(server.is_loaded(handle.id()));
    assert!(server.is_loaded_with_dependencies(handle.id()));
    assert_eq!(
        server.get_path(handle.id()).unwrap().to_string(),
        "hello.chunk"
    );

    // Added and LoadedWithDependencies both surfaced
    pump_until(&mut app, "events to flush", |app| {
        let events = &app.world().resource::<CollectedEvents>().0;
        events.iter().any(|event| event.is_added(&handle))
            && events
                .iter()
                .any(|event| event.is_loaded_with_dependencies(&handle))
    });
}

#[test]
fn meta_selects_loader_by_name_and_parses_settings() {
    let dir = Dir::default();
    dir.insert_asset("loud.chunk", b"quiet words".to_vec());
    dir.insert_meta(
        "loud.chunk.meta.xml",
        format!(
            "<AssetMeta><Asset><Type>Load</Type><Name>{}</Name>\
             <LoaderSettings><Uppercase>true</Uppercase></LoaderSettings>\
             </Asset></AssetMeta>",
            std::any::type_name::<ChunkLoader>()
        )
        .into_bytes(),
    );
    let mut app = test_app(MemoryAssetSource::new(dir));
    let handle: Handle<Chunk> = server(&app).load("loud.chunk");
    pump_until(&mut app, "chunk to load", |app| {
        app.world().resource::<Assets<Chunk>>().get(&handle).is_some()
    });
    assert_eq!(
        app.world().resource::<Assets<Chunk>>().get(&handle).unwrap().text,
        "QUIET WORDS"
    );
}

#[test]
fn ignore_meta_fails_the_load() {
    let dir = Dir::default();
    dir.insert_asset("skipped.chunk", b"data".to_vec());
    dir.insert_meta(
        "skipped.chunk.meta.xml",
        b"<AssetMeta><Asset><Type>Ignore</Type></Asset></AssetMeta>".to_vec(),
    );
    let mut app = test_app(MemoryAssetSource::new(dir));
    let server = server(&app);
    let handle: Handle<Chunk> = server.load("skipped.chunk");

    pump_until(&mut app, "load to fail", |_| {
        server
            .get_load_state(handle.id())
            .is_some_and(|state| state.is_failed())
    });
    let state = server.get_load_state(handle.id()).unwrap();
    let LoadState::Failed(error) = state else {
        panic!("expected failure")
    };
    assert!(matches!(
        &*error,
        AssetLoadError::CannotLoadIgnoredAsset { .. }
    ));
    // the typed failure event reached the world
    pump_until(&mut app, "failure event", |app| {
        !app.world().resource::<CollectedFailures>().0.is_empty()
    });
}

#[test]
fn missing_loader_is_a_typed_failure() {
    let dir = Dir::default();
    dir.insert_asset("data.mystery", b"???".to_vec());
    let mut app = test_app(MemoryAssetSource::new(dir));
    let server = server(&app);
    let handle: Handle<Chunk> = server.load("data.mystery");
    pump_until(&mut app, "load to fail", |_| {
        server
            .get_load_state(handle.id())
            .is_some_and(|state| state.is_failed())
    });
    let LoadState::Failed(error) = server.get_load_state(handle.id()).unwrap() else {
        panic!("expected failure")
    };
    assert!(matches!(
        &*error,
        AssetLoadError::MissingAssetLoaderForExtension(_)
    ));
}

/// A source that can hold back individual paths until the test releases
/// them.
struct GatedSource {
    inner: MemoryAssetSource,
    blocked: Arc<Mutex<HashSet<PathBuf>>>,
}

impl AssetSource for GatedSource {
    fn read<'a>(&'a self, path: &'a Path) -> BoxedFuture<'a, Result<BoxedReader, AssetReaderError>> {
        Box::pin(async move {
            while self.blocked.lock().unwrap().contains(path) {
                std::thread::sleep(Duration::from_millis(2));
            }
            self.inner.read(path).await
        })
    }

    fn read_meta<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxedFuture<'a, Result<BoxedReader, AssetReaderError>> {
        self.inner.read_meta(path)
    }

    fn is_directory<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxedFuture<'a, Result<bool, AssetReaderError>> {
        self.inner.is_directory(path)
    }

    fn read_directory<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxedFuture<'a, Result<Vec<PathBuf>, AssetReaderError>> {
        self.inner.read_directory(path)
    }
}

#[test]
fn recursive_state_waits_for_dependencies() {
    let dir = Dir::default();
    dir.insert_asset("main.chunk", b"dep:leaf.chunk\nbody".to_vec());
    dir.insert_asset("leaf.chunk", b"leaf".to_vec());
    let blocked = Arc::new(Mutex::new(HashSet::from([PathBuf::from("leaf.chunk")])));
    let mut app = test_app(GatedSource {
        inner: MemoryAssetSource::new(dir),
        blocked: blocked.clone(),
    });
    let server = server(&app);

    let main_handle: Handle<Chunk> = server.load("main.chunk");
    // the main asset finishes as soon as its own bytes are in, even though
    // the dependency is still held back
    pump_until(&mut app, "main chunk to load", |_| {
        server.is_loaded(main_handle.id())
    });
    assert!(!server.is_loaded_with_dependencies(main_handle.id()));
    for _ in 0..3 {
        app.update();
    }
    let events = &app.world().resource::<CollectedEvents>().0;
    assert!(
        !events
            .iter()
            .any(|event| event.is_loaded_with_dependencies(&main_handle)),
        "no LoadedWithDependencies before the dependency resolves"
    );

    // release the dependency
    blocked.lock().unwrap().clear();
    pump_until(&mut app, "recursive state to resolve", |_| {
        server.is_loaded_with_dependencies(main_handle.id())
    });
    // settle a few frames, then the event must have fired exactly once
    for _ in 0..3 {
        app.update();
    }
    let events = &app.world().resource::<CollectedEvents>().0;
    assert_eq!(
        events
            .iter()
            .filter(|event| event.is_loaded_with_dependencies(&main_handle))
            .count(),
        1
    );
}

#[test]
fn failed_dependency_propagates_to_dependents() {
    let dir = Dir::default();
    dir.insert_asset("broken.chunk", b"dep:missing.chunk\nbody".to_vec());
    let mut app = test_app(MemoryAssetSource::new(dir));
    let server = server(&app);
    let handle: Handle<Chunk> = server.load("broken.chunk");

    pump_until(&mut app, "recursive failure", |_| {
        server
            .get_recursive_dependency_load_state(handle.id())
            .is_some_and(|state| state.is_failed())
    });
    // the asset itself loaded fine; only the dependency failed
    assert!(server.is_loaded(handle.id()));
    assert!(server
        .get_dependency_load_state(handle.id())
        .is_some_and(|state| !state.is_loaded()));
}

#[test]
fn drop_then_reload_revives_the_asset() {
    let dir = Dir::default();
    dir.insert_asset("revive.chunk", b"persistent".to_vec());
    let mut app = test_app(MemoryAssetSource::new(dir));
    let server = server(&app);

    let handle: Handle<Chunk> = server.load("revive.chunk");
    pump_until(&mut app, "chunk to load", |_| server.is_loaded(handle.id()));
    let id = handle.id();

    // drop the only strong handle, then re-request the same path before the
    // drop event is processed
    drop(handle);
    let revived: Handle<Chunk> = server.load("revive.chunk");
    assert_eq!(revived.id(), id, "the same id is revived");

    // the pending drop is absorbed; the asset survives
    for _ in 0..3 {
        app.update();
    }
    assert!(server.is_loaded(revived.id()));
    assert!(app.world().resource::<Assets<Chunk>>().get(&revived).is_some());

    // a normal drop afterwards removes it
    drop(revived);
    pump_until(&mut app, "asset to be removed", |app| {
        app.world().resource::<Assets<Chunk>>().get(id).is_none()
    });
    assert!(server.get_load_state(id).is_none(), "tracker entry removed");
}

#[test]
fn labeled_sub_assets_load_through_the_base_asset() {
    let dir = Dir::default();
    dir.insert_asset("combo.chunk", b"label:inner text".to_vec());
    let mut app = test_app(MemoryAssetSource::new(dir));
    let server = server(&app);

    let labeled: Handle<Chunk> = server.load("combo.chunk#Part");
    pump_until(&mut app, "labeled asset to load", |app| {
        app.world().resource::<Assets<Chunk>>().get(&labeled).is_some()
    });
    assert_eq!(
        app.world().resource::<Assets<Chunk>>().get(&labeled).unwrap().text,
        "inner text"
    );

    // requesting a label that does not exist fails that handle
    let missing: Handle<Chunk> = server.load("combo.chunk#Nope");
    pump_until(&mut app, "missing label to fail", |_| {
        server
            .get_load_state(missing.id())
            .is_some_and(|state| state.is_failed())
    });
}

#[test]
fn server_add_stores_runtime_assets() {
    let mut app = test_app(MemoryAssetSource::new(Dir::default()));
    let server = server(&app);
    let handle = server.add(Chunk {
        text: "built at runtime".to_string(),
        dependency: None,
    });
    pump_until(&mut app, "runtime asset to appear", |app| {
        app.world().resource::<Assets<Chunk>>().get(&handle).is_some()
    });
    assert!(server.is_loaded_with_dependencies(handle.id()));
}
