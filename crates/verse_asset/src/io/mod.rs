//! Asset sources: where asset bytes come from.

mod file;
mod memory;

pub use file::FileAssetSource;
pub use memory::{Dir, MemoryAssetSource};

use crate::path::AssetSourceId;
use crate::BoxedFuture;
use futures_lite::io::AsyncRead;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// An async byte stream handed to loaders.
pub trait Reader: AsyncRead + Send + Sync + Unpin {}

impl<T: AsyncRead + Send + Sync + Unpin> Reader for T {}

/// A boxed [`Reader`].
pub type BoxedReader = Box<dyn Reader>;

/// Failure to read from an [`AssetSource`].
#[derive(Error, Debug, Clone)]
pub enum AssetReaderError {
    /// The path (or its meta side-car) does not exist.
    #[error("path not found: {0}")]
    NotFound(PathBuf),
    #[error("io error reading {path}: {error}")]
    Io {
        path: PathBuf,
        error: Arc<std::io::Error>,
    },
}

impl AssetReaderError {
    pub(crate) fn from_io(path: &Path, error: std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                error: Arc::new(error),
            }
        }
    }
}

/// A driver for a virtual filesystem of assets and their meta side-cars.
///
/// `is_directory` and `read_directory` are reserved capability for folder
/// walkers (hot reload); the asset server itself only calls `read` and
/// `read_meta`.
pub trait AssetSource: Send + Sync + 'static {
    /// Opens the asset byte stream at `path`.
    fn read<'a>(&'a self, path: &'a Path) -> BoxedFuture<'a, Result<BoxedReader, AssetReaderError>>;

    /// Opens the meta side-car byte stream for `path`. Fails with
    /// [`AssetReaderError::NotFound`] when the asset has no meta.
    fn read_meta<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxedFuture<'a, Result<BoxedReader, AssetReaderError>>;

    /// `true` if `path` is a directory in this source.
    fn is_directory<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxedFuture<'a, Result<bool, AssetReaderError>>;

    /// The entries directly inside the directory at `path`.
    fn read_directory<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxedFuture<'a, Result<Vec<PathBuf>, AssetReaderError>>;
}

/// What changed in a watched source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetSourceEvent {
    pub kind: AssetSourceEventKind,
    pub object: AssetSourceObject,
    pub path: PathBuf,
    /// The previous path for [`AssetSourceEventKind::Renamed`].
    pub old_path: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetSourceEventKind {
    Added,
    Modified,
    Removed,
    Renamed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetSourceObject {
    Asset,
    Meta,
    Folder,
    Unknown,
}

/// Addressing a source that was never registered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("asset source {0:?} does not exist")]
pub struct MissingAssetSourceError(pub String);

/// The registered [`AssetSource`]s of a server: one default plus any number
/// of named sources.
pub struct AssetSources {
    default: Arc<dyn AssetSource>,
    named: HashMap<String, Arc<dyn AssetSource>>,
}

impl AssetSources {
    pub fn new(default: impl AssetSource) -> Self {
        Self {
            default: Arc::new(default),
            named: HashMap::new(),
        }
    }

    /// Registers a named source, replacing any previous one under `name`.
    pub fn insert(&mut self, name: impl Into<String>, source: impl AssetSource) -> &mut Self {
        self.named.insert(name.into(), Arc::new(source));
        self
    }

    pub fn get(
        &self,
        id: &AssetSourceId<'_>,
    ) -> Result<&Arc<dyn AssetSource>, MissingAssetSourceError> {
        match id.as_str() {
            None => Ok(&self.default),
            Some(name) => self
                .named
                .get(name)
                .ok_or_else(|| MissingAssetSourceError(name.to_string())),
        }
    }
}

/// Reads a whole stream into memory.
pub async fn read_all(reader: &mut dyn Reader, path: &Path) -> Result<Vec<u8>, AssetReaderError> {
    use futures_lite::AsyncReadExt;
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .await
        .map_err(|error| AssetReaderError::from_io(path, error))?;
    Ok(bytes)
}
