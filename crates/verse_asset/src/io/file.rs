//! Filesystem asset source.

use super::{AssetReaderError, AssetSource, BoxedReader};
use crate::meta::meta_path;
use crate::BoxedFuture;
use futures_lite::StreamExt;
use std::path::{Path, PathBuf};

/// Reads assets from a root directory on disk.
pub struct FileAssetSource {
    root: PathBuf,
}

impl FileAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

impl AssetSource for FileAssetSource {
    fn read<'a>(&'a self, path: &'a Path) -> BoxedFuture<'a, Result<BoxedReader, AssetReaderError>> {
        Box::pin(async move {
            let full_path = self.full_path(path);
            let file = async_fs::File::open(&full_path)
                .await
                .map_err(|error| AssetReaderError::from_io(path, error))?;
            Ok(Box::new(file) as BoxedReader)
        })
    }

    fn read_meta<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxedFuture<'a, Result<BoxedReader, AssetReaderError>> {
        Box::pin(async move {
            let full_path = self.full_path(&meta_path(path));
            let file = async_fs::File::open(&full_path)
                .await
                .map_err(|error| AssetReaderError::from_io(path, error))?;
            Ok(Box::new(file) as BoxedReader)
        })
    }

    fn is_directory<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxedFuture<'a, Result<bool, AssetReaderError>> {
        Box::pin(async move {
            let metadata = async_fs::metadata(self.full_path(path))
                .await
                .map_err(|error| AssetReaderError::from_io(path, error))?;
            Ok(metadata.is_dir())
        })
    }

    fn read_directory<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxedFuture<'a, Result<Vec<PathBuf>, AssetReaderError>> {
        Box::pin(async move {
            let root = self.root.clone();
            let mut entries = async_fs::read_dir(self.full_path(path))
                .await
                .map_err(|error| AssetReaderError::from_io(path, error))?;
            let mut paths = Vec::new();
            while let Some(entry) = entries.next().await {
                let entry = entry.map_err(|error| AssetReaderError::from_io(path, error))?;
                let entry_path = entry.path();
                // report paths relative to the source root
                paths.push(
                    entry_path
                        .strip_prefix(&root)
                        .map(Path::to_path_buf)
                        .unwrap_or(entry_path),
                );
            }
            Ok(paths)
        })
    }
}
