//! In-memory asset source, used by tests and embedded assets.

use super::{AssetReaderError, AssetSource, BoxedReader};
use crate::meta::meta_path;
use crate::BoxedFuture;
use futures_lite::io::Cursor;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Default)]
struct DirState {
    assets: HashMap<PathBuf, Arc<Vec<u8>>>,
    metas: HashMap<PathBuf, Arc<Vec<u8>>>,
}

/// A shared in-memory directory of assets and meta side-cars. Clones share
/// contents, so a test can keep writing after handing the directory to a
/// [`MemoryAssetSource`].
#[derive(Clone, Default)]
pub struct Dir(Arc<RwLock<DirState>>);

impl Dir {
    pub fn insert_asset(&self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) {
        self.0
            .write()
            .assets
            .insert(path.into(), Arc::new(bytes.into()));
    }

    pub fn insert_meta(&self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) {
        self.0
            .write()
            .metas
            .insert(path.into(), Arc::new(bytes.into()));
    }

    pub fn remove_asset(&self, path: &Path) -> bool {
        self.0.write().assets.remove(path).is_some()
    }

    pub fn get_asset(&self, path: &Path) -> Option<Arc<Vec<u8>>> {
        self.0.read().assets.get(path).cloned()
    }

    pub fn get_meta(&self, path: &Path) -> Option<Arc<Vec<u8>>> {
        self.0.read().metas.get(path).cloned()
    }

    fn contains_dir(&self, path: &Path) -> bool {
        self.0
            .read()
            .assets
            .keys()
            .any(|asset| asset.parent().is_some_and(|parent| parent.starts_with(path)))
    }

    fn children(&self, path: &Path) -> Vec<PathBuf> {
        let state = self.0.read();
        let mut children: Vec<PathBuf> = state
            .assets
            .keys()
            .filter(|asset| asset.parent() == Some(path))
            .cloned()
            .collect();
        children.sort();
        children
    }
}

/// Serves assets straight out of a [`Dir`].
pub struct MemoryAssetSource {
    pub dir: Dir,
}

impl MemoryAssetSource {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }
}

impl AssetSource for MemoryAssetSource {
    fn read<'a>(&'a self, path: &'a Path) -> BoxedFuture<'a, Result<BoxedReader, AssetReaderError>> {
        Box::pin(async move {
            match self.dir.get_asset(path) {
                Some(bytes) => {
                    Ok(Box::new(Cursor::new(bytes.as_ref().clone())) as BoxedReader)
                }
                None => Err(AssetReaderError::NotFound(path.to_path_buf())),
            }
        })
    }

    fn read_meta<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxedFuture<'a, Result<BoxedReader, AssetReaderError>> {
        Box::pin(async move {
            match self.dir.get_meta(&meta_path(path)) {
                Some(bytes) => {
                    Ok(Box::new(Cursor::new(bytes.as_ref().clone())) as BoxedReader)
                }
                None => Err(AssetReaderError::NotFound(path.to_path_buf())),
            }
        })
    }

    fn is_directory<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxedFuture<'a, Result<bool, AssetReaderError>> {
        Box::pin(async move { Ok(self.dir.contains_dir(path)) })
    }

    fn read_directory<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxedFuture<'a, Result<Vec<PathBuf>, AssetReaderError>> {
        Box::pin(async move {
            if self.dir.contains_dir(path) {
                Ok(self.dir.children(path))
            } else {
                Err(AssetReaderError::NotFound(path.to_path_buf()))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::read_all;
    use verse_tasks::block_on;

    #[test]
    fn read_round_trip() {
        let dir = Dir::default();
        dir.insert_asset("a/b.txt", b"hello".to_vec());
        let source = MemoryAssetSource::new(dir.clone());
        let mut reader = block_on(source.read(Path::new("a/b.txt"))).unwrap();
        let bytes = block_on(read_all(&mut *reader, Path::new("a/b.txt"))).unwrap();
        assert_eq!(bytes, b"hello");
        assert!(matches!(
            block_on(source.read(Path::new("missing.txt"))),
            Err(AssetReaderError::NotFound(_))
        ));
    }

    #[test]
    fn meta_side_car_lookup() {
        let dir = Dir::default();
        dir.insert_asset("tex.png", b"img".to_vec());
        dir.insert_meta("tex.png.meta.xml", b"<AssetMeta/>".to_vec());
        let source = MemoryAssetSource::new(dir);
        assert!(block_on(source.read_meta(Path::new("tex.png"))).is_ok());
        assert!(block_on(source.read_meta(Path::new("other.png"))).is_err());
    }

    #[test]
    fn directory_listing() {
        let dir = Dir::default();
        dir.insert_asset("models/a.mesh", Vec::new());
        dir.insert_asset("models/b.mesh", Vec::new());
        dir.insert_asset("other/c.mesh", Vec::new());
        let source = MemoryAssetSource::new(dir);
        assert!(block_on(source.is_directory(Path::new("models"))).unwrap());
        let children = block_on(source.read_directory(Path::new("models"))).unwrap();
        assert_eq!(
            children,
            vec![PathBuf::from("models/a.mesh"), PathBuf::from("models/b.mesh")]
        );
    }
}
