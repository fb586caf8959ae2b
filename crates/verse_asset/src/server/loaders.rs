//! The registry of erased asset loaders.

use crate::loader::{AssetLoader, ErasedAssetLoader};
use crate::path::AssetPath;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// No loader matched a file extension.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no asset loader is registered for extension {extension:?}")]
pub struct MissingAssetLoaderForExtensionError {
    pub extension: String,
}

/// No loader matched a type name from a meta file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no asset loader is registered with type name {type_name:?}")]
pub struct MissingAssetLoaderForTypeNameError {
    pub type_name: String,
}

#[derive(Default)]
pub(crate) struct AssetLoaders {
    loaders: Vec<Arc<dyn ErasedAssetLoader>>,
    type_name_to_index: HashMap<&'static str, usize>,
    extension_to_index: HashMap<String, usize>,
    asset_type_to_index: HashMap<TypeId, usize>,
}

impl AssetLoaders {
    pub(crate) fn push<L: AssetLoader>(&mut self, loader: L) {
        let index = self.loaders.len();
        let loader: Arc<dyn ErasedAssetLoader> = Arc::new(loader);
        self.type_name_to_index.insert(loader.type_name(), index);
        // first registration wins for extension and asset-type fallbacks
        for extension in loader.extensions() {
            self.extension_to_index
                .entry(extension.to_string())
                .or_insert(index);
        }
        self.asset_type_to_index
            .entry(loader.asset_type_id())
            .or_insert(index);
        self.loaders.push(loader);
    }

    /// Selects by exact loader type name (from a meta file).
    pub(crate) fn find_by_name(
        &self,
        type_name: &str,
    ) -> Result<Arc<dyn ErasedAssetLoader>, MissingAssetLoaderForTypeNameError> {
        self.type_name_to_index
            .get(type_name)
            .map(|&index| self.loaders[index].clone())
            .ok_or_else(|| MissingAssetLoaderForTypeNameError {
                type_name: type_name.to_string(),
            })
    }

    /// Fallback selection by requested asset type and the path's (full, then
    /// progressively shortened) extension.
    pub(crate) fn find_by_type_and_extension(
        &self,
        asset_type: Option<TypeId>,
        path: &AssetPath<'_>,
    ) -> Result<Arc<dyn ErasedAssetLoader>, MissingAssetLoaderForExtensionError> {
        let full_extension = path.get_full_extension().unwrap_or_default();
        let by_extension = {
            let mut candidates = std::iter::once(full_extension.as_str())
                .chain(AssetPath::iter_secondary_extensions(&full_extension));
            candidates.find_map(|extension| {
                self.extension_to_index
                    .get(extension)
                    .map(|&index| self.loaders[index].clone())
            })
        };
        if let Some(loader) = by_extension {
            // prefer an extension match that also produces the requested type
            match asset_type {
                Some(type_id) if loader.asset_type_id() != type_id => {}
                _ => return Ok(loader),
            }
        }
        if let Some(type_id) = asset_type {
            if let Some(&index) = self.asset_type_to_index.get(&type_id) {
                return Ok(self.loaders[index].clone());
            }
        }
        Err(MissingAssetLoaderForExtensionError {
            extension: full_extension,
        })
    }

}
