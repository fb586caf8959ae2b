//! XML side-car meta files.
//!
//! Every asset may carry a `<path>.meta.xml` document describing how it
//! should be handled. A minimal parse of `Asset/Type` and `Asset/Name`
//! selects the loader; the loader then parses the full document into its
//! typed settings. A missing meta file is equivalent to `Type=Load` with
//! default settings for the extension-selected loader.

use crate::loader::AssetLoader;
use crate::path::AssetPath;
use downcast_rs::{impl_downcast, Downcast};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const META_FORMAT_VERSION: &str = "1.0";

/// The side-car file name for `path`: `<path>.meta.xml`.
pub fn meta_path(path: &Path) -> PathBuf {
    let mut meta = path.as_os_str().to_os_string();
    meta.push(".meta.xml");
    PathBuf::from(meta)
}

/// How the asset pipeline treats a file.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetActionType {
    /// Load the file with the named loader.
    Load,
    /// The file belongs to an external asset processor.
    Process,
    /// Skip the file entirely.
    Ignore,
}

/// The `Asset` element of a meta document, typed over loader settings.
#[derive(Serialize, Deserialize)]
pub struct AssetAction<S> {
    #[serde(rename = "Type")]
    pub ty: AssetActionType,
    /// The loader's type name; empty selects by extension.
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "LoaderSettings", default)]
    pub settings: S,
}

/// A content-hash record written by an external processor.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ProcessedInfo {
    #[serde(rename = "AssetHash")]
    pub asset_hash: u64,
    #[serde(rename = "FullHash")]
    pub full_hash: u64,
    #[serde(rename = "Dependencies", default)]
    pub dependencies: Vec<ProcessDependencyInfo>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessDependencyInfo {
    #[serde(rename = "FullHash")]
    pub full_hash: u64,
    #[serde(rename = "AssetPath")]
    pub path: AssetPath<'static>,
}

/// A full meta document, typed over one loader's settings.
#[derive(Serialize, Deserialize)]
#[serde(rename = "AssetMeta", bound = "")]
pub struct AssetMeta<L: AssetLoader> {
    #[serde(rename = "MetaFormatVersion")]
    pub meta_format_version: String,
    #[serde(rename = "Asset")]
    pub asset: AssetAction<L::Settings>,
    #[serde(rename = "ProcessedInfo", default, skip_serializing_if = "Option::is_none")]
    pub processed_info: Option<ProcessedInfo>,
}

impl<L: AssetLoader> AssetMeta<L> {
    pub fn new(action_type: AssetActionType, settings: L::Settings) -> Self {
        Self {
            meta_format_version: META_FORMAT_VERSION.to_string(),
            asset: AssetAction {
                ty: action_type,
                name: std::any::type_name::<L>().to_string(),
                settings,
            },
            processed_info: None,
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, DeserializeMetaError> {
        let text = std::str::from_utf8(bytes).map_err(|_| DeserializeMetaError::InvalidUtf8)?;
        quick_xml::de::from_str(text)
            .map_err(|error| DeserializeMetaError::DeserializeMeta(error.to_string()))
    }
}

/// The loader-independent view of a full meta document.
pub trait AssetMetaDyn: Downcast + Send + Sync {
    fn serialize(&self) -> Vec<u8>;
    fn processed_info(&self) -> &Option<ProcessedInfo>;
}

impl<L: AssetLoader> AssetMetaDyn for AssetMeta<L> {
    fn serialize(&self) -> Vec<u8> {
        quick_xml::se::to_string(self)
            .expect("asset meta is serializable as XML")
            .into_bytes()
    }

    fn processed_info(&self) -> &Option<ProcessedInfo> {
        &self.processed_info
    }
}

impl_downcast!(AssetMetaDyn);

/// The subset of a meta document needed to select a loader.
#[derive(Deserialize)]
#[serde(rename = "AssetMeta")]
pub struct AssetMetaMinimal {
    #[serde(rename = "Asset")]
    pub asset: AssetActionMinimal,
}

#[derive(Deserialize)]
pub struct AssetActionMinimal {
    #[serde(rename = "Type")]
    pub ty: AssetActionType,
    #[serde(rename = "Name", default)]
    pub name: String,
}

impl AssetMetaMinimal {
    pub fn deserialize(bytes: &[u8]) -> Result<Self, DeserializeMetaError> {
        let text = std::str::from_utf8(bytes).map_err(|_| DeserializeMetaError::InvalidUtf8)?;
        quick_xml::de::from_str(text)
            .map_err(|error| DeserializeMetaError::DeserializeMeta(error.to_string()))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeserializeMetaError {
    #[error("meta file is not valid UTF-8")]
    InvalidUtf8,
    #[error("failed to deserialize asset meta: {0}")]
    DeserializeMeta(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::LoadContext;
    use serde::{Deserialize, Serialize};

    #[derive(verse_asset_macros::Asset)]
    struct Text(#[allow(dead_code)] String);

    #[derive(Serialize, Deserialize, Default, Debug, PartialEq)]
    struct TextSettings {
        #[serde(rename = "Uppercase", default)]
        uppercase: bool,
    }

    struct TextLoader;

    impl AssetLoader for TextLoader {
        type Asset = Text;
        type Settings = TextSettings;
        type Error = std::io::Error;

        fn load<'a>(
            &'a self,
            _reader: &'a mut dyn crate::io::Reader,
            _settings: &'a Self::Settings,
            _load_context: &'a mut LoadContext<'_>,
        ) -> crate::BoxedFuture<'a, Result<Self::Asset, Self::Error>> {
            unreachable!("not exercised by meta tests")
        }

        fn extensions(&self) -> &[&str] {
            &["txt"]
        }
    }

    #[test]
    fn meta_path_appends_side_car_suffix() {
        assert_eq!(
            meta_path(Path::new("models/ship.mesh")),
            PathBuf::from("models/ship.mesh.meta.xml")
        );
    }

    #[test]
    fn minimal_parse_reads_type_and_name() {
        let xml = r#"<AssetMeta>
            <Asset>
                <Type>Load</Type>
                <Name>my_game::TextLoader</Name>
                <LoaderSettings><Uppercase>true</Uppercase></LoaderSettings>
            </Asset>
        </AssetMeta>"#;
        let minimal = AssetMetaMinimal::deserialize(xml.as_bytes()).unwrap();
        assert_eq!(minimal.asset.ty, AssetActionType::Load);
        assert_eq!(minimal.asset.name, "my_game::TextLoader");
    }

    #[test]
    fn minimal_parse_reads_ignore() {
        let xml = "<AssetMeta><Asset><Type>Ignore</Type></Asset></AssetMeta>";
        let minimal = AssetMetaMinimal::deserialize(xml.as_bytes()).unwrap();
        assert_eq!(minimal.asset.ty, AssetActionType::Ignore);
        assert!(minimal.asset.name.is_empty());
    }

    #[test]
    fn full_meta_round_trips_with_typed_settings() {
        let meta = AssetMeta::<TextLoader>::new(
            AssetActionType::Load,
            TextSettings { uppercase: true },
        );
        let bytes = AssetMetaDyn::serialize(&meta);
        let parsed = AssetMeta::<TextLoader>::deserialize(&bytes).unwrap();
        assert_eq!(parsed.asset.ty, AssetActionType::Load);
        assert_eq!(parsed.asset.settings, TextSettings { uppercase: true });
        assert_eq!(parsed.meta_format_version, META_FORMAT_VERSION);
    }

    #[test]
    fn malformed_meta_is_a_typed_error() {
        let result = AssetMetaMinimal::deserialize(b"<AssetMeta><oops>");
        assert!(matches!(
            result,
            Err(DeserializeMetaError::DeserializeMeta(_))
        ));
    }
}
