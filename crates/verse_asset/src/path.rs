//! Asset path URIs: `[source://]path[#label]`.

use serde::{de::Visitor, Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Names an [`AssetSource`](crate::io::AssetSource) inside an [`AssetPath`].
/// The empty prefix selects the default source.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum AssetSourceId<'a> {
    #[default]
    Default,
    Name(Cow<'a, str>),
}

impl<'a> AssetSourceId<'a> {
    pub fn new(name: Option<impl Into<Cow<'a, str>>>) -> Self {
        match name {
            Some(name) => Self::Name(name.into()),
            None => Self::Default,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Default => None,
            Self::Name(name) => Some(name),
        }
    }

    pub fn into_owned(self) -> AssetSourceId<'static> {
        match self {
            Self::Default => AssetSourceId::Default,
            Self::Name(name) => AssetSourceId::Name(Cow::Owned(name.into_owned())),
        }
    }

    pub fn clone_owned(&self) -> AssetSourceId<'static> {
        self.clone().into_owned()
    }
}

impl Display for AssetSourceId<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.as_str() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "Default"),
        }
    }
}

impl<'a> From<&'a str> for AssetSourceId<'a> {
    fn from(value: &'a str) -> Self {
        Self::Name(Cow::Borrowed(value))
    }
}

impl<'a> From<Option<&'a str>> for AssetSourceId<'a> {
    fn from(value: Option<&'a str>) -> Self {
        Self::new(value)
    }
}

/// A parse failure of the asset path format.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseAssetPathError {
    #[error("asset source must not be empty (remove the `://` or name the source)")]
    MissingSource,
    #[error("asset label must not be empty (remove the `#` or name the label)")]
    MissingLabel,
}

/// A path to an asset in a virtual filesystem: an optional source, the path
/// inside that source, and an optional label selecting a sub-asset.
///
/// ```
/// # use verse_asset::AssetPath;
/// let path = AssetPath::parse("models://ship.mesh#Hull").unwrap();
/// assert_eq!(path.source().as_str(), Some("models"));
/// assert_eq!(path.label(), Some("Hull"));
/// assert_eq!(AssetPath::parse(&path.to_string()).unwrap(), path);
/// ```
#[derive(Clone, Default, Eq, PartialEq, Hash)]
pub struct AssetPath<'a> {
    source: AssetSourceId<'a>,
    path: Cow<'a, Path>,
    label: Option<Cow<'a, str>>,
}

impl<'a> AssetPath<'a> {
    /// Parses the `[source://]path[#label]` format.
    pub fn parse(asset_path: &'a str) -> Result<AssetPath<'a>, ParseAssetPathError> {
        let (source, remainder) = match asset_path.split_once("://") {
            Some(("", _)) => return Err(ParseAssetPathError::MissingSource),
            Some((source, remainder)) => (AssetSourceId::Name(Cow::Borrowed(source)), remainder),
            None => (AssetSourceId::Default, asset_path),
        };
        let (path, label) = match remainder.split_once('#') {
            Some((_, "")) => return Err(ParseAssetPathError::MissingLabel),
            Some((path, label)) => (path, Some(Cow::Borrowed(label))),
            None => (remainder, None),
        };
        Ok(AssetPath {
            source,
            path: Cow::Borrowed(Path::new(path)),
            label,
        })
    }

    /// A path with the default source and no label.
    pub fn from_path(path: impl Into<PathBuf>) -> AssetPath<'static> {
        AssetPath {
            source: AssetSourceId::Default,
            path: Cow::Owned(path.into()),
            label: None,
        }
    }

    #[inline]
    pub fn source(&self) -> &AssetSourceId<'a> {
        &self.source
    }

    /// The path inside the source's virtual filesystem.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The sub-asset label, if any.
    #[inline]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// This path without its label.
    pub fn without_label(&self) -> AssetPath<'a> {
        AssetPath {
            source: self.source.clone(),
            path: self.path.clone(),
            label: None,
        }
    }

    /// This path with `label`, replacing any existing one.
    pub fn with_label(&self, label: impl Into<Cow<'a, str>>) -> AssetPath<'a> {
        AssetPath {
            source: self.source.clone(),
            path: self.path.clone(),
            label: Some(label.into()),
        }
    }

    /// Clones borrowed contents so the path can outlive its source string.
    pub fn into_owned(self) -> AssetPath<'static> {
        AssetPath {
            source: self.source.into_owned(),
            path: Cow::Owned(self.path.into_owned()),
            label: self.label.map(|label| Cow::Owned(label.into_owned())),
        }
    }

    pub fn clone_owned(&self) -> AssetPath<'static> {
        self.clone().into_owned()
    }

    /// The full extension, including every `.` segment:
    /// `"tale.config.xml"` → `"config.xml"`.
    pub fn get_full_extension(&self) -> Option<String> {
        let file_name = self.path.file_name()?.to_str()?;
        let index = file_name.find('.')?;
        Some(file_name[index + 1..].to_lowercase())
    }

    pub(crate) fn iter_secondary_extensions(full_extension: &str) -> impl Iterator<Item = &str> {
        full_extension.char_indices().filter_map(|(index, character)| {
            (character == '.').then(|| &full_extension[index + 1..])
        })
    }
}

impl Debug for AssetPath<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for AssetPath<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let AssetSourceId::Name(name) = &self.source {
            write!(f, "{name}://")?;
        }
        write!(f, "{}", self.path.display())?;
        if let Some(label) = &self.label {
            write!(f, "#{label}")?;
        }
        Ok(())
    }
}

impl From<&'static str> for AssetPath<'static> {
    #[track_caller]
    fn from(asset_path: &'static str) -> Self {
        match AssetPath::parse(asset_path) {
            Ok(path) => path,
            Err(error) => panic!("invalid asset path {asset_path:?}: {error}"),
        }
    }
}

impl<'a> From<&'a String> for AssetPath<'a> {
    #[track_caller]
    fn from(asset_path: &'a String) -> Self {
        match AssetPath::parse(asset_path) {
            Ok(path) => path,
            Err(error) => panic!("invalid asset path {asset_path:?}: {error}"),
        }
    }
}

impl From<String> for AssetPath<'static> {
    #[track_caller]
    fn from(asset_path: String) -> Self {
        AssetPath::from(&asset_path).into_owned()
    }
}

impl From<PathBuf> for AssetPath<'static> {
    fn from(path: PathBuf) -> Self {
        AssetPath::from_path(path)
    }
}

impl<'a, 'b> From<&'a AssetPath<'b>> for AssetPath<'b> {
    fn from(path: &'a AssetPath<'b>) -> Self {
        path.clone()
    }
}

impl Serialize for AssetPath<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AssetPath<'static> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_string(AssetPathVisitor)
    }
}

struct AssetPathVisitor;

impl<'de> Visitor<'de> for AssetPathVisitor {
    type Value = AssetPath<'static>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("string AssetPath")
    }

    fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Self::Value, E> {
        AssetPath::parse(value)
            .map(AssetPath::into_owned)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_path() {
        let path = AssetPath::parse("textures/grass.png").unwrap();
        assert_eq!(path.source(), &AssetSourceId::Default);
        assert_eq!(path.path(), Path::new("textures/grass.png"));
        assert_eq!(path.label(), None);
    }

    #[test]
    fn parse_source_and_label() {
        let path = AssetPath::parse("mods://pack/scene.xml#Player").unwrap();
        assert_eq!(path.source().as_str(), Some("mods"));
        assert_eq!(path.path(), Path::new("pack/scene.xml"));
        assert_eq!(path.label(), Some("Player"));
    }

    #[test]
    fn parse_errors() {
        assert_eq!(
            AssetPath::parse("://oops.png"),
            Err(ParseAssetPathError::MissingSource)
        );
        assert_eq!(
            AssetPath::parse("oops.png#"),
            Err(ParseAssetPathError::MissingLabel)
        );
    }

    #[test]
    fn display_round_trips() {
        for raw in [
            "a/b/c.png",
            "source://a/b.png",
            "a.png#label",
            "source://a.png#label",
        ] {
            let parsed = AssetPath::parse(raw).unwrap();
            assert_eq!(parsed.to_string(), raw);
            assert_eq!(AssetPath::parse(&parsed.to_string()).unwrap(), parsed);
        }
    }

    #[test]
    fn full_extension() {
        let path = AssetPath::parse("a/model.gltf.xml").unwrap();
        assert_eq!(path.get_full_extension().unwrap(), "gltf.xml");
        let secondary: Vec<&str> =
            AssetPath::iter_secondary_extensions("gltf.xml").collect();
        assert_eq!(secondary, vec!["xml"]);
    }

    #[test]
    fn label_manipulation() {
        let path = AssetPath::parse("scene.xml#Mesh").unwrap();
        assert_eq!(path.without_label().to_string(), "scene.xml");
        assert_eq!(path.with_label("Other").to_string(), "scene.xml#Other");
    }
}
