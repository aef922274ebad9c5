//! Image metadata.
//!
//! A [`Probe`] is everything learned from decoding an upload: content hash,
//! dimensions and type. Once a storage driver has persisted the image, the
//! probe is stamped with that driver's name and becomes a [`Meta`], which is
//! what callers keep and hand back for every later link or fetch.

use crate::kind::ImageType;
use std::ops::Deref;

/// Prefix marking hashes of special, built-in images (e.g. the placeholder).
pub const SPECIAL_HASH_PREFIX: char = '_';

/// Image metadata before it has been stored anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Probe {
    /// Hex digest of the decoded pixels.
    pub hash: String,
    pub width: u32,
    pub height: u32,
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: ImageType,
}

impl Probe {
    pub fn new(hash: impl Into<String>, width: u32, height: u32, kind: ImageType) -> Self {
        Self { hash: hash.into(), width, height, kind }
    }

    /// Stamp the probe with the name of the driver that persisted it.
    ///
    /// This is the only way to obtain a [`Meta`]; the driver name is never
    /// changed afterwards.
    pub fn stored_by(self, driver: impl Into<String>) -> Meta {
        Meta { probe: self, storage_driver: driver.into() }
    }

    /// Special images live outside the sharded hash tree.
    pub fn is_special(&self) -> bool {
        self.hash.starts_with(SPECIAL_HASH_PREFIX)
    }
}

/// Metadata of a stored image.
///
/// Dereferences to its [`Probe`], so `meta.hash`, `meta.width` etc. work
/// directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Meta {
    #[cfg_attr(feature = "serde", serde(flatten))]
    probe: Probe,
    storage_driver: String,
}

impl Meta {
    /// Name of the driver that owns the original. The sole routing key.
    pub fn storage_driver(&self) -> &str {
        &self.storage_driver
    }

    // Explicit version of self.deref()
    pub fn probe(&self) -> &Probe {
        &self.probe
    }

    pub fn into_probe(self) -> Probe {
        self.probe
    }
}

impl Deref for Meta {
    type Target = Probe;
    fn deref(&self) -> &Probe {
        &self.probe
    }
}

/// An original ready to be persisted: its probe plus the encoded bytes a
/// driver writes verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Original {
    pub probe: Probe,
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_by_stamps_driver() {
        let meta = Probe::new("abcd1234", 10, 20, ImageType::Png).stored_by("filesystem");
        assert_eq!(meta.storage_driver(), "filesystem");
        assert_eq!(meta.hash, "abcd1234");
        assert_eq!(meta.width, 10);
        assert_eq!(meta.height, 20);
        assert_eq!(meta.into_probe().kind, ImageType::Png);
    }

    #[test]
    fn test_special_hash() {
        assert!(Probe::new("_not_available", 1, 1, ImageType::Png).is_special());
        assert!(!Probe::new("abcd", 1, 1, ImageType::Png).is_special());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_meta_json_shape() {
        let meta = Probe::new("abcd", 3, 4, ImageType::Jpeg).stored_by("ftp");
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, r#"{"hash":"abcd","width":3,"height":4,"type":"jpeg","storage_driver":"ftp"}"#);
        let back: Meta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
