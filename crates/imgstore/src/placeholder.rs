//! The "not available" image served when an original has gone missing.

use crate::error::{self, Result};
use exn::ResultExt;
use image::{DynamicImage, Rgb, RgbImage};
use imgstore_image::{ImageType, Meta, Probe};
use std::path::Path;
use std::sync::Arc;

/// Hash of the placeholder. Special hashes are never sharded.
pub const PLACEHOLDER_HASH: &str = "_not_available";
/// Driver name stamped into the placeholder's [`Meta`]; no backend owns it.
pub const PLACEHOLDER_DRIVER: &str = "placeholder";

const BUILTIN_SIDE: u32 = 256;
const BUILTIN_GREY: Rgb<u8> = Rgb([204, 204, 204]);

#[derive(Clone, Debug)]
pub struct Placeholder {
    meta: Meta,
    bytes: Arc<[u8]>,
}

impl Placeholder {
    /// A plain light-grey square PNG.
    pub fn builtin() -> Result<Self> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(BUILTIN_SIDE, BUILTIN_SIDE, BUILTIN_GREY));
        let bytes = error::image(imgstore_image::encode(&image, ImageType::Png))?;
        Ok(Self::with(BUILTIN_SIDE, BUILTIN_SIDE, ImageType::Png, bytes))
    }

    /// Any JPEG, PNG or GIF on disk.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await.or_raise(|| error::ErrorKind::Cache(path.to_path_buf()))?;
        let decoded = error::image(imgstore_image::decode(&bytes))?;
        Ok(Self::with(decoded.image.width(), decoded.image.height(), decoded.kind, bytes))
    }

    fn with(width: u32, height: u32, kind: ImageType, bytes: Vec<u8>) -> Self {
        let meta = Probe::new(PLACEHOLDER_HASH, width, height, kind).stored_by(PLACEHOLDER_DRIVER);
        Self { meta, bytes: bytes.into() }
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub(crate) fn bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub(crate) fn owns(&self, meta: &Meta) -> bool {
        meta.storage_driver() == PLACEHOLDER_DRIVER && meta.hash == PLACEHOLDER_HASH
    }
}
