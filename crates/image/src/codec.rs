//! Glue between the store and the `image` crate.
//!
//! Everything here is CPU-bound and synchronous; async callers run it on a
//! blocking thread.

use crate::error::{ErrorKind, Result};
use crate::geometry::{MAX_DERIVATIVE_SIDE, ResizeMode, crop_rect, fitted_size};
use crate::kind::ImageType;
use crate::meta::{Original, Probe};
use crate::request::DerivativeRequest;
use exn::ResultExt;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageReader};
use std::io::Cursor;
use tracing::instrument;

/// Quality used whenever a JPEG is re-encoded.
pub const DEFAULT_JPEG_QUALITY: u8 = 75;
const FILTER: FilterType = FilterType::Lanczos3;

#[derive(Debug)]
pub struct Decoded {
    pub image: DynamicImage,
    pub kind: ImageType,
}

/// Decode raw bytes, detecting the type from content rather than trusting any
/// declared name.
pub fn decode(bytes: &[u8]) -> Result<Decoded> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format().or_raise(|| ErrorKind::Decode)?;
    let Some(format) = reader.format() else {
        exn::bail!(ErrorKind::ImageType("unknown".to_string()));
    };
    let kind = ImageType::from_format(format)?;
    let image = reader.decode().or_raise(|| ErrorKind::Decode)?;
    Ok(Decoded { image, kind })
}

/// Hex BLAKE3 digest of the decoded pixels.
///
/// Two files that decode to the same pixels (e.g. differing only in metadata
/// chunks) share a hash and therefore a single stored original.
pub fn content_hash(image: &DynamicImage) -> String {
    let pixels = image.to_rgba8();
    let mut hasher = blake3::Hasher::new();
    hasher.update(&pixels.width().to_le_bytes());
    hasher.update(&pixels.height().to_le_bytes());
    hasher.update(pixels.as_raw());
    hasher.finalize().to_hex().to_string()
}

/// Encode `image` as `kind`.
pub fn encode(image: &DynamicImage, kind: ImageType) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    match kind {
        ImageType::Jpeg => {
            let rgb = image.to_rgb8();
            JpegEncoder::new_with_quality(&mut bytes, DEFAULT_JPEG_QUALITY)
                .encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
                .or_raise(|| ErrorKind::Encode)?;
        },
        ImageType::Png => {
            image.write_to(&mut Cursor::new(&mut bytes), kind.format()).or_raise(|| ErrorKind::Encode)?;
        },
        ImageType::Gif => {
            DynamicImage::ImageRgba8(image.to_rgba8())
                .write_to(&mut Cursor::new(&mut bytes), kind.format())
                .or_raise(|| ErrorKind::Encode)?;
        },
    }
    Ok(bytes)
}

/// Turn an upload into an [`Original`] ready to persist.
///
/// The hash is taken from the pixels as uploaded. Images larger than
/// `max` in either direction are scaled down (aspect kept) and re-encoded;
/// anything else keeps its uploaded bytes untouched.
#[instrument(skip(bytes), fields(len = bytes.len()))]
pub fn prepare(bytes: &[u8], max: (u32, u32)) -> Result<Original> {
    let Decoded { image, kind } = decode(bytes)?;
    let hash = content_hash(&image);
    let (max_width, max_height) = max;

    if image.width() <= max_width && image.height() <= max_height {
        let probe = Probe::new(hash, image.width(), image.height(), kind);
        return Ok(Original { probe, bytes: bytes.to_vec() });
    }

    let (width, height) = fitted_size((image.width(), image.height()), max, ResizeMode::SHRINK_ONLY);
    tracing::debug!(from_width = image.width(), from_height = image.height(), width, height, "Downscaling original");
    let scaled = image.resize_exact(width, height, FILTER);
    let probe = Probe::new(hash, scaled.width(), scaled.height(), kind);
    Ok(Original { probe, bytes: encode(&scaled, kind)? })
}

/// Produce the derivative bytes for `request` from the original's bytes.
///
/// Output is encoded in the type recorded on the request's metadata, so it
/// always matches the extension the derivative is stored under.
#[instrument(skip(source, request), fields(key = %request.cache_key()))]
pub fn render(source: &[u8], request: &DerivativeRequest) -> Result<Vec<u8>> {
    let Some(target) = request.dimensions().size() else {
        return Ok(source.to_vec());
    };
    let Decoded { image, .. } = decode(source)?;
    let size = (image.width(), image.height());
    let mode = request.flags().mode();

    let output = if request.is_crop() || mode.contains(ResizeMode::EXACT) {
        let rect = crop_rect(size, target);
        within_bounds(rect.resize_width, rect.resize_height)?;
        image.resize_exact(rect.resize_width, rect.resize_height, FILTER).crop_imm(
            rect.left,
            rect.top,
            rect.width,
            rect.height,
        )
    } else {
        let (width, height) = fitted_size(size, target, mode);
        within_bounds(width, height)?;
        image.resize_exact(width, height, FILTER)
    };
    encode(&output, request.meta().kind)
}

fn within_bounds(width: u32, height: u32) -> Result<()> {
    if width > MAX_DERIVATIVE_SIDE || height > MAX_DERIVATIVE_SIDE {
        exn::bail!(ErrorKind::InvalidDimensions(format!("{width}x{height}")));
    }
    Ok(())
}

/// Rotate an original clockwise by a multiple of 90 degrees.
///
/// The result is re-encoded in the same type and prepared like a fresh
/// upload, so it carries its own content hash.
#[instrument(skip(source), fields(len = source.len()))]
pub fn rotate(source: &[u8], degrees: i32, max: (u32, u32)) -> Result<Original> {
    let Decoded { image, kind } = decode(source)?;
    let rotated = match degrees.rem_euclid(360) {
        0 => image,
        90 => image.rotate90(),
        180 => image.rotate180(),
        270 => image.rotate270(),
        _ => exn::bail!(ErrorKind::InvalidRotation(degrees)),
    };
    prepare(&encode(&rotated, kind)?, max)
}
