use image::{DynamicImage, Rgb, RgbImage};
use imgstore_image::{ImageType, Original};

/// A gradient image, prepared the way the orchestrator prepares uploads.
pub(crate) fn original(width: u32, height: u32, kind: ImageType) -> Original {
    let image = RgbImage::from_fn(width, height, |x, y| Rgb([(x * 3 % 256) as u8, (y * 5 % 256) as u8, 90]));
    let bytes = imgstore_image::encode(&DynamicImage::ImageRgb8(image), kind).unwrap();
    imgstore_image::prepare(&bytes, (1920, 1080)).unwrap()
}
