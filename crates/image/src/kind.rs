use crate::error::{ErrorKind, Result};
use image::ImageFormat;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// An image type the store keeps.
///
/// The type decides the file extension of the original and of every
/// derivative generated from it, and the MIME type served for them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ImageType {
    Jpeg,
    Png,
    Gif,
}

impl ImageType {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
        }
    }

    pub fn format(&self) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
            Self::Gif => ImageFormat::Gif,
        }
    }

    /// Map a detected codec format onto a stored type.
    ///
    /// Returns [`ImageType`](ErrorKind::ImageType) for anything that isn't
    /// JPEG, PNG or GIF.
    pub fn from_format(format: ImageFormat) -> Result<Self> {
        match format {
            ImageFormat::Jpeg => Ok(Self::Jpeg),
            ImageFormat::Png => Ok(Self::Png),
            ImageFormat::Gif => Ok(Self::Gif),
            other => exn::bail!(ErrorKind::ImageType(format!("{other:?}").to_lowercase())),
        }
    }
}

impl Display for ImageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Gif => "gif",
        })
    }
}

impl FromStr for ImageType {
    type Err = crate::error::Error;

    /// Accepts type names, file extensions and MIME types.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" | "image/jpeg" => Ok(Self::Jpeg),
            "png" | "image/png" => Ok(Self::Png),
            "gif" | "image/gif" => Ok(Self::Gif),
            other => exn::bail!(ErrorKind::ImageType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ImageType::Jpeg, "jpg", "image/jpeg")]
    #[case(ImageType::Png, "png", "image/png")]
    #[case(ImageType::Gif, "gif", "image/gif")]
    fn test_extension_and_mime(#[case] kind: ImageType, #[case] ext: &str, #[case] mime: &str) {
        assert_eq!(kind.extension(), ext);
        assert_eq!(kind.mime_type(), mime);
    }

    #[rstest]
    #[case("jpeg", ImageType::Jpeg)]
    #[case("JPG", ImageType::Jpeg)]
    #[case("image/png", ImageType::Png)]
    #[case("gif", ImageType::Gif)]
    fn test_from_str(#[case] input: &str, #[case] expected: ImageType) {
        assert_eq!(input.parse::<ImageType>().unwrap(), expected);
    }

    #[test]
    fn test_unsupported_type() {
        let err = "webp".parse::<ImageType>().unwrap_err();
        assert_eq!(*err, ErrorKind::ImageType("webp".to_string()));
        let err = ImageType::from_format(ImageFormat::Bmp).unwrap_err();
        assert!(matches!(&*err, ErrorKind::ImageType(_)));
    }

    #[test]
    fn test_format_roundtrip() {
        for kind in [ImageType::Jpeg, ImageType::Png, ImageType::Gif] {
            assert_eq!(ImageType::from_format(kind.format()).unwrap(), kind);
        }
    }
}
