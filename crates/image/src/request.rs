use crate::error::{Error, ErrorKind, Result};
use crate::geometry::{ResizeMode, parse_dimensions};
use crate::meta::Meta;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Sentinel token meaning "leave this aspect of the original alone".
pub const ORIGINAL: &str = "original";

/// Requested size of a derivative.
///
/// The token form is part of the cache identity, so `"300"` and `"300x300"`
/// name different (if identical-looking) artifacts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Dimensions {
    #[default]
    Original,
    Square(u32),
    Rect {
        width: u32,
        height: u32,
    },
}

impl Dimensions {
    /// Target `(width, height)`, or `None` for the original size.
    pub fn size(&self) -> Option<(u32, u32)> {
        match *self {
            Self::Original => None,
            Self::Square(side) => Some((side, side)),
            Self::Rect { width, height } => Some((width, height)),
        }
    }

    pub fn is_original(&self) -> bool {
        matches!(self, Self::Original)
    }
}

impl FromStr for Dimensions {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim();
        if token.eq_ignore_ascii_case(ORIGINAL) {
            return Ok(Self::Original);
        }
        let (width, height) = parse_dimensions(token)?;
        Ok(match token.contains(crate::geometry::DIMENSIONS_SEPARATOR) {
            true => Self::Rect { width, height },
            false => Self::Square(width),
        })
    }
}

impl Display for Dimensions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Original => f.write_str(ORIGINAL),
            Self::Square(side) => write!(f, "{side}"),
            Self::Rect { width, height } => write!(f, "{width}x{height}"),
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Dimensions {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Dimensions {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let token = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        token.parse().map_err(|err: Error| serde::de::Error::custom(&*err))
    }
}

/// Requested resize behaviour.
///
/// [`Original`](Flags::Original) means no explicit mode was asked for and
/// renders like [`ResizeMode::FIT`]; it still keys its own cache entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Flags {
    #[default]
    Original,
    Mode(ResizeMode),
}

impl Flags {
    pub fn mode(&self) -> ResizeMode {
        match self {
            Self::Original => ResizeMode::FIT,
            Self::Mode(mode) => *mode,
        }
    }
}

impl From<ResizeMode> for Flags {
    fn from(mode: ResizeMode) -> Self {
        Self::Mode(mode)
    }
}

impl FromStr for Flags {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim();
        if token.eq_ignore_ascii_case(ORIGINAL) {
            return Ok(Self::Original);
        }
        token
            .parse::<u8>()
            .ok()
            .and_then(ResizeMode::from_bits)
            .map(Self::Mode)
            .ok_or_else(|| Error::from(ErrorKind::InvalidFlags(token.to_string())))
    }
}

impl Display for Flags {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Original => f.write_str(ORIGINAL),
            Self::Mode(mode) => write!(f, "{mode}"),
        }
    }
}

/// A request for one derivative of a stored image.
///
/// Identity for caching is `(hash, dimensions, flags, crop)`; see
/// [`cache_key`](Self::cache_key).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DerivativeRequest {
    meta: Meta,
    dimensions: Dimensions,
    flags: Flags,
    crop: bool,
}

impl DerivativeRequest {
    pub fn new(meta: Meta, dimensions: Dimensions, flags: Flags, crop: bool) -> Self {
        Self { meta, dimensions, flags, crop }
    }

    /// The stored original itself.
    pub fn original(meta: Meta) -> Self {
        Self::new(meta, Dimensions::Original, Flags::Original, false)
    }

    /// A centered crop filling `dimensions` exactly.
    pub fn crop(meta: Meta, dimensions: Dimensions) -> Self {
        Self::new(meta, dimensions, Flags::Mode(ResizeMode::FIT), true)
    }

    pub fn resize(meta: Meta, dimensions: Dimensions, flags: Flags) -> Self {
        Self::new(meta, dimensions, flags, false)
    }

    /// The request shape drivers pregenerate after saving an original.
    pub fn preview(meta: Meta, dimensions: Dimensions) -> Self {
        Self::new(meta, dimensions, Flags::Original, false)
    }

    /// Same request, pointed at different image metadata.
    pub fn with_meta(self, meta: Meta) -> Self {
        Self { meta, ..self }
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn is_crop(&self) -> bool {
        self.crop
    }

    /// `true` when the request resolves to the untouched original.
    pub fn is_original(&self) -> bool {
        self.dimensions.is_original()
    }

    /// Hash, dimensions token, flags token and crop flag run together.
    ///
    /// ```
    /// use imgstore_image::{DerivativeRequest, ImageType, Probe};
    /// let meta = Probe::new("abcd1234", 800, 600, ImageType::Png).stored_by("local");
    /// let request = DerivativeRequest::resize(meta, "300x200".parse().unwrap(), "2".parse().unwrap());
    /// assert_eq!(request.cache_key(), "abcd1234300x2002false");
    /// ```
    pub fn cache_key(&self) -> String {
        format!("{}{}{}{}", self.meta.hash, self.dimensions, self.flags, self.crop)
    }

    /// Cache key plus the extension of the original's type.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.cache_key(), self.meta.kind.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::ImageType;
    use crate::meta::Probe;
    use rstest::rstest;

    fn meta() -> Meta {
        Probe::new("abcd1234", 1600, 900, ImageType::Jpeg).stored_by("local")
    }

    #[rstest]
    #[case("original", Dimensions::Original)]
    #[case("ORIGINAL", Dimensions::Original)]
    #[case("300", Dimensions::Square(300))]
    #[case("300x200", Dimensions::Rect { width: 300, height: 200 })]
    fn test_dimensions_token(#[case] token: &str, #[case] expected: Dimensions) {
        let parsed: Dimensions = token.parse().unwrap();
        assert_eq!(parsed, expected);
        assert_eq!(parsed.to_string(), token.to_lowercase());
    }

    #[test]
    fn test_dimensions_invalid() {
        let err = "wide".parse::<Dimensions>().unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidDimensions(_)));
    }

    #[rstest]
    #[case("original", Flags::Original)]
    #[case("0", Flags::Mode(ResizeMode::FIT))]
    #[case("2", Flags::Mode(ResizeMode::STRETCH))]
    #[case("9", Flags::Mode(ResizeMode::EXACT | ResizeMode::SHRINK_ONLY))]
    fn test_flags_token(#[case] token: &str, #[case] expected: Flags) {
        let parsed: Flags = token.parse().unwrap();
        assert_eq!(parsed, expected);
        assert_eq!(parsed.to_string(), token);
    }

    #[rstest]
    #[case("fit")]
    #[case("16")]
    #[case("-1")]
    fn test_flags_invalid(#[case] token: &str) {
        let err = token.parse::<Flags>().unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidFlags(token.to_string()));
    }

    #[test]
    fn test_flags_original_renders_as_fit() {
        assert_eq!(Flags::Original.mode(), ResizeMode::FIT);
    }

    #[test]
    fn test_cache_key_and_file_name() {
        let request = DerivativeRequest::new(
            meta(),
            Dimensions::Rect { width: 300, height: 200 },
            Flags::Mode(ResizeMode::STRETCH),
            true,
        );
        assert_eq!(request.cache_key(), "abcd1234300x2002true");
        assert_eq!(request.file_name(), "abcd1234300x2002true.jpg");
    }

    #[test]
    fn test_constructors() {
        let crop = DerivativeRequest::crop(meta(), Dimensions::Square(64));
        assert!(crop.is_crop());
        assert_eq!(crop.flags(), Flags::Mode(ResizeMode::FIT));
        assert_eq!(crop.cache_key(), "abcd1234640true");

        let preview = DerivativeRequest::preview(meta(), Dimensions::Square(64));
        assert!(!preview.is_crop());
        assert_eq!(preview.cache_key(), "abcd123464originalfalse");

        let original = DerivativeRequest::original(meta());
        assert!(original.is_original());
        assert_eq!(original.cache_key(), "abcd1234originaloriginalfalse");
    }

    #[test]
    fn test_equal_tuples_share_cache_key() {
        let a = DerivativeRequest::resize(meta(), "300".parse().unwrap(), "4".parse().unwrap());
        let other_driver = meta().into_probe().stored_by("remote");
        let b = DerivativeRequest::resize(other_driver, "300".parse().unwrap(), "4".parse().unwrap());
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), DerivativeRequest::crop(meta(), "300".parse().unwrap()).cache_key());
    }

    #[test]
    fn test_with_meta_keeps_request_shape() {
        let placeholder = Probe::new("_not_available", 10, 10, ImageType::Png).stored_by("placeholder");
        let request = DerivativeRequest::crop(meta(), Dimensions::Square(32)).with_meta(placeholder);
        assert_eq!(request.file_name(), "_not_available320true.png");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_dimensions_serde_as_token() {
        let dims: Vec<Dimensions> = serde_json::from_str(r#"["300","640x480"]"#).unwrap();
        assert_eq!(dims, vec![Dimensions::Square(300), Dimensions::Rect { width: 640, height: 480 }]);
        assert_eq!(serde_json::to_string(&dims).unwrap(), r#"["300","640x480"]"#);
        assert!(serde_json::from_str::<Dimensions>(r#""0x1""#).is_err());
    }
}
