//! Pure dimension parsing and crop/resize geometry.
//!
//! Nothing in here touches pixels; the codec applies the numbers.

use crate::error::{ErrorKind, Result};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Separator between width and height in a `WxH` dimensions token.
pub const DIMENSIONS_SEPARATOR: char = 'x';

/// Largest side, in pixels, any derivative (or the canvas it is cut from) may have.
pub const MAX_DERIVATIVE_SIDE: u32 = 10_000;

/// Parse a dimensions token into `(width, height)`.
///
/// `"210x150"` yields `(210, 150)`; a bare `"210"` yields a square `(210, 210)`.
/// Zero-sized or non-numeric tokens are rejected, as are sides larger than
/// [`MAX_DERIVATIVE_SIDE`].
///
/// ```
/// use imgstore_image::geometry::parse_dimensions;
/// assert_eq!(parse_dimensions("300x200").unwrap(), (300, 200));
/// assert_eq!(parse_dimensions("64").unwrap(), (64, 64));
/// assert!(parse_dimensions("0x10").is_err());
/// ```
pub fn parse_dimensions(token: &str) -> Result<(u32, u32)> {
    let invalid = || ErrorKind::InvalidDimensions(token.to_string());
    let parse = |part: &str| -> Result<u32> {
        match part.trim().parse::<u32>() {
            Ok(n) if (1..=MAX_DERIVATIVE_SIDE).contains(&n) => Ok(n),
            _ => exn::bail!(invalid()),
        }
    };
    match token.split_once(DIMENSIONS_SEPARATOR) {
        Some((width, height)) => Ok((parse(width)?, parse(height)?)),
        None => {
            let side = parse(token)?;
            Ok((side, side))
        },
    }
}

/// Resize behaviour flags.
///
/// Values match the bit flags used by the derivative cache names, so a
/// stored `…3002…` derivative was produced with [`STRETCH`](Self::STRETCH).
/// Flags combine with bitwise OR.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ResizeMode(u8);

impl ResizeMode {
    /// Fit inside the box, keeping the aspect ratio.
    pub const FIT: Self = Self(0);
    /// Never enlarge.
    pub const SHRINK_ONLY: Self = Self(0b0001);
    /// Ignore the aspect ratio and use the box as-is.
    pub const STRETCH: Self = Self(0b0010);
    /// Cover the box, keeping the aspect ratio (may overflow one side).
    pub const FILL: Self = Self(0b0100);
    /// Cover the box, then cut it out centered: output is exactly the box.
    pub const EXACT: Self = Self(0b1000);

    const ALL: u8 = 0b1111;

    pub fn from_bits(bits: u8) -> Option<Self> {
        (bits & !Self::ALL == 0).then_some(Self(bits))
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ResizeMode {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl Display for ResizeMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.bits())
    }
}

/// Where and how to cut a derivative out of an original.
///
/// The original is first resized to exactly `resize_width`×`resize_height`
/// (a canvas that covers the target box), then the `width`×`height` rectangle
/// at (`left`, `top`) is cut out of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRect {
    pub resize_width: u32,
    pub resize_height: u32,
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy)]
enum Axis {
    Height,
    Width,
}

/// Centered crop rectangle mapping an original onto a target box.
///
/// The original counts as landscape when wider than tall; the target counts
/// as landscape when wider than tall, and square when both sides match.
///
/// | original            | target               | scale to match |
/// |---------------------|----------------------|----------------|
/// | landscape           | landscape            | height         |
/// | landscape           | portrait or square   | height         |
/// | portrait or square  | landscape or square  | width          |
/// | portrait or square  | portrait             | height         |
///
/// When matching the chosen side leaves the other side short of the target,
/// the other side is matched instead, so the canvas always covers the box and
/// the output never needs letterboxing.
///
/// ```
/// use imgstore_image::geometry::crop_rect;
/// let rect = crop_rect((1600, 900), (300, 300));
/// assert_eq!((rect.resize_width, rect.resize_height), (533, 300));
/// assert_eq!((rect.left, rect.top), (117, 0));
/// ```
pub fn crop_rect(original: (u32, u32), target: (u32, u32)) -> CropRect {
    let (original_width, original_height) = original;
    let (target_width, target_height) = target;
    let original_landscape = original_width > original_height;
    let target_landscape = target_width > target_height;
    let square = target_width == target_height;

    let axis = match (original_landscape, target_landscape || square) {
        (true, _) => Axis::Height,
        (false, true) => Axis::Width,
        (false, false) => Axis::Height,
    };
    let rect = scale(original, target, axis);
    match axis {
        Axis::Height if rect.resize_width < target_width => scale(original, target, Axis::Width),
        Axis::Width if rect.resize_height < target_height => scale(original, target, Axis::Height),
        _ => rect,
    }
}

fn scale(original: (u32, u32), target: (u32, u32), axis: Axis) -> CropRect {
    let (original_width, original_height) = (f64::from(original.0), f64::from(original.1));
    let (width, height) = target;
    match axis {
        Axis::Height => {
            let coefficient = original_height / f64::from(height);
            let scaled_width = round(original_width / coefficient);
            CropRect {
                resize_width: scaled_width,
                resize_height: height,
                left: centre(scaled_width, width),
                top: 0,
                width,
                height,
            }
        },
        Axis::Width => {
            let coefficient = original_width / f64::from(width);
            let scaled_height = round(original_height / coefficient);
            CropRect {
                resize_width: width,
                resize_height: scaled_height,
                left: 0,
                top: centre(scaled_height, height),
                width,
                height,
            }
        },
    }
}

/// Half-away-from-zero rounding, never below one pixel.
fn round(value: f64) -> u32 {
    (value.round() as u32).max(1)
}

fn centre(scaled: u32, target: u32) -> u32 {
    (f64::from(scaled.saturating_sub(target)) / 2.0).round() as u32
}

/// Output size of a non-cropping resize into the target box.
///
/// [`EXACT`](ResizeMode::EXACT) is not a size computation; callers render it
/// with [`crop_rect`].
///
/// ```
/// use imgstore_image::geometry::{ResizeMode, fitted_size};
/// assert_eq!(fitted_size((1600, 900), (300, 300), ResizeMode::FIT), (300, 169));
/// assert_eq!(fitted_size((1600, 900), (300, 300), ResizeMode::STRETCH), (300, 300));
/// ```
pub fn fitted_size(original: (u32, u32), target: (u32, u32), mode: ResizeMode) -> (u32, u32) {
    let (original_width, original_height) = original;
    let (target_width, target_height) = target;
    let shrink_only = mode.contains(ResizeMode::SHRINK_ONLY);

    if mode.contains(ResizeMode::STRETCH) {
        return match shrink_only {
            true => (target_width.min(original_width), target_height.min(original_height)),
            false => (target_width, target_height),
        };
    }

    let scale_x = f64::from(target_width) / f64::from(original_width);
    let scale_y = f64::from(target_height) / f64::from(original_height);
    let mut factor = match mode.contains(ResizeMode::FILL) {
        true => scale_x.max(scale_y),
        false => scale_x.min(scale_y),
    };
    if shrink_only {
        factor = factor.min(1.0);
    }
    (round(f64::from(original_width) * factor), round(f64::from(original_height) * factor))
}
