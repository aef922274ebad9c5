//! Image Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// An image error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for image operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The image is in a format the store does not keep (only JPEG, PNG and
    /// GIF are supported). Fatal; retrying with the same input won't help.
    #[display("unsupported image type: {_0}")]
    ImageType(#[error(not(source))] String),
    /// A dimensions token was neither the original sentinel, `N` nor `WxH`.
    #[display("invalid dimensions token: {_0}")]
    InvalidDimensions(#[error(not(source))] String),
    /// A flags token was neither the original sentinel nor a known resize mode.
    #[display("invalid resize flags: {_0}")]
    InvalidFlags(#[error(not(source))] String),
    /// Originals only turn in quarter turns.
    #[display("cannot rotate by {_0} degrees")]
    InvalidRotation(#[error(not(source))] i32),
    /// Bytes could not be decoded as an image.
    #[display("image could not be decoded")]
    Decode,
    /// A decoded image could not be encoded back into its type.
    #[display("image could not be encoded")]
    Encode,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
