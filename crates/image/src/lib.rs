pub mod codec;
pub mod error;
pub mod geometry;
mod kind;
mod meta;
mod request;

pub use crate::codec::{DEFAULT_JPEG_QUALITY, content_hash, decode, encode, prepare, render, rotate};
pub use crate::geometry::{MAX_DERIVATIVE_SIDE, ResizeMode};
pub use crate::kind::ImageType;
pub use crate::meta::{Meta, Original, Probe, SPECIAL_HASH_PREFIX};
pub use crate::request::{DerivativeRequest, Dimensions, Flags, ORIGINAL};
