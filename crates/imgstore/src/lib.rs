pub mod error;
mod placeholder;
mod registry;
mod setup;
mod storage;

pub use crate::placeholder::{PLACEHOLDER_DRIVER, PLACEHOLDER_HASH, Placeholder};
pub use crate::registry::Registry;
pub use crate::storage::{DEFAULT_MAX_SIZE, Download, Fetched, ImageStorage, ImageStorageBuilder, cache_location};
pub use imgstore_config::Config;
pub use imgstore_image::{DerivativeRequest, Dimensions, Flags, ImageType, Meta, Original, Probe, ResizeMode};
