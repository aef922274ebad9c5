pub mod backend;
pub mod error;
pub mod fs;
pub mod known;
pub mod layout;
pub mod settings;
#[cfg(test)]
mod testing;

pub use crate::backend::StorageBackend;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
