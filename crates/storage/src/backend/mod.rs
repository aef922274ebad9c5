//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! interface for persisting originals and serving derivatives across very
//! different stores (local filesystem, FTP servers, S3-compatible services).

#[cfg(feature = "ftp")]
mod ftp;
mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

#[cfg(feature = "ftp")]
pub use self::ftp::FtpBackend;
pub use self::local::FilesystemBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
#[cfg(feature = "s3")]
pub use self::s3::ObjectStorageBackend;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use imgstore_image::{DerivativeRequest, Dimensions, Meta, Original, Probe};
use std::sync::{Arc, Mutex};

/// Unified interface for storage backends.
///
/// Every backend keeps each original exactly once, keyed by content hash, and
/// produces derivatives lazily on [`link()`](Self::link). Operations are
/// idempotent: saving an already-stored hash is a no-op, and two callers
/// racing to generate the same derivative both succeed with identical bytes
/// (last writer wins).
///
/// # Examples
///
/// ```no_run
/// use imgstore_image::{DerivativeRequest, Dimensions, Original};
/// use imgstore_storage::{StorageBackend, error::Result};
///
/// async fn thumbnail(backend: &dyn StorageBackend, original: &Original) -> Result<String> {
///     let meta = backend.save(original).await?;
///     backend.link(&DerivativeRequest::crop(meta, Dimensions::Square(150))).await
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend (name taken from the configuration
    /// object key). Stamped into every [`Meta`] this backend saves and used
    /// to route later requests back here, so it must be unique.
    fn name(&self) -> &str;

    /// Dimension tokens to pregenerate right after a save.
    fn previews(&self) -> &[Dimensions];

    /// Persist an original and return its metadata stamped with this
    /// backend's name.
    ///
    /// Already-stored hashes are not written again. Writes become visible
    /// atomically: a concurrent reader never observes a partial original.
    async fn save(&self, original: &Original) -> Result<Meta>;

    /// Whether the original for `probe` is stored here.
    ///
    /// Positive answers are final; backends may cache them.
    async fn file_exists(&self, probe: &Probe) -> Result<bool>;

    /// Locator (URL or path) of a derivative, generating and storing it first
    /// when it doesn't exist yet.
    async fn link(&self, request: &DerivativeRequest) -> Result<String>;

    /// Raw bytes of a stored original.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the
    /// original isn't stored here.
    async fn original(&self, meta: &Meta) -> Result<Vec<u8>>;

    /// Delete a stored original. Derivatives are left in place.
    async fn remove(&self, meta: &Meta) -> Result<()>;

    /// Generate every configured preview for `meta`.
    ///
    /// Best-effort: failures are logged and skipped, never returned, so a
    /// flaky preview can't fail the save that triggered it. Returns how many
    /// previews are in place.
    async fn pregenerate(&self, meta: &Meta) -> usize {
        let requests: Vec<_> =
            self.previews().iter().map(|dims| DerivativeRequest::preview(meta.clone(), *dims)).collect();
        if requests.is_empty() {
            return 0;
        }
        let results = futures::future::join_all(requests.iter().map(|request| self.link(request))).await;
        let mut generated = 0;
        for (request, result) in requests.iter().zip(results) {
            match result {
                Ok(_) => generated += 1,
                Err(err) => tracing::warn!(
                    backend = self.name(),
                    key = %request.cache_key(),
                    error = ?err,
                    "Preview pregeneration failed",
                ),
            }
        }
        generated
    }
}

/// Render a derivative on a blocking thread.
pub(crate) async fn render(source: Arc<[u8]>, request: &DerivativeRequest) -> Result<Vec<u8>> {
    let request = request.clone();
    tokio::task::spawn_blocking(move || imgstore_image::render(&source, &request))
        .await
        .or_raise(|| ErrorKind::BackendError("render task panicked".to_string()))?
        .or_raise(|| ErrorKind::Image)
}

/// The most recently saved original, kept so that pregeneration straight
/// after a save doesn't download it again.
#[derive(Debug, Default)]
pub(crate) struct RecentOriginal(Mutex<Option<(String, Arc<[u8]>)>>);

impl RecentOriginal {
    pub(crate) fn keep(&self, hash: &str, bytes: Arc<[u8]>) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some((hash.to_string(), bytes));
        }
    }

    pub(crate) fn get(&self, hash: &str) -> Option<Arc<[u8]>> {
        let slot = self.0.lock().ok()?;
        slot.as_ref().filter(|(kept, _)| kept == hash).map(|(_, bytes)| Arc::clone(bytes))
    }

    pub(crate) fn clear(&self, hash: &str) {
        if let Ok(mut slot) = self.0.lock()
            && slot.as_ref().is_some_and(|(kept, _)| kept == hash)
        {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_original_single_slot() {
        let recent = RecentOriginal::default();
        assert!(recent.get("aaaa").is_none());
        recent.keep("aaaa", Arc::from(&b"one"[..]));
        assert_eq!(recent.get("aaaa").as_deref(), Some(&b"one"[..]));
        recent.keep("bbbb", Arc::from(&b"two"[..]));
        assert!(recent.get("aaaa").is_none());
        recent.clear("aaaa");
        assert!(recent.get("bbbb").is_some());
        recent.clear("bbbb");
        assert!(recent.get("bbbb").is_none());
    }
}
