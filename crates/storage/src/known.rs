//! Positive existence cache.
//!
//! Originals and derivatives are never deleted out of band, so once a key is
//! seen to exist it can be trusted to keep existing. Remembering that saves a
//! network round trip on every later check.

use crate::error::Result;
use crate::fs::write_atomic;
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Contents of an on-disk marker file.
const MARKER: &[u8] = b"known";

/// Remembers keys that are known to exist.
///
/// Always holds an in-memory set; with a directory configured it also leaves
/// a marker file per key so the knowledge survives restarts.
#[derive(Debug, Default)]
pub struct KnownCache {
    memory: RwLock<HashSet<String>>,
    dir: Option<PathBuf>,
}

impl KnownCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn persistent(dir: impl Into<PathBuf>) -> Self {
        Self { memory: RwLock::default(), dir: Some(dir.into()) }
    }

    /// Marker file for a key: keys may contain `/`, so they are hashed into a
    /// flat, sharded name instead of being used as paths.
    fn marker_path(&self, key: &str) -> Option<PathBuf> {
        let digest = blake3::hash(key.as_bytes()).to_hex().to_string();
        self.dir.as_ref().map(|dir| dir.join(&digest[..2]).join(&digest))
    }

    pub async fn contains(&self, key: &str) -> bool {
        if self.memory.read().await.contains(key) {
            return true;
        }
        let Some(marker) = self.marker_path(key) else {
            return false;
        };
        match tokio::fs::read(&marker).await {
            Ok(content) if content == MARKER => {
                self.memory.write().await.insert(key.to_string());
                true
            },
            _ => false,
        }
    }

    /// Record that `key` exists.
    ///
    /// The in-memory entry always lands; a failed marker write is returned so
    /// the caller can log it, but the store itself is unaffected.
    pub async fn remember(&self, key: &str) -> Result<()> {
        self.memory.write().await.insert(key.to_string());
        match self.marker_path(key) {
            Some(marker) => write_atomic(marker, MARKER).await,
            None => Ok(()),
        }
    }

    /// Drop `key`, for explicit removals only.
    pub async fn forget(&self, key: &str) {
        self.memory.write().await.remove(key);
        if let Some(marker) = self.marker_path(key)
            && let Err(err) = tokio::fs::remove_file(&marker).await
            && err.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(key, error = %err, "Failed to remove existence marker");
        }
    }
}
