//! In-memory storage backend for testing.

use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::layout::{derivative_path, key, original_path};
use async_trait::async_trait;
use imgstore_image::{DerivativeRequest, Dimensions, Meta, Original, Probe};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// In-memory storage backend for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation. Every trait call
/// that would touch storage is counted, which lets tests assert that a code
/// path performed no I/O at all.
///
/// Derivatives are not rendered: `link()` records the derivative key and
/// returns a `mock://<name>/<key>` locator.
///
/// # Examples
///
/// ```
/// use imgstore_image::{ImageType, Original, Probe};
/// use imgstore_storage::backend::{MockBackend, StorageBackend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::default().with_name("memory");
/// let original = Original { probe: Probe::new("abcd", 1, 1, ImageType::Png), bytes: vec![1, 2, 3] };
/// let meta = backend.save(&original).await?;
/// assert_eq!(meta.storage_driver(), "memory");
/// assert!(backend.file_exists(&meta).await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<HashMap<String, Vec<u8>>>,
    failing: bool,
    io_calls: AtomicUsize,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<String>, impl Into<Vec<u8>>)>) -> Self {
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(files.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
            failing: false,
            io_calls: AtomicUsize::new(0),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make every storage operation fail with a network error, like a
    /// backend whose server is unreachable.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Number of storage operations attempted so far.
    pub fn io_calls(&self) -> usize {
        self.io_calls.load(Ordering::SeqCst)
    }

    /// Whether a file with this `/`-separated key is stored.
    pub async fn contains_key(&self, key: &str) -> bool {
        self.storage.read().await.contains_key(key)
    }

    fn touch(&self) -> Result<()> {
        self.io_calls.fetch_add(1, Ordering::SeqCst);
        match self.failing {
            true => exn::bail!(ErrorKind::Network(format!("mock backend `{}` is unreachable", self.name))),
            false => Ok(()),
        }
    }

    fn original_key(probe: &Probe) -> Result<String> {
        Ok(key(&original_path(probe)?))
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &[u8]); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn previews(&self) -> &[Dimensions] {
        &[]
    }

    async fn save(&self, original: &Original) -> Result<Meta> {
        self.touch()?;
        let key = Self::original_key(&original.probe)?;
        self.storage.write().await.entry(key).or_insert_with(|| original.bytes.clone());
        Ok(original.probe.clone().stored_by(&self.name))
    }

    async fn file_exists(&self, probe: &Probe) -> Result<bool> {
        self.touch()?;
        Ok(self.storage.read().await.contains_key(&Self::original_key(probe)?))
    }

    async fn link(&self, request: &DerivativeRequest) -> Result<String> {
        let source = self.original(request.meta()).await?;
        let key = key(&derivative_path(request)?);
        self.storage.write().await.entry(key.clone()).or_insert(source);
        Ok(format!("mock://{}/{key}", self.name))
    }

    async fn original(&self, meta: &Meta) -> Result<Vec<u8>> {
        self.touch()?;
        let key = Self::original_key(meta)?;
        let guard = self.storage.read().await;
        guard.get(&key).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(PathBuf::from(key))))
    }

    async fn remove(&self, meta: &Meta) -> Result<()> {
        self.touch()?;
        let key = Self::original_key(meta)?;
        match self.storage.write().await.remove(&key) {
            Some(_) => Ok(()),
            None => exn::bail!(ErrorKind::NotFound(PathBuf::from(key))),
        }
    }
}
