//! The storage orchestrator.
//!
//! New uploads go to the primary driver, or wholesale to the fallback when
//! the primary fails to save them. Everything afterwards is routed by the
//! driver name recorded in the image's [`Meta`].

use crate::error::{self, ErrorKind, Result};
use crate::placeholder::Placeholder;
use crate::registry::Registry;
use exn::ResultExt;
use imgstore_image::{DerivativeRequest, Meta, Original};
use imgstore_storage::BackendHandle;
use imgstore_storage::error::ErrorKind as StorageKind;
use imgstore_storage::fs::write_atomic;
use imgstore_storage::layout::derivative_path;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::instrument;

/// Uploads larger than this are downscaled before being stored.
pub const DEFAULT_MAX_SIZE: (u32, u32) = (1920, 1080);

/// A derivative served from the local cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fetched {
    pub path: PathBuf,
    pub file_name: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

/// Everything a file response needs, without the bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Download {
    pub path: PathBuf,
    pub file_name: String,
    pub mime: &'static str,
}

#[derive(Debug)]
pub struct ImageStorage {
    registry: Registry,
    primary: String,
    fallback: Option<String>,
    cache_dir: PathBuf,
    placeholder: Placeholder,
    max_size: (u32, u32),
}

pub struct ImageStorageBuilder {
    drivers: Vec<BackendHandle>,
    primary: Option<String>,
    fallback: Option<String>,
    cache_dir: PathBuf,
    placeholder: Option<Placeholder>,
    max_size: (u32, u32),
}

impl ImageStorageBuilder {
    pub fn driver(mut self, driver: BackendHandle) -> Self {
        self.drivers.push(driver);
        self
    }

    pub fn primary(mut self, name: impl Into<String>) -> Self {
        self.primary = Some(name.into());
        self
    }

    pub fn fallback(mut self, name: impl Into<String>) -> Self {
        self.fallback = Some(name.into());
        self
    }

    pub fn placeholder(mut self, placeholder: Placeholder) -> Self {
        self.placeholder = Some(placeholder);
        self
    }

    pub fn max_size(mut self, width: u32, height: u32) -> Self {
        self.max_size = (width, height);
        self
    }

    pub fn build(self) -> Result<ImageStorage> {
        let registry = Registry::new(self.drivers)?;
        let Some(primary) = self.primary else {
            exn::bail!(ErrorKind::Config("no primary driver".to_string()));
        };
        registry.get(&primary)?;
        if let Some(fallback) = &self.fallback {
            registry.get(fallback)?;
        }
        let placeholder = match self.placeholder {
            Some(placeholder) => placeholder,
            None => Placeholder::builtin()?,
        };
        Ok(ImageStorage {
            registry,
            primary,
            fallback: self.fallback,
            cache_dir: self.cache_dir,
            placeholder,
            max_size: self.max_size,
        })
    }
}

impl ImageStorage {
    /// Start building an orchestrator that caches fetched derivatives under
    /// `cache_dir`.
    pub fn builder(cache_dir: impl Into<PathBuf>) -> ImageStorageBuilder {
        ImageStorageBuilder {
            drivers: Vec::new(),
            primary: None,
            fallback: None,
            cache_dir: cache_dir.into(),
            placeholder: None,
            max_size: DEFAULT_MAX_SIZE,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn placeholder(&self) -> &Meta {
        self.placeholder.meta()
    }

    /// Decode, hash and store an upload.
    ///
    /// A nonzero `code` means the transport already reported a failed upload;
    /// nothing is decoded.
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub async fn upload(&self, bytes: Vec<u8>, code: i32) -> Result<Meta> {
        if code != 0 {
            exn::bail!(ErrorKind::UploadCode(code));
        }
        let max_size = self.max_size;
        let original = tokio::task::spawn_blocking(move || imgstore_image::prepare(&bytes, max_size))
            .await
            .or_raise(|| ErrorKind::Image)?;
        self.save(&error::image(original)?).await
    }

    /// Store a prepared original on the primary driver, failing over to the
    /// fallback once.
    #[instrument(skip(self, original), fields(hash = %original.probe.hash))]
    pub async fn save(&self, original: &Original) -> Result<Meta> {
        let primary = self.registry.get(&self.primary)?;
        let err = match primary.save(original).await {
            Ok(meta) => {
                tracing::info!(driver = %primary.name(), "Saved original");
                return Ok(meta);
            },
            Err(err) => err,
        };
        let Some(fallback) = &self.fallback else {
            return error::saving(primary.name(), Err(err));
        };
        tracing::warn!(primary = %primary.name(), fallback = %fallback, error = ?err, "Primary driver failed, saving to fallback");
        let fallback = self.registry.get(fallback)?;
        let meta = error::saving(fallback.name(), fallback.save(original).await)?;
        tracing::info!(driver = %fallback.name(), "Saved original");
        Ok(meta)
    }

    /// Store a copy of an original turned clockwise by `degrees`.
    ///
    /// The turned image is a new original with its own hash, saved like any
    /// upload; the unturned one stays where it is until removed.
    #[instrument(skip(self, meta), fields(driver = %meta.storage_driver(), hash = %meta.hash))]
    pub async fn rotate(&self, meta: &Meta, degrees: i32) -> Result<Meta> {
        if degrees.rem_euclid(360) == 0 {
            return Ok(meta.clone());
        }
        let source = self.original(meta).await?;
        let max_size = self.max_size;
        let rotated = tokio::task::spawn_blocking(move || imgstore_image::rotate(&source, degrees, max_size))
            .await
            .or_raise(|| ErrorKind::Image)?;
        self.save(&error::image(rotated)?).await
    }

    /// Public locator of a derivative, generated by the owning driver on
    /// first use.
    #[instrument(skip(self, request), fields(driver = %request.meta().storage_driver(), key = %request.cache_key()))]
    pub async fn link(&self, request: &DerivativeRequest) -> Result<String> {
        let driver = self.registry.get(request.meta().storage_driver())?;
        error::driver(driver.name(), driver.link(request).await)
    }

    pub async fn contains(&self, meta: &Meta) -> Result<bool> {
        let driver = self.registry.get(meta.storage_driver())?;
        error::driver(driver.name(), driver.file_exists(meta).await)
    }

    pub async fn original(&self, meta: &Meta) -> Result<Vec<u8>> {
        let driver = self.registry.get(meta.storage_driver())?;
        error::driver(driver.name(), driver.original(meta).await)
    }

    /// Delete the stored original. Cached derivatives are left alone.
    pub async fn remove(&self, meta: &Meta) -> Result<()> {
        let driver = self.registry.get(meta.storage_driver())?;
        error::driver(driver.name(), driver.remove(meta).await)?;
        tracing::info!(driver = %driver.name(), hash = %meta.hash, "Removed original");
        Ok(())
    }

    /// Bytes of a derivative from the local cache, rendering it on a miss.
    ///
    /// When the original is gone from its driver the same derivative of the
    /// placeholder image is served instead.
    #[instrument(skip(self, request), fields(key = %request.cache_key()))]
    pub async fn fetch(&self, request: &DerivativeRequest) -> Result<Fetched> {
        if let Some(fetched) = self.cached(request).await? {
            return Ok(fetched);
        }
        match self.source(request.meta()).await? {
            Some(source) => self.generate(request, source).await,
            None => {
                tracing::warn!(
                    driver = %request.meta().storage_driver(),
                    hash = %request.meta().hash,
                    "Original is missing, serving placeholder",
                );
                let substitute = request.clone().with_meta(self.placeholder.meta().clone());
                match self.cached(&substitute).await? {
                    Some(fetched) => Ok(fetched),
                    None => self.generate(&substitute, self.placeholder.bytes()).await,
                }
            },
        }
    }

    /// Like [`fetch()`](Self::fetch), for callers that respond with the file.
    pub async fn download(&self, request: &DerivativeRequest) -> Result<Download> {
        let Fetched { path, file_name, mime, .. } = self.fetch(request).await?;
        Ok(Download { path, file_name, mime })
    }

    /// Write a derivative to `writer` and return its MIME type.
    pub async fn send<W>(&self, request: &DerivativeRequest, writer: &mut W) -> Result<&'static str>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let fetched = self.fetch(request).await?;
        writer.write_all(&fetched.bytes).await.or_raise(|| ErrorKind::Write)?;
        writer.flush().await.or_raise(|| ErrorKind::Write)?;
        Ok(fetched.mime)
    }

    fn cache_path(&self, request: &DerivativeRequest) -> Result<PathBuf> {
        cache_location(&self.cache_dir, request)
    }

    async fn cached(&self, request: &DerivativeRequest) -> Result<Option<Fetched>> {
        let path = self.cache_path(request)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                tracing::debug!(path = %path.display(), "Derivative cache hit");
                Ok(Some(fetched(request, path, bytes)))
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).or_raise(|| ErrorKind::Cache(path)),
        }
    }

    /// Original bytes for `meta`, or `None` when its driver no longer has it.
    async fn source(&self, meta: &Meta) -> Result<Option<Arc<[u8]>>> {
        if self.placeholder.owns(meta) {
            return Ok(Some(self.placeholder.bytes()));
        }
        let driver = self.registry.get(meta.storage_driver())?;
        match driver.original(meta).await {
            Ok(bytes) => Ok(Some(bytes.into())),
            Err(err) if matches!(&*err, StorageKind::NotFound(_)) => Ok(None),
            Err(err) => error::driver(driver.name(), Err(err)),
        }
    }

    async fn generate(&self, request: &DerivativeRequest, source: Arc<[u8]>) -> Result<Fetched> {
        let path = self.cache_path(request)?;
        let owned = request.clone();
        let bytes = tokio::task::spawn_blocking(move || imgstore_image::render(&source, &owned))
            .await
            .or_raise(|| ErrorKind::Image)?;
        let bytes = error::image(bytes)?;
        write_atomic(&path, bytes.clone()).await.or_raise(|| ErrorKind::Cache(path.clone()))?;
        tracing::info!(path = %path.display(), "Cached derivative");
        Ok(fetched(request, path, bytes))
    }
}

fn fetched(request: &DerivativeRequest, path: PathBuf, bytes: Vec<u8>) -> Fetched {
    Fetched { file_name: request.file_name(), mime: request.meta().kind.mime_type(), path, bytes }
}

/// Where `fetch` caches a derivative: the same sharded layout every
/// filesystem-like driver uses, rooted at `cache_dir`.
pub fn cache_location(cache_dir: &Path, request: &DerivativeRequest) -> Result<PathBuf> {
    Ok(cache_dir.join(error::driver(request.meta().storage_driver(), derivative_path(request))?))
}
