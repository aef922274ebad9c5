//! Local filesystem storage backend.
//!
//! Originals go into a hash-sharded tree under the data directory, generated
//! derivatives into the same shard layout under a separate cache directory
//! that is expected to be served publicly.

use crate::error::{ErrorKind, Result};
use crate::fs::write_atomic;
use crate::layout::{derivative_path, join_url, key, original_path};
use crate::settings::FilesystemSettings;
use crate::{StorageBackend, backend::render};
use async_trait::async_trait;
use imgstore_image::{DerivativeRequest, Dimensions, Meta, Original, Probe};
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::instrument;

/// Local filesystem storage backend.
///
/// # Examples
///
/// ```no_run
/// use imgstore_storage::backend::FilesystemBackend;
/// use imgstore_storage::settings::FilesystemSettings;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = FilesystemBackend::new("local", FilesystemSettings {
///     data_dir: "/srv/images/data".into(),
///     cache_dir: "/srv/images/cache".into(),
///     public_url: "https://img.example.com/cache/".to_string(),
///     previews: vec![],
/// })?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct FilesystemBackend {
    name: String,
    data_dir: PathBuf,
    cache_dir: PathBuf,
    public_url: String,
    previews: Vec<Dimensions>,
}

impl FilesystemBackend {
    /// Create a new local filesystem backend.
    ///
    /// # Errors
    ///
    /// Returns an error if either directory is not absolute, exists but is
    /// not a directory, or cannot be created.
    pub fn new(name: impl Into<String>, settings: FilesystemSettings) -> Result<Self> {
        let data_dir = Self::prepare_root(settings.data_dir)?;
        let cache_dir = Self::prepare_root(settings.cache_dir)?;
        Ok(Self {
            name: name.into(),
            data_dir,
            cache_dir,
            public_url: settings.public_url,
            previews: settings.previews,
        })
    }

    fn prepare_root(root: PathBuf) -> Result<PathBuf> {
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Use non-async here; it'll only happen once on startup and it's
            // not worth the hassle of making the constructor async.
            sync_create_dir(&root).map_err(|e| ErrorKind::io(e, &root))?;
        }
        Ok(root)
    }

    fn original_file(&self, probe: &Probe) -> Result<PathBuf> {
        Ok(self.data_dir.join(original_path(probe)?))
    }

    async fn is_file(path: &Path) -> Result<bool> {
        Ok(fs::try_exists(path).await.map_err(|e| ErrorKind::io(e, path))?)
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn previews(&self) -> &[Dimensions] {
        &self.previews
    }

    #[instrument(skip(self, original), fields(backend = %self.name, hash = %original.probe.hash))]
    async fn save(&self, original: &Original) -> Result<Meta> {
        let path = self.original_file(&original.probe)?;
        if !Self::is_file(&path).await? {
            write_atomic(&path, original.bytes.clone()).await?;
            tracing::info!(path = %path.display(), "Stored original");
        }
        let meta = original.probe.clone().stored_by(&self.name);
        self.pregenerate(&meta).await;
        Ok(meta)
    }

    async fn file_exists(&self, probe: &Probe) -> Result<bool> {
        Self::is_file(&self.original_file(probe)?).await
    }

    #[instrument(skip(self, request), fields(backend = %self.name, key = %request.cache_key()))]
    async fn link(&self, request: &DerivativeRequest) -> Result<String> {
        let relative = derivative_path(request)?;
        let cached = self.cache_dir.join(&relative);
        if Self::is_file(&cached).await? {
            tracing::debug!("Derivative cache hit");
        } else {
            let source: Arc<[u8]> = self.original(request.meta()).await?.into();
            write_atomic(&cached, render(source, request).await?).await?;
            tracing::info!(path = %cached.display(), "Generated derivative");
        }
        Ok(join_url(&self.public_url, &key(&relative)))
    }

    async fn original(&self, meta: &Meta) -> Result<Vec<u8>> {
        let path = self.original_file(meta)?;
        Ok(fs::read(&path).await.map_err(|e| ErrorKind::io(e, &path))?)
    }

    async fn remove(&self, meta: &Meta) -> Result<()> {
        let path = self.original_file(meta)?;
        fs::remove_file(&path).await.map_err(|e| ErrorKind::io(e, &path))?;
        tracing::info!(backend = %self.name, path = %path.display(), "Removed original");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::original;
    use imgstore_image::{Flags, ImageType};

    fn backend(root: &Path, previews: Vec<Dimensions>) -> FilesystemBackend {
        FilesystemBackend::new(
            "local",
            FilesystemSettings {
                data_dir: root.join("data"),
                cache_dir: root.join("cache"),
                public_url: "https://img.example.com/cache/".to_string(),
                previews,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_new_requires_absolute_paths() {
        let settings = FilesystemSettings {
            data_dir: "relative/data".into(),
            cache_dir: "/tmp/cache".into(),
            public_url: "/".to_string(),
            previews: vec![],
        };
        let err = FilesystemBackend::new("local", settings).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_save_stores_sharded_original() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(temp_dir.path(), vec![]);
        let original = original(40, 30, ImageType::Png);

        assert!(!backend.file_exists(&original.probe).await.unwrap());
        let meta = backend.save(&original).await.unwrap();
        assert_eq!(meta.storage_driver(), "local");
        assert!(backend.file_exists(&meta).await.unwrap());

        let hash = &meta.hash;
        let expected = temp_dir.path().join("data").join(&hash[..2]).join(&hash[2..4]).join(format!("{hash}.png"));
        assert_eq!(std::fs::read(expected).unwrap(), original.bytes);
        assert_eq!(backend.original(&meta).await.unwrap(), original.bytes);
    }

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(temp_dir.path(), vec![]);
        let original = original(20, 20, ImageType::Jpeg);
        let first = backend.save(&original).await.unwrap();
        let second = backend.save(&original).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_link_generates_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(temp_dir.path(), vec![]);
        let meta = backend.save(&original(160, 90, ImageType::Png)).await.unwrap();
        let request = DerivativeRequest::crop(meta.clone(), Dimensions::Square(30));

        let url = backend.link(&request).await.unwrap();
        let hash = &meta.hash;
        assert_eq!(url, format!("https://img.example.com/cache/{}/{}/{hash}300true.png", &hash[..2], &hash[2..4]));

        let cached = temp_dir.path().join("cache").join(derivative_path(&request).unwrap());
        let first = std::fs::read(&cached).unwrap();
        let decoded = imgstore_image::decode(&first).unwrap();
        assert_eq!((decoded.image.width(), decoded.image.height()), (30, 30));

        // Second call is a cache hit and leaves the file alone.
        assert_eq!(backend.link(&request).await.unwrap(), url);
        assert_eq!(std::fs::read(&cached).unwrap(), first);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_links_are_identical() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(temp_dir.path(), vec![]);
        let meta = backend.save(&original(300, 200, ImageType::Jpeg)).await.unwrap();
        let request = DerivativeRequest::resize(meta, Dimensions::Rect { width: 64, height: 64 }, Flags::Original);

        let (a, b) = tokio::join!(backend.link(&request), backend.link(&request));
        assert_eq!(a.unwrap(), b.unwrap());

        let cached = temp_dir.path().join("cache").join(derivative_path(&request).unwrap());
        let bytes = std::fs::read(&cached).unwrap();
        assert_eq!(bytes, imgstore_image::render(&backend.original(request.meta()).await.unwrap(), &request).unwrap());
    }

    #[tokio::test]
    async fn test_save_pregenerates_previews() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(temp_dir.path(), vec![Dimensions::Square(16), Dimensions::Rect { width: 32, height: 8 }]);
        let meta = backend.save(&original(64, 64, ImageType::Gif)).await.unwrap();
        for dims in [Dimensions::Square(16), Dimensions::Rect { width: 32, height: 8 }] {
            let path = derivative_path(&DerivativeRequest::preview(meta.clone(), dims)).unwrap();
            assert!(temp_dir.path().join("cache").join(path).is_file());
        }
    }

    #[tokio::test]
    async fn test_failed_preview_does_not_fail_save() {
        let temp_dir = tempfile::tempdir().unwrap();
        // Too large to render; the other preview still gets generated.
        let oversized = Dimensions::Square(20_000);
        let backend = backend(temp_dir.path(), vec![Dimensions::Square(16), oversized]);

        let meta = backend.save(&original(64, 64, ImageType::Png)).await.unwrap();
        assert!(backend.file_exists(&meta).await.unwrap());
        assert_eq!(backend.pregenerate(&meta).await, 1);

        let cache = temp_dir.path().join("cache");
        let small = derivative_path(&DerivativeRequest::preview(meta.clone(), Dimensions::Square(16))).unwrap();
        assert!(cache.join(small).is_file());
        let large = derivative_path(&DerivativeRequest::preview(meta, oversized)).unwrap();
        assert!(!cache.join(large).exists());
    }

    #[tokio::test]
    async fn test_link_missing_original() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(temp_dir.path(), vec![]);
        let meta = original(10, 10, ImageType::Png).probe.stored_by("local");
        let err = backend.link(&DerivativeRequest::crop(meta, Dimensions::Square(5))).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_keeps_derivatives() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(temp_dir.path(), vec![]);
        let meta = backend.save(&original(50, 50, ImageType::Png)).await.unwrap();
        let request = DerivativeRequest::crop(meta.clone(), Dimensions::Square(10));
        backend.link(&request).await.unwrap();

        backend.remove(&meta).await.unwrap();
        assert!(!backend.file_exists(&meta).await.unwrap());
        assert!(temp_dir.path().join("cache").join(derivative_path(&request).unwrap()).is_file());
        let err = backend.remove(&meta).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }
}
