//! S3-compatible object storage backend.
//!
//! Objects live in a flat key space (`<prefix>/<hash>.<ext>` and
//! `<prefix>/<hash><dimensions><flags><crop>.<ext>`) and are served from a
//! public URL. Works with AWS S3, Backblaze B2, Tigris, MinIO and Google Cloud
//! Storage's S3 interoperability endpoint.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via the configuration file. Each
//! backend specifies its own `key_id` and `key_secret`.
//!
//! # Existence
//!
//! Object listings can lag behind writes, so every key seen to exist (or
//! written by this process) is recorded in an on-disk [`KnownCache`] and never
//! asked about again.

use crate::backend::{RecentOriginal, render};
use crate::error::{ErrorKind, Result};
use crate::known::KnownCache;
use crate::layout::{flat_derivative, flat_original, join_url, key, validate};
use crate::settings::ObjectStorageSettings;
use crate::StorageBackend;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, http::HttpResponse, retry::RetryConfig},
    error::SdkError,
    primitives::ByteStream,
    types::ObjectCannedAcl,
};
use exn::ResultExt;
use imgstore_image::{DerivativeRequest, Dimensions, Meta, Original, Probe};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::instrument;

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;

/// Attach an SDK failure to the error tree, classifying credential
/// rejections as [`Auth`](ErrorKind::Auth).
fn sdk<T, E>(result: std::result::Result<T, SdkError<E, HttpResponse>>, kind: impl FnOnce() -> ErrorKind) -> Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match result {
        Ok(value) => Ok(value),
        Err(err) => {
            let kind = match err.raw_response().map(|response| response.status().as_u16()) {
                Some(status @ (401 | 403)) => ErrorKind::Auth(format!("object storage answered {status}")),
                _ => kind(),
            };
            Err(err).or_raise(|| kind)
        },
    }
}

/// S3-compatible object storage backend.
///
/// # Examples
///
/// ```no_run
/// use imgstore_storage::backend::ObjectStorageBackend;
/// use imgstore_storage::settings::ObjectStorageSettings;
///
/// # fn example(settings: ObjectStorageSettings) -> Result<(), Box<dyn std::error::Error>> {
/// let backend = ObjectStorageBackend::new("bucket", settings)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ObjectStorageBackend {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    public_url: String,
    public_read: bool,
    previews: Vec<Dimensions>,
    known: KnownCache,
    recent: RecentOriginal,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl ObjectStorageBackend {
    /// Create a new object storage backend from its settings.
    pub fn new(name: impl Into<String>, settings: ObjectStorageSettings) -> Result<Self> {
        let region = Region::new(settings.region.clone());
        let credentials =
            Credentials::new(settings.key_id.clone(), settings.key_secret.clone(), None, None, "imgstore-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(region)
            // Configure retry policy with exponential backoff (1 initial + 3 retries)
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Use path-style addressing for better compatibility with
            // S3-compatible services (Backblaze, MinIO, etc.)
            .force_path_style(true);
        if let Some(endpoint_url) = &settings.endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Self::with_client(name, Client::from_conf(config_builder.build()), settings)
    }

    /// Create the backend around an existing client.
    pub fn with_client(name: impl Into<String>, client: Client, settings: ObjectStorageSettings) -> Result<Self> {
        let prefix = match &settings.prefix {
            Some(prefix) => Some(key(&validate(prefix)?)),
            None => None,
        };
        let public_url = match (&settings.public_url, &settings.endpoint) {
            (Some(url), _) => url.clone(),
            (None, Some(endpoint)) => join_url(endpoint, &settings.bucket),
            (None, None) => format!("https://{}.s3.{}.amazonaws.com", settings.bucket, settings.region),
        };
        Ok(Self {
            name: name.into(),
            client,
            bucket: settings.bucket,
            prefix,
            public_url,
            public_read: settings.public_read,
            previews: settings.previews,
            known: KnownCache::persistent(settings.known_cache_dir),
            recent: RecentOriginal::default(),
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        })
    }

    /// Construct the full object key from a flat file name.
    fn full_key(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{name}"),
            None => name.to_string(),
        }
    }

    fn url(&self, key: &str) -> String {
        join_url(&self.public_url, key)
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.rate_limiter)
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::BackendError("S3 rate limiter closed".to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if self.known.contains(key).await {
            return Ok(true);
        }
        let _permit = self.acquire_permit().await?;
        let listing = self.client.list_objects_v2().bucket(&self.bucket).prefix(key).max_keys(1).send().await;
        let listing = sdk(listing, || ErrorKind::Network(format!("listing `{key}` failed")))?;
        let exists = listing.contents().iter().any(|object| object.key() == Some(key));
        if exists {
            self.remember(key).await;
        }
        Ok(exists)
    }

    async fn remember(&self, key: &str) {
        if let Err(err) = self.known.remember(key).await {
            tracing::warn!(backend = %self.name, key, error = ?err, "Failed to persist existence marker");
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let _permit = self.acquire_permit().await?;
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes));
        if self.public_read {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }
        sdk(request.send().await, || ErrorKind::Upload(PathBuf::from(key)))?;
        self.remember(key).await;
        Ok(())
    }

    fn original_key(&self, probe: &Probe) -> Result<String> {
        Ok(self.full_key(&flat_original(probe)?))
    }
}

#[async_trait]
impl StorageBackend for ObjectStorageBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn previews(&self) -> &[Dimensions] {
        &self.previews
    }

    #[instrument(skip(self, original), fields(backend = %self.name, hash = %original.probe.hash))]
    async fn save(&self, original: &Original) -> Result<Meta> {
        let key = self.original_key(&original.probe)?;
        if !self.exists(&key).await? {
            self.put(&key, original.bytes.clone(), original.probe.kind.mime_type()).await?;
            tracing::info!(bucket = %self.bucket, key = %key, "Stored original");
        }
        self.recent.keep(&original.probe.hash, original.bytes.as_slice().into());
        let meta = original.probe.clone().stored_by(&self.name);
        self.pregenerate(&meta).await;
        Ok(meta)
    }

    async fn file_exists(&self, probe: &Probe) -> Result<bool> {
        self.exists(&self.original_key(probe)?).await
    }

    #[instrument(skip(self, request), fields(backend = %self.name, key = %request.cache_key()))]
    async fn link(&self, request: &DerivativeRequest) -> Result<String> {
        let key = self.full_key(&flat_derivative(request)?);
        if self.exists(&key).await? {
            tracing::debug!("Derivative cache hit");
        } else {
            let meta = request.meta();
            let source = match self.recent.get(&meta.hash) {
                Some(bytes) => bytes,
                None => self.original(meta).await?.into(),
            };
            self.put(&key, render(source, request).await?, meta.kind.mime_type()).await?;
            tracing::info!(bucket = %self.bucket, key = %key, "Generated derivative");
        }
        Ok(self.url(&key))
    }

    async fn original(&self, meta: &Meta) -> Result<Vec<u8>> {
        if let Some(bytes) = self.recent.get(&meta.hash) {
            return Ok(bytes.to_vec());
        }
        let key = self.original_key(meta)?;
        let _permit = self.acquire_permit().await?;
        let output = match self.client.get_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                exn::bail!(ErrorKind::NotFound(PathBuf::from(key)))
            },
            Err(err) => return sdk(Err(err), || ErrorKind::Network(format!("fetching `{key}` failed"))),
        };
        let body = output
            .body
            .collect()
            .await
            .or_raise(|| ErrorKind::Network(format!("reading `{key}` failed")))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn remove(&self, meta: &Meta) -> Result<()> {
        let key = self.original_key(meta)?;
        {
            let _permit = self.acquire_permit().await?;
            let result = self.client.delete_object().bucket(&self.bucket).key(&key).send().await;
            sdk(result, || ErrorKind::Network(format!("deleting `{key}` failed")))?;
        }
        self.known.forget(&key).await;
        self.recent.clear(&meta.hash);
        tracing::info!(backend = %self.name, key = %key, "Removed original");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::original;
    use aws_sdk_s3::operation::get_object::{GetObjectError, GetObjectOutput};
    use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output;
    use aws_sdk_s3::operation::put_object::PutObjectOutput;
    use aws_sdk_s3::types::Object;
    use aws_sdk_s3::types::error::NoSuchKey;
    use aws_smithy_mocks::{RuleMode, mock, mock_client};
    use imgstore_image::ImageType;
    use std::path::Path;

    fn settings(known: &Path) -> ObjectStorageSettings {
        ObjectStorageSettings {
            bucket: "images".to_string(),
            region: "eu-central-1".to_string(),
            endpoint: None,
            key_id: "id".to_string(),
            key_secret: "secret".to_string(),
            prefix: Some("originals/".to_string()),
            public_url: None,
            known_cache_dir: known.to_path_buf(),
            public_read: true,
            previews: vec![],
        }
    }

    fn listing(keys: &[&str]) -> ListObjectsV2Output {
        let objects = keys.iter().map(|key| Object::builder().key(*key).build()).collect::<Vec<_>>();
        ListObjectsV2Output::builder().set_contents(Some(objects)).build()
    }

    #[test]
    fn test_public_url_derivation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = ObjectStorageBackend::new("bucket", settings(temp_dir.path())).unwrap();
        assert_eq!(backend.url("originals/x.png"), "https://images.s3.eu-central-1.amazonaws.com/originals/x.png");

        let mut custom = settings(temp_dir.path());
        custom.endpoint = Some("https://s3.example.com/".to_string());
        let backend = ObjectStorageBackend::new("bucket", custom.clone()).unwrap();
        assert_eq!(backend.url("x.png"), "https://s3.example.com/images/x.png");

        custom.public_url = Some("https://cdn.example.com".to_string());
        let backend = ObjectStorageBackend::new("bucket", custom).unwrap();
        assert_eq!(backend.url("x.png"), "https://cdn.example.com/x.png");
    }

    #[test]
    fn test_prefix_is_validated() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut bad = settings(temp_dir.path());
        bad.prefix = Some("../escape".to_string());
        let err = ObjectStorageBackend::new("bucket", bad).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));

        let mut messy = settings(temp_dir.path());
        messy.prefix = Some("/a//b/".to_string());
        let backend = ObjectStorageBackend::new("bucket", messy).unwrap();
        assert_eq!(backend.full_key("x.png"), "a/b/x.png");
    }

    #[tokio::test]
    async fn test_existence_is_cached_after_listing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let probe = Probe::new("abcd1234", 8, 8, ImageType::Png);
        let list = mock!(aws_sdk_s3::Client::list_objects_v2)
            .match_requests(|req| req.prefix() == Some("originals/abcd1234.png"))
            .then_output(|| listing(&["originals/abcd1234.png"]));
        let client = mock_client!(aws_sdk_s3, [&list]);
        let backend = ObjectStorageBackend::with_client("bucket", client, settings(temp_dir.path())).unwrap();

        assert!(backend.file_exists(&probe).await.unwrap());
        assert!(backend.file_exists(&probe).await.unwrap());
        assert_eq!(list.num_calls(), 1);

        // A fresh instance trusts the on-disk marker without listing.
        let unused = mock!(aws_sdk_s3::Client::list_objects_v2).then_output(|| listing(&[]));
        let client = mock_client!(aws_sdk_s3, [&unused]);
        let offline = ObjectStorageBackend::with_client("bucket", client, settings(temp_dir.path())).unwrap();
        assert!(offline.file_exists(&probe).await.unwrap());
        assert_eq!(unused.num_calls(), 0);
    }

    #[tokio::test]
    async fn test_prefix_sibling_is_not_a_match() {
        let temp_dir = tempfile::tempdir().unwrap();
        let list = mock!(aws_sdk_s3::Client::list_objects_v2).then_output(|| listing(&["originals/abcd1234.png.bak"]));
        let client = mock_client!(aws_sdk_s3, [&list]);
        let backend = ObjectStorageBackend::with_client("bucket", client, settings(temp_dir.path())).unwrap();
        assert!(!backend.file_exists(&Probe::new("abcd1234", 8, 8, ImageType::Png)).await.unwrap());
    }

    #[tokio::test]
    async fn test_save_uploads_once_with_public_acl() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original = original(20, 10, ImageType::Jpeg);
        let expected_key = format!("originals/{}.jpg", original.probe.hash);
        let list = mock!(aws_sdk_s3::Client::list_objects_v2).then_output(|| listing(&[]));
        let key = expected_key.clone();
        let put = mock!(aws_sdk_s3::Client::put_object)
            .match_requests(move |req| {
                req.key() == Some(key.as_str())
                    && req.acl() == Some(&ObjectCannedAcl::PublicRead)
                    && req.content_type() == Some("image/jpeg")
            })
            .then_output(|| PutObjectOutput::builder().build());
        let client = mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&list, &put]);
        let backend = ObjectStorageBackend::with_client("bucket", client, settings(temp_dir.path())).unwrap();

        let meta = backend.save(&original).await.unwrap();
        assert_eq!(meta.storage_driver(), "bucket");
        // Known after the put; the second save neither lists nor uploads.
        backend.save(&original).await.unwrap();
        assert_eq!(list.num_calls(), 1);
        assert_eq!(put.num_calls(), 1);
    }

    #[tokio::test]
    async fn test_link_renders_from_downloaded_original() {
        let temp_dir = tempfile::tempdir().unwrap();
        let source = original(40, 40, ImageType::Png);
        let bytes = source.bytes.clone();
        let list = mock!(aws_sdk_s3::Client::list_objects_v2).then_output(|| listing(&[]));
        let get = mock!(aws_sdk_s3::Client::get_object)
            .then_output(move || GetObjectOutput::builder().body(ByteStream::from(bytes.clone())).build());
        let put = mock!(aws_sdk_s3::Client::put_object).then_output(|| PutObjectOutput::builder().build());
        let client = mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&list, &get, &put]);
        let backend = ObjectStorageBackend::with_client("bucket", client, settings(temp_dir.path())).unwrap();

        let meta = source.probe.clone().stored_by("bucket");
        let url = backend.link(&DerivativeRequest::crop(meta.clone(), Dimensions::Square(10))).await.unwrap();
        assert_eq!(
            url,
            format!("https://images.s3.eu-central-1.amazonaws.com/originals/{}100true.png", meta.hash)
        );
        assert_eq!(get.num_calls(), 1);
        assert_eq!(put.num_calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_original_is_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let get = mock!(aws_sdk_s3::Client::get_object)
            .then_error(|| GetObjectError::NoSuchKey(NoSuchKey::builder().build()));
        let client = mock_client!(aws_sdk_s3, [&get]);
        let backend = ObjectStorageBackend::with_client("bucket", client, settings(temp_dir.path())).unwrap();
        let meta = Probe::new("abcd1234", 8, 8, ImageType::Png).stored_by("bucket");
        let err = backend.original(&meta).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }
}
