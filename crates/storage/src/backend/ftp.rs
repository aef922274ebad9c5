//! FTP storage backend.
//!
//! Mirrors the sharded layout of the filesystem backend on a remote FTP
//! server. Originals and derivatives share one tree under `base_path`.
//!
//! # Sessions
//!
//! Writes and reads go through two control sessions (which may use the same
//! login). Each session connects and authenticates on first use and is then
//! held for the backend's lifetime, closed with `QUIT` on drop. A session
//! carries one command at a time, so concurrent calls on the same backend
//! serialize on it. A session that hits a network error is dropped and
//! reconnects on the next call.
//!
//! The FTP client is blocking; every session command runs on Tokio's
//! blocking pool.

use crate::backend::{RecentOriginal, render};
use crate::error::{ErrorKind, Result};
use crate::known::KnownCache;
use crate::layout::{derivative_path, join_url, key, original_path};
use crate::settings::{ExistenceProbe, FtpEndpoint, FtpSettings};
use crate::StorageBackend;
use async_trait::async_trait;
use exn::ResultExt;
use imgstore_image::{DerivativeRequest, Dimensions, Meta, Original, Probe};
use reqwest::StatusCode;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode, Status};
use tracing::instrument;

/// Distinguishes staged uploads from concurrent writers in this process.
static STAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn network(err: FtpError) -> ErrorKind {
    ErrorKind::Network(err.to_string())
}

/// `550 Requested action not taken`: the usual answer for a missing file,
/// and for `MKD` of a directory that already exists.
fn is_unavailable(err: &FtpError) -> bool {
    matches!(err, FtpError::UnexpectedResponse(response) if response.status == Status::FileUnavailable)
}

/// One lazily opened, memoized FTP control session.
struct Session {
    role: &'static str,
    endpoint: FtpEndpoint,
    stream: Mutex<Option<FtpStream>>,
}

impl Session {
    fn new(role: &'static str, endpoint: FtpEndpoint) -> Self {
        Self { role, endpoint, stream: Mutex::new(None) }
    }

    fn connect(&self) -> Result<FtpStream> {
        let FtpEndpoint { host, port, login, password } = &self.endpoint;
        let mut stream = FtpStream::connect((host.as_str(), *port)).map_err(network)?;
        if let Err(err) = stream.login(login, password) {
            let _ = stream.quit();
            exn::bail!(ErrorKind::Auth(format!("unable to log in to {host} as {login} with {} access: {err}", self.role)));
        }
        stream.set_mode(Mode::Passive);
        stream.transfer_type(FileType::Binary).map_err(network)?;
        tracing::debug!(host = %host, port, role = self.role, "Opened FTP session");
        Ok(stream)
    }

    /// Run `op` on the session, connecting first if needed.
    fn with<T>(&self, op: impl FnOnce(&mut FtpStream) -> Result<T>) -> Result<T> {
        let mut guard =
            self.stream.lock().map_err(|_| ErrorKind::BackendError(format!("{} session poisoned", self.role)))?;
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        let Some(stream) = guard.as_mut() else {
            exn::bail!(ErrorKind::BackendError(format!("{} session unavailable", self.role)));
        };
        let result = op(stream);
        if let Err(err) = &result
            && matches!(&**err, ErrorKind::Network(_))
            && let Some(mut broken) = guard.take()
        {
            let _ = broken.quit();
        }
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.stream.lock()
            && let Some(mut stream) = guard.take()
        {
            let _ = stream.quit();
        }
    }
}

/// Run a session command on the blocking pool.
async fn run<T, F>(session: &Arc<Session>, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut FtpStream) -> Result<T> + Send + 'static,
{
    let session = Arc::clone(session);
    tokio::task::spawn_blocking(move || session.with(op))
        .await
        .or_raise(|| ErrorKind::BackendError("FTP task panicked".to_string()))?
}

/// Create every missing directory along `dirs`, ignoring only directories
/// that already exist.
fn make_dirs(ftp: &mut FtpStream, dirs: &[String]) -> Result<()> {
    for dir in dirs {
        match ftp.mkdir(dir) {
            Ok(()) => {},
            // Servers word "already exists" differently; confirm it by
            // entering the directory instead of trusting the message.
            Err(err) if is_unavailable(&err) && ftp.cwd(dir).is_ok() => {},
            Err(err) => return Err(network(err).into()),
        }
    }
    Ok(())
}

/// Known-cache key of a remote directory. File keys are relative, so the
/// leading slash keeps the two apart.
fn dir_key(dir: &str) -> String {
    format!("{dir}/")
}

/// FTP storage backend.
///
/// # Examples
///
/// ```no_run
/// use imgstore_storage::backend::FtpBackend;
/// use imgstore_storage::settings::FtpSettings;
///
/// # fn example(settings: FtpSettings) -> Result<(), Box<dyn std::error::Error>> {
/// // Nothing connects until the first storage operation.
/// let backend = FtpBackend::new("remote", settings)?;
/// # Ok(())
/// # }
/// ```
pub struct FtpBackend {
    name: String,
    base_path: String,
    public_url: Option<String>,
    existence: ExistenceProbe,
    previews: Vec<Dimensions>,
    write: Arc<Session>,
    read: Arc<Session>,
    http: Option<reqwest::Client>,
    known: KnownCache,
    recent: RecentOriginal,
}

impl FtpBackend {
    pub fn new(name: impl Into<String>, settings: FtpSettings) -> Result<Self> {
        let name = name.into();
        let http = match settings.existence {
            ExistenceProbe::Http => {
                if settings.public_url.is_none() {
                    exn::bail!(ErrorKind::BackendError(format!(
                        "FTP backend `{name}` probes existence over HTTP but has no public_url"
                    )));
                }
                let client = reqwest::Client::builder()
                    .build()
                    .or_raise(|| ErrorKind::BackendError("unable to build HTTP client".to_string()))?;
                Some(client)
            },
            ExistenceProbe::Size => None,
        };
        let read = settings.read_endpoint().clone();
        Ok(Self {
            name,
            base_path: format!("/{}", settings.base_path.trim_matches('/')),
            public_url: settings.public_url,
            existence: settings.existence,
            previews: settings.previews,
            write: Arc::new(Session::new("write", settings.write)),
            read: Arc::new(Session::new("read", read)),
            http,
            known: KnownCache::in_memory(),
            recent: RecentOriginal::default(),
        })
    }

    /// Absolute remote path of a relative store path.
    fn remote_path(&self, relative: &Path) -> String {
        join_url(&self.base_path, &key(relative))
    }

    /// Every directory from the base path down to the file's shard.
    fn remote_dirs(&self, relative: &Path) -> Vec<String> {
        let mut dirs = Vec::new();
        let mut current = String::new();
        let base = self.base_path.trim_matches('/');
        let parent = relative.parent().map(key).unwrap_or_default();
        for part in base.split('/').chain(parent.split('/')).filter(|part| !part.is_empty()) {
            current = format!("{current}/{part}");
            dirs.push(current.clone());
        }
        dirs
    }

    /// Public URL when configured, otherwise an `ftp://` URL on the read
    /// login. Passwords are never embedded.
    fn locator(&self, relative: &Path) -> String {
        match &self.public_url {
            Some(base) => join_url(base, &key(relative)),
            None => {
                let FtpEndpoint { host, port, login, .. } = &self.read.endpoint;
                format!("ftp://{login}@{host}:{port}{}", self.remote_path(relative))
            },
        }
    }

    async fn exists(&self, relative: &Path) -> Result<bool> {
        let key = key(relative);
        if self.known.contains(&key).await {
            return Ok(true);
        }
        let exists = match (&self.http, &self.public_url) {
            (Some(client), Some(base)) if self.existence == ExistenceProbe::Http => {
                let url = join_url(base, &key);
                let response =
                    client.head(url.as_str()).send().await.or_raise(|| ErrorKind::Network(format!("HEAD {url} failed")))?;
                match response.status() {
                    status if status.is_success() => true,
                    StatusCode::NOT_FOUND | StatusCode::GONE => false,
                    status => exn::bail!(ErrorKind::Network(format!("HEAD {url} answered {status}"))),
                }
            },
            _ => {
                let path = self.remote_path(relative);
                run(&self.read, move |ftp| match ftp.size(&path) {
                    Ok(size) => Ok(size > 0),
                    Err(err) if is_unavailable(&err) => Ok(false),
                    Err(err) => Err(network(err).into()),
                })
                .await?
            },
        };
        if exists {
            self.known.remember(&key).await?;
        }
        Ok(exists)
    }

    /// Upload under a staged name, then rename into place so the target never
    /// holds a partial file.
    ///
    /// Directories created (or found) by earlier uploads are remembered and
    /// not created again; a failed upload forgets them.
    async fn put(&self, relative: &Path, bytes: Vec<u8>) -> Result<()> {
        let dirs = self.remote_dirs(relative);
        let mut missing = Vec::new();
        for dir in &dirs {
            if !self.known.contains(&dir_key(dir)).await {
                missing.push(dir.clone());
            }
        }
        let created = missing.clone();
        let target = self.remote_path(relative);
        let file_name = relative.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let staged = join_url(
            dirs.last().map(String::as_str).unwrap_or("/"),
            &format!(".{file_name}.{}-{}.part", std::process::id(), STAGE_COUNTER.fetch_add(1, Ordering::Relaxed)),
        );
        let upload_error = relative.to_path_buf();
        let uploaded = run(&self.write, move |ftp| {
            make_dirs(ftp, &missing)?;
            ftp.put_file(&staged, &mut Cursor::new(bytes)).or_raise(|| ErrorKind::Upload(upload_error.clone()))?;
            if let Err(err) = ftp.rename(&staged, &target) {
                // Some servers refuse to rename over an existing file; a
                // concurrent writer already put identical bytes there.
                let _ = ftp.rm(&staged);
                if !ftp.size(&target).is_ok_and(|size| size > 0) {
                    return Err(network(err)).or_raise(|| ErrorKind::Upload(upload_error));
                }
            }
            Ok(())
        })
        .await;
        if uploaded.is_err() {
            for dir in &dirs {
                self.known.forget(&dir_key(dir)).await;
            }
            return uploaded;
        }
        for dir in &created {
            self.known.remember(&dir_key(dir)).await?;
        }
        self.known.remember(&key(relative)).await
    }

    async fn fetch(&self, relative: &Path) -> Result<Vec<u8>> {
        let path = self.remote_path(relative);
        let missing = relative.to_path_buf();
        run(&self.read, move |ftp| match ftp.retr_as_buffer(&path) {
            Ok(buffer) => Ok(buffer.into_inner()),
            Err(err) if is_unavailable(&err) => exn::bail!(ErrorKind::NotFound(missing)),
            Err(err) => Err(network(err).into()),
        })
        .await
    }
}

#[async_trait]
impl StorageBackend for FtpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn previews(&self) -> &[Dimensions] {
        &self.previews
    }

    #[instrument(skip(self, original), fields(backend = %self.name, hash = %original.probe.hash))]
    async fn save(&self, original: &Original) -> Result<Meta> {
        let relative = original_path(&original.probe)?;
        if !self.exists(&relative).await? {
            self.put(&relative, original.bytes.clone()).await?;
            tracing::info!(path = %self.remote_path(&relative), "Stored original");
        }
        self.recent.keep(&original.probe.hash, original.bytes.as_slice().into());
        let meta = original.probe.clone().stored_by(&self.name);
        self.pregenerate(&meta).await;
        Ok(meta)
    }

    async fn file_exists(&self, probe: &Probe) -> Result<bool> {
        self.exists(&original_path(probe)?).await
    }

    #[instrument(skip(self, request), fields(backend = %self.name, key = %request.cache_key()))]
    async fn link(&self, request: &DerivativeRequest) -> Result<String> {
        let relative = derivative_path(request)?;
        if self.exists(&relative).await? {
            tracing::debug!("Derivative cache hit");
        } else {
            let meta = request.meta();
            let source = match self.recent.get(&meta.hash) {
                Some(bytes) => bytes,
                None => self.original(meta).await?.into(),
            };
            self.put(&relative, render(source, request).await?).await?;
            tracing::info!(path = %self.remote_path(&relative), "Generated derivative");
        }
        Ok(self.locator(&relative))
    }

    async fn original(&self, meta: &Meta) -> Result<Vec<u8>> {
        if let Some(bytes) = self.recent.get(&meta.hash) {
            return Ok(bytes.to_vec());
        }
        self.fetch(&original_path(meta)?).await
    }

    async fn remove(&self, meta: &Meta) -> Result<()> {
        let relative = original_path(meta)?;
        let path = self.remote_path(&relative);
        let missing = relative.clone();
        run(&self.write, move |ftp| match ftp.rm(&path) {
            Ok(()) => Ok(()),
            Err(err) if is_unavailable(&err) => exn::bail!(ErrorKind::NotFound(missing)),
            Err(err) => Err(network(err).into()),
        })
        .await?;
        self.known.forget(&key(&relative)).await;
        self.recent.clear(&meta.hash);
        tracing::info!(backend = %self.name, path = %self.remote_path(&relative), "Removed original");
        Ok(())
    }
}
