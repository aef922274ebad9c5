//! Building the orchestrator from configuration.

use crate::error::{ErrorKind, Result};
use crate::placeholder::Placeholder;
use crate::storage::ImageStorage;
use exn::ResultExt;
use imgstore_config::{Config, DriverSettings};
use imgstore_storage::BackendHandle;
#[cfg(feature = "ftp")]
use imgstore_storage::backend::FtpBackend;
use imgstore_storage::backend::FilesystemBackend;
#[cfg(feature = "s3")]
use imgstore_storage::backend::ObjectStorageBackend;
use std::sync::Arc;

impl ImageStorage {
    /// Build every configured driver once and register it under its table
    /// name.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let storage = &config.storage;
        let mut builder = ImageStorage::builder(&storage.cache_dir)
            .primary(&storage.primary)
            .max_size(storage.max_width, storage.max_height);
        if let Some(fallback) = &storage.fallback {
            builder = builder.fallback(fallback);
        }
        if let Some(path) = &storage.placeholder {
            builder = builder.placeholder(Placeholder::from_file(path).await?);
        }
        for (name, settings) in &config.drivers {
            builder = builder.driver(driver(name, settings.clone())?);
        }
        builder.build()
    }
}

fn driver(name: &str, settings: DriverSettings) -> Result<BackendHandle> {
    let kind = settings.kind();
    let invalid = || ErrorKind::Config(format!("driver `{name}` ({kind}) could not be set up"));
    let handle: BackendHandle = match settings {
        DriverSettings::Filesystem(settings) => Arc::new(FilesystemBackend::new(name, settings).or_raise(invalid)?),
        #[cfg(feature = "ftp")]
        DriverSettings::Ftp(settings) => Arc::new(FtpBackend::new(name, settings).or_raise(invalid)?),
        #[cfg(feature = "s3")]
        DriverSettings::ObjectStorage(settings) => {
            Arc::new(ObjectStorageBackend::new(name, settings).or_raise(invalid)?)
        },
        #[allow(unreachable_patterns)]
        _ => exn::bail!(ErrorKind::Config(format!("driver `{name}` needs the `{kind}` backend, which isn't built in"))),
    };
    tracing::debug!(driver = %name, kind, "Built storage driver");
    Ok(handle)
}
