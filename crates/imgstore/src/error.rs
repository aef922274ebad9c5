//! Orchestrator errors.
//!
//! Backend and codec failures are wrapped so the lower layer's frame stays in
//! the error tree while callers match on what they can act upon.

use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Upload isn't a JPEG, PNG or GIF
    #[display("unsupported image type: {_0}")]
    ImageType(#[error(not(source))] String),
    /// Upload or stored original couldn't be decoded or rendered
    #[display("image processing failed")]
    Image,
    /// The upload arrived with a nonzero error code
    #[display("upload failed with code {_0}")]
    UploadCode(#[error(not(source))] i32),
    /// A driver failed to persist data
    #[display("driver `{_0}` failed to store the upload")]
    Upload(#[error(not(source))] String),
    /// A driver's remote server rejected its credentials
    #[display("driver `{_0}` failed to authenticate")]
    BackendAuth(#[error(not(source))] String),
    /// Meta names a driver that isn't registered
    #[display("unknown storage driver: {_0}")]
    UnknownDriver(#[error(not(source))] String),
    /// Two drivers were registered under the same name
    #[display("storage driver registered twice: {_0}")]
    DuplicateDriver(#[error(not(source))] String),
    /// Any other driver failure
    #[display("storage driver `{_0}` failed")]
    Storage(#[error(not(source))] String),
    /// Local derivative cache couldn't be read or written
    #[display("derivative cache I/O failed: {}", _0.display())]
    Cache(#[error(not(source))] PathBuf),
    /// Streaming a derivative to the caller's writer failed
    #[display("failed to write the response")]
    Write,
    /// Drivers couldn't be built from the configuration
    #[display("invalid storage configuration: {_0}")]
    Config(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upload(_) | Self::Storage(_) | Self::Cache(_))
    }
}

/// Wrap a driver failure, keeping authentication and upload failures
/// distinguishable.
pub(crate) fn driver<T>(name: &str, result: imgstore_storage::error::Result<T>) -> Result<T> {
    use exn::ResultExt;
    use imgstore_storage::error::ErrorKind as StorageKind;
    match result {
        Ok(value) => Ok(value),
        Err(err) => {
            let kind = match &*err {
                StorageKind::Auth(_) => ErrorKind::BackendAuth(name.to_string()),
                StorageKind::Upload(_) => ErrorKind::Upload(name.to_string()),
                _ => ErrorKind::Storage(name.to_string()),
            };
            Err(err).or_raise(|| kind)
        },
    }
}

/// Wrap a failure to store an original.
///
/// Whatever stopped the driver from persisting it, short of rejected
/// credentials, is an upload failure.
pub(crate) fn saving<T>(name: &str, result: imgstore_storage::error::Result<T>) -> Result<T> {
    use exn::ResultExt;
    use imgstore_storage::error::ErrorKind as StorageKind;
    match result {
        Ok(value) => Ok(value),
        Err(err) => {
            let kind = match &*err {
                StorageKind::Auth(_) => ErrorKind::BackendAuth(name.to_string()),
                _ => ErrorKind::Upload(name.to_string()),
            };
            Err(err).or_raise(|| kind)
        },
    }
}

/// Wrap a codec failure, keeping unsupported types distinguishable.
pub(crate) fn image<T>(result: imgstore_image::error::Result<T>) -> Result<T> {
    use exn::ResultExt;
    use imgstore_image::error::ErrorKind as ImageKind;
    match result {
        Ok(value) => Ok(value),
        Err(err) => {
            let kind = match &*err {
                ImageKind::ImageType(kind) => ErrorKind::ImageType(kind.clone()),
                _ => ErrorKind::Image,
            };
            Err(err).or_raise(|| kind)
        },
    }
}
