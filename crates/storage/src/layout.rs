//! Where originals and derivatives live inside a store.
//!
//! Every filesystem-like store (local disk, FTP, the orchestrator's own
//! cache) uses the same sharded tree, split on the first four hex characters
//! of the content hash:
//!
//! ```text
//! ab/cd/abcd1234….png                     original
//! ab/cd/abcd1234…300x2002true.png         derivative (dimensions, flags, crop)
//! _not_available/_not_available.png       special image, not sharded
//! ```
//!
//! Object storage uses the same file names without the shard directories.

use crate::error::{ErrorKind, Result};
use imgstore_image::{DerivativeRequest, Probe};
use std::path::{Component, Path, PathBuf};

/// Length of each of the two shard directory names.
const SHARD_WIDTH: usize = 2;

/// Validates a storage path for security and correctness.
/// Ensures that paths don't escape the storage root (no `..` traversal).
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use imgstore_storage::layout::validate;
/// assert!(validate("ab/cd/abcd.png").is_ok());
/// assert!(validate("../etc/passwd").is_err());
/// assert!(validate("a\0b").is_err());
/// assert_eq!(validate("ab//./cd/x.png/").unwrap(), Path::new("ab/cd/x.png"));
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Shard directory for a hash: `ab/cd` for regular hashes, the hash itself
/// for special (`_`-prefixed) ones.
///
/// Hashes are used verbatim in file names, so anything other than lowercase
/// hex (or `_`-prefixed ASCII word characters for special images) is
/// rejected.
pub fn shard(probe: &Probe) -> Result<PathBuf> {
    let hash = probe.hash.as_str();
    let invalid = || exn::Exn::from(ErrorKind::InvalidPath(PathBuf::from(hash)));
    if probe.is_special() {
        if hash.len() < 2 || !hash.bytes().all(|b| b == b'_' || b.is_ascii_alphanumeric()) {
            return Err(invalid());
        }
        return Ok(PathBuf::from(hash));
    }
    if hash.len() < SHARD_WIDTH * 2 || !hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(invalid());
    }
    Ok(Path::new(&hash[..SHARD_WIDTH]).join(&hash[SHARD_WIDTH..SHARD_WIDTH * 2]))
}

/// File name of an original: `<hash>.<ext>`.
pub fn original_name(probe: &Probe) -> String {
    format!("{}.{}", probe.hash, probe.kind.extension())
}

/// Sharded relative path of an original.
///
/// ```
/// use imgstore_image::{ImageType, Probe};
/// use imgstore_storage::layout::original_path;
/// let probe = Probe::new("abcd1234", 10, 10, ImageType::Jpeg);
/// assert_eq!(original_path(&probe).unwrap().to_str(), Some("ab/cd/abcd1234.jpg"));
/// ```
pub fn original_path(probe: &Probe) -> Result<PathBuf> {
    Ok(shard(probe)?.join(original_name(probe)))
}

/// Sharded relative path of a derivative.
pub fn derivative_path(request: &DerivativeRequest) -> Result<PathBuf> {
    Ok(shard(request.meta())?.join(request.file_name()))
}

/// Unsharded name of an original, for flat key spaces such as object storage.
pub fn flat_original(probe: &Probe) -> Result<String> {
    shard(probe)?;
    Ok(original_name(probe))
}

/// Unsharded name of a derivative.
pub fn flat_derivative(request: &DerivativeRequest) -> Result<String> {
    shard(request.meta())?;
    Ok(request.file_name())
}

/// Join a relative path into a `/`-separated key, as remote stores expect.
pub fn key(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a base URL and a relative key with exactly one `/` between them.
pub fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}
