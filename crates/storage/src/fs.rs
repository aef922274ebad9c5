//! Atomic local file writes.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write `data` to `path` so readers only ever see the old file, no file, or
/// the complete new file.
///
/// Data is staged in a hidden temporary file beside the target and renamed
/// over it. Concurrent writers of the same path each stage their own file;
/// the last rename wins.
pub async fn write_atomic(path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) -> Result<()> {
    let path = path.into();
    let data = data.into();
    tokio::task::spawn_blocking(move || write_atomic_sync(&path, &data))
        .await
        .or_raise(|| ErrorKind::BackendError("atomic write task panicked".to_string()))?
}

pub(crate) fn write_atomic_sync(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| exn::Exn::from(ErrorKind::InvalidPath(path.to_path_buf())))?;
    std::fs::create_dir_all(parent).map_err(|e| ErrorKind::io(e, parent))?;
    let mut staged = tempfile::Builder::new()
        .prefix(".staged-")
        .tempfile_in(parent)
        .map_err(|e| ErrorKind::io(e, parent))?;
    staged.write_all(data).map_err(|e| ErrorKind::io(e, path))?;
    staged.as_file().sync_all().map_err(|e| ErrorKind::io(e, path))?;
    staged.persist(path).map_err(|e| ErrorKind::io(e.error, path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_parents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let target = temp_dir.path().join("ab/cd/abcd.png");
        write_atomic(&target, b"data".to_vec()).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_staging_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let target = temp_dir.path().join("file.png");
        write_atomic(&target, b"first".to_vec()).await.unwrap();
        write_atomic(&target, b"second".to_vec()).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"second");
        let entries: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_never_tear() {
        let temp_dir = tempfile::tempdir().unwrap();
        let target = temp_dir.path().join("race.png");
        let payload = vec![7u8; 256 * 1024];
        let writes = (0..8).map(|_| write_atomic(target.clone(), payload.clone()));
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }
        assert_eq!(std::fs::read(&target).unwrap(), payload);
    }
}
