//! DataDirLock - data dir の排他ロック
//!
//! `<data_dir>/shuttle.lock` に advisory lock (flock / LockFileEx) を取る。
//! snapshot の writer は常に 1 プロセスだけ。lock は handle の drop で外れ、
//! ファイル自体は残す（次のプロセスが同じ inode を lock する）。

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

pub const LOCK_FILE: &str = "shuttle.lock";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("data dir {} is in use by another shuttle process", .0.display())]
    Held(PathBuf),

    #[error("cannot lock {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held for the lifetime of an [`App`](super::App).
#[derive(Debug)]
pub struct DataDirLock {
    path: PathBuf,
    _file: File,
}

impl DataDirLock {
    /// Non-blocking: fails with [`LockError::Held`] when another process owns the dir.
    pub fn acquire(data_dir: &Path) -> Result<Self, LockError> {
        let path = data_dir.join(LOCK_FILE);
        let io_err = |source| LockError::Io {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(data_dir).map_err(io_err)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(io_err)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(LockError::Held(data_dir.to_path_buf()));
            }
            return Err(io_err(e));
        }
        tracing::debug!(path = %path.display(), "data dir locked");
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_holder_is_refused_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");

        let first = DataDirLock::acquire(&data).unwrap();
        assert!(first.path().ends_with(LOCK_FILE));
        let err = DataDirLock::acquire(&data).unwrap_err();
        assert!(matches!(err, LockError::Held(ref p) if p == &data));

        drop(first);
        assert!(DataDirLock::acquire(&data).is_ok());
    }
}
