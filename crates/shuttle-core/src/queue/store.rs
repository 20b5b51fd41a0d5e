//! Queue store: durable snapshot persistence.
//!
//! - `save()` is coalescing: rapid mutations collapse into one write after
//!   the debounce window.
//! - `save_immediately()` / `flush()` write now (terminal transitions,
//!   approval decisions, shutdown).
//! - Writes go to `<file>.tmp` and are renamed over the previous file, so a
//!   crash mid-write never leaves a half-written snapshot behind.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use super::Snapshot;
use crate::domain::ShuttleError;

struct StoreInner {
    /// Latest snapshot not yet on disk.
    pending: Option<Snapshot>,
    flush_scheduled: bool,
    last_written: Option<u64>,
    writes: u64,
}

pub struct QueueStore {
    path: PathBuf,
    debounce: Duration,
    inner: Arc<Mutex<StoreInner>>,
}

impl QueueStore {
    pub fn new(path: impl Into<PathBuf>, debounce: Duration) -> Self {
        Self {
            path: path.into(),
            debounce,
            inner: Arc::new(Mutex::new(StoreInner {
                pending: None,
                flush_scheduled: false,
                last_written: None,
                writes: 0,
            })),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last snapshot on disk, or an empty queue.
    ///
    /// Missing, unreadable and corrupt files all degrade to "start empty";
    /// a corrupt file is moved aside first so it can be inspected later.
    pub fn load(&self) -> Snapshot {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no queue snapshot yet; starting empty");
                return Snapshot::empty();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "queue snapshot unreadable; starting empty");
                return Snapshot::empty();
            }
        };

        match Snapshot::decode(&bytes) {
            Ok(snapshot) => {
                tracing::info!(
                    path = %self.path.display(),
                    tasks = snapshot.tasks.len(),
                    schema_version = snapshot.schema_version,
                    "loaded queue snapshot"
                );
                snapshot
            }
            Err(e) => {
                let aside = self.corrupt_path();
                match fs::rename(&self.path, &aside) {
                    Ok(()) => tracing::warn!(
                        path = %self.path.display(),
                        moved_to = %aside.display(),
                        error = %e,
                        "queue snapshot corrupt; moved aside and starting empty"
                    ),
                    Err(rename_err) => tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        rename_error = %rename_err,
                        "queue snapshot corrupt; starting empty"
                    ),
                }
                Snapshot::empty()
            }
        }
    }

    /// Read-only view of the file on disk for callers that do not own the
    /// data dir. Never moves a corrupt file aside and never recovers tasks.
    pub fn peek(&self) -> Result<Snapshot, ShuttleError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Snapshot::decode(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Snapshot::empty()),
            Err(e) => Err(e.into()),
        }
    }

    /// Debounced save. The newest snapshot wins.
    pub async fn save(&self, snapshot: Snapshot) {
        let mut inner = self.inner.lock().await;
        let newer = inner
            .pending
            .as_ref()
            .is_none_or(|p| snapshot.revision >= p.revision);
        if newer {
            inner.pending = Some(snapshot);
        }
        if inner.flush_scheduled {
            return;
        }
        inner.flush_scheduled = true;
        drop(inner);

        let shared = Arc::clone(&self.inner);
        let path = self.path.clone();
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let mut inner = shared.lock().await;
            inner.flush_scheduled = false;
            if let Some(snapshot) = inner.pending.take()
                && let Err(e) = write_locked(&mut inner, &path, snapshot).await
            {
                tracing::warn!(path = %path.display(), error = %e, "debounced queue save failed");
            }
        });
    }

    /// Write `snapshot` now, superseding any pending debounced save.
    pub async fn save_immediately(&self, snapshot: Snapshot) -> Result<(), ShuttleError> {
        let mut inner = self.inner.lock().await;
        if inner
            .pending
            .as_ref()
            .is_some_and(|p| p.revision <= snapshot.revision)
        {
            inner.pending = None;
        }
        write_locked(&mut inner, &self.path, snapshot).await
    }

    /// Write whatever is pending (used on shutdown).
    pub async fn flush(&self) -> Result<(), ShuttleError> {
        let mut inner = self.inner.lock().await;
        match inner.pending.take() {
            Some(snapshot) => write_locked(&mut inner, &self.path, snapshot).await,
            None => Ok(()),
        }
    }

    #[cfg(test)]
    pub(crate) async fn write_count(&self) -> u64 {
        self.inner.lock().await.writes
    }

    fn corrupt_path(&self) -> PathBuf {
        let mut name: OsString = self.path.as_os_str().to_owned();
        name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S")));
        PathBuf::from(name)
    }
}

/// Caller holds the store lock, so there is exactly one writer at a time.
async fn write_locked(
    inner: &mut StoreInner,
    path: &Path,
    mut snapshot: Snapshot,
) -> Result<(), ShuttleError> {
    if inner.last_written.is_some_and(|last| snapshot.revision < last) {
        tracing::debug!(revision = snapshot.revision, "skipping stale queue snapshot");
        return Ok(());
    }

    snapshot.saved_at = Some(Utc::now());
    let bytes = snapshot.encode()?;
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || atomic_write(&target, &bytes))
        .await
        .map_err(|e| std::io::Error::other(format!("snapshot writer panicked: {e}")))??;

    inner.last_written = Some(snapshot.revision);
    inner.writes += 1;
    tracing::debug!(revision = snapshot.revision, tasks = snapshot.tasks.len(), "queue snapshot written");
    Ok(())
}

fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name: OsString = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)
}
