//! Snapshots
//!
//! A snapshot is a full copy of the keyspace persisted as one JSON
//! document mapping key to entry. JSON keeps the file inspectable with
//! ordinary tools, which matters more here than compactness.
//!
//! The snapshot service captures each shard under its shared lock in
//! index order, so the image is per-shard consistent but not globally
//! atomic. That is fine: the WAL is rotated only *after* the snapshot
//! lands, so replay over the snapshot restores anything written while
//! the capture walked the shards.
//!
//! Persistence goes through `snapshot.db.tmp` followed by an atomic
//! rename. A crash mid-write leaves the previous snapshot intact; a
//! snapshot that fails to decode at startup is treated as empty and the
//! WAL replays over a blank slate.

use crate::persistence::wal::WalWriter;
use crate::storage::{Entry, Store};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Snapshot persistence failures.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Owns the snapshot file and knows how to load and replace it.
pub struct Snapshotter {
    path: PathBuf,
    /// Serializes concurrent persist calls on the snapshot file
    guard: Mutex<()>,
}

impl Snapshotter {
    /// Creates the snapshotter, touching the snapshot file if absent.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            guard: Mutex::new(()),
        })
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted keyspace image.
    ///
    /// Every failure mode (missing file, empty file, torn or corrupt
    /// JSON) degrades to an empty image with a warning, never an
    /// aborted startup. The WAL replay that follows still recovers
    /// whatever it can.
    pub fn load(&self) -> HashMap<String, Entry> {
        let _guard = self.guard.lock().unwrap();

        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                warn!(file = %self.path.display(), error = %e, "failed to read snapshot; starting empty");
                return HashMap::new();
            }
        };
        if data.is_empty() {
            return HashMap::new();
        }

        match serde_json::from_slice(&data) {
            Ok(image) => image,
            Err(e) => {
                warn!(file = %self.path.display(), error = %e, "corrupt snapshot; starting empty");
                HashMap::new()
            }
        }
    }

    /// Replaces the snapshot with the given image.
    ///
    /// The image is written to a sibling `.tmp` file, fsynced, and
    /// renamed over the snapshot path so no crash window leaves a
    /// half-written snapshot behind.
    pub fn persist(&self, image: &HashMap<String, Entry>) -> Result<(), SnapshotError> {
        let _guard = self.guard.lock().unwrap();

        let tmp_path = self.tmp_path();
        let encoded = serde_json::to_vec(image)?;

        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&encoded)?;
        tmp.sync_all()?;
        drop(tmp);

        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

/// Captures the store, persists it, and rotates the WAL on success.
///
/// Failures are logged and left to the next tick; the store keeps
/// serving either way.
pub fn snapshot_now(store: &Store, snapshotter: &Snapshotter, wal: &WalWriter) {
    let image = store.snapshot_image();
    match snapshotter.persist(&image) {
        Ok(()) => {
            debug!(keys = image.len(), "snapshot persisted");
            // Fresh WAL cycle: the active log now only holds records
            // newer than the snapshot
            if let Err(e) = wal.rotate() {
                warn!(error = %e, "post-snapshot WAL rotation failed");
            }
        }
        Err(e) => {
            warn!(error = %e, "snapshot failed; retrying on next tick");
        }
    }
}

/// Handle to the periodic snapshot task.
#[derive(Debug)]
pub struct SnapshotService {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SnapshotService {
    /// Spawns the snapshot loop with the given tick interval.
    pub fn start(
        store: Arc<Store>,
        snapshotter: Arc<Snapshotter>,
        wal: Arc<WalWriter>,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            return;
                        }
                    }
                }
                snapshot_now(&store, &snapshotter, &wal);
            }
        });

        info!(interval_secs = interval.as_secs(), "snapshot service started");

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Signals the snapshot loop to stop after its current tick.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stops the loop and waits for the task to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SnapshotService {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::wal::{read_records, WalRecord};
    use crate::storage::unix_now;
    use bytes::Bytes;
    use tempfile::TempDir;

    #[test]
    fn persist_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let snapshotter = Snapshotter::new(dir.path().join("snapshot.db")).unwrap();

        let mut image = HashMap::new();
        image.insert("a".to_string(), Entry::new(Bytes::from("1"), 0));
        image.insert(
            "b".to_string(),
            Entry::new(Bytes::from("2"), 1_900_000_000),
        );

        snapshotter.persist(&image).unwrap();
        let loaded = snapshotter.load();
        assert_eq!(loaded, image);
    }

    #[test]
    fn missing_and_empty_snapshots_load_as_empty() {
        let dir = TempDir::new().unwrap();

        let snapshotter = Snapshotter {
            path: dir.path().join("never-created.db"),
            guard: Mutex::new(()),
        };
        assert!(snapshotter.load().is_empty());

        // `new` touches the file; an empty file is also an empty image
        let snapshotter = Snapshotter::new(dir.path().join("snapshot.db")).unwrap();
        assert!(snapshotter.load().is_empty());
    }

    #[test]
    fn corrupt_snapshot_loads_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.db");
        std::fs::write(&path, b"{\"a\": {\"value\": [1, 2").unwrap();

        let snapshotter = Snapshotter::new(&path).unwrap();
        assert!(snapshotter.load().is_empty());
    }

    #[test]
    fn persist_replaces_atomically_and_cleans_tmp() {
        let dir = TempDir::new().unwrap();
        let snapshotter = Snapshotter::new(dir.path().join("snapshot.db")).unwrap();

        let mut first = HashMap::new();
        first.insert("old".to_string(), Entry::new(Bytes::from("x"), 0));
        snapshotter.persist(&first).unwrap();

        let mut second = HashMap::new();
        second.insert("new".to_string(), Entry::new(Bytes::from("y"), 0));
        snapshotter.persist(&second).unwrap();

        assert!(!snapshotter.tmp_path().exists());
        let loaded = snapshotter.load();
        assert!(loaded.contains_key("new"));
        assert!(!loaded.contains_key("old"));
    }

    #[test]
    fn snapshot_now_persists_and_rotates_wal() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(4);
        let snapshotter = Snapshotter::new(dir.path().join("snapshot.db")).unwrap();
        let wal = WalWriter::open(
            dir.path().join("wal.log"),
            dir.path().to_path_buf(),
            u64::MAX,
            5,
        )
        .unwrap();

        store.set("k".into(), Bytes::from("v"), unix_now() + 60);
        wal.append(WalRecord::set("k".into(), Bytes::from("v"), unix_now() + 60))
            .unwrap();

        snapshot_now(&store, &snapshotter, &wal);

        let image = snapshotter.load();
        assert_eq!(image.len(), 1);
        assert!(image.contains_key("k"));

        // The active log was rotated away after the snapshot
        assert_eq!(wal.active_size(), 0);
        assert!(read_records(wal.path()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_service_ticks_and_stops() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::new(2));
        let snapshotter = Arc::new(Snapshotter::new(dir.path().join("snapshot.db")).unwrap());
        let wal = Arc::new(
            WalWriter::open(
                dir.path().join("wal.log"),
                dir.path().to_path_buf(),
                u64::MAX,
                5,
            )
            .unwrap(),
        );

        store.set("tick".into(), Bytes::from("v"), 0);

        let service = SnapshotService::start(
            Arc::clone(&store),
            Arc::clone(&snapshotter),
            Arc::clone(&wal),
            Duration::from_millis(20),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        service.shutdown().await;

        let image = snapshotter.load();
        assert!(image.contains_key("tick"));
    }
}
