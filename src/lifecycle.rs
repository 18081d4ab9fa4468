//! Background Task Lifecycle
//!
//! One place that starts the three periodic jobs (per-shard expiry
//! sweepers, the snapshot service, and the WAL flusher) and tears
//! them down in order on shutdown. In-flight commands are unaffected;
//! each task stops at its next tick, and the WAL gets a final
//! best-effort flush once everything is quiet.

use crate::config::StoreConfig;
use crate::persistence::{SnapshotService, Snapshotter, WalWriter};
use crate::storage::{Store, SweeperSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Owns every background task handle for the life of the process.
pub struct Lifecycle {
    sweepers: SweeperSet,
    snapshots: SnapshotService,
    flusher: WalFlusher,
    wal: Arc<WalWriter>,
}

impl Lifecycle {
    /// Starts the sweepers, the snapshot service, and the WAL flusher.
    pub fn start(
        store: Arc<Store>,
        wal: Arc<WalWriter>,
        snapshotter: Arc<Snapshotter>,
        config: &StoreConfig,
    ) -> Self {
        let sweepers = SweeperSet::start(Arc::clone(&store), config.cleanup_interval());
        let snapshots = SnapshotService::start(
            store,
            snapshotter,
            Arc::clone(&wal),
            config.snapshot_interval(),
        );
        let flusher = WalFlusher::start(Arc::clone(&wal), config.wal_flush_interval());

        Self {
            sweepers,
            snapshots,
            flusher,
            wal,
        }
    }

    /// Stops every background task, waits for them, and flushes the WAL
    /// one last time.
    pub async fn shutdown(self) {
        info!("stopping background tasks");
        self.sweepers.shutdown().await;
        self.snapshots.shutdown().await;
        self.flusher.shutdown().await;

        if let Err(e) = self.wal.flush() {
            warn!(error = %e, "final WAL flush failed");
        }
        info!("shutdown complete");
    }
}

/// Periodic WAL flush/fsync task.
///
/// Appends are buffered in user space; this task bounds how much of the
/// log a crash can lose to one flush interval.
struct WalFlusher {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl WalFlusher {
    fn start(wal: Arc<WalWriter>, interval: Duration) -> Self {
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
                if let Err(e) = wal.flush() {
                    warn!(error = %e, "periodic WAL flush failed");
                }
            }
        });

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}
