//! Per-Shard Expiry Sweepers
//!
//! Lazy expiry on the read path keeps expired keys invisible, but a key
//! that is never read again would sit in memory forever. Each shard
//! therefore gets its own background task that periodically takes the
//! shard's exclusive lock and deletes every entry whose deadline has
//! passed.
//!
//! The sweep is deliberately coarse: TTL precision is "at most one sweep
//! interval after the deadline, and always before the next read". The
//! read path provides the correctness; the sweepers provide the memory
//! reclamation.

use crate::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Handle to the set of running per-shard sweeper tasks.
///
/// Dropping the handle signals every sweeper to stop; call
/// [`SweeperSet::shutdown`] to also wait for them to finish.
#[derive(Debug)]
pub struct SweeperSet {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SweeperSet {
    /// Spawns one sweeper task per shard of `store`.
    ///
    /// Every task ticks on the same fixed `interval` (the configured
    /// `cleanup_interval_seconds`) but sweeps only its own shard, so a
    /// sweep never holds more than one shard lock.
    pub fn start(store: Arc<Store>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = (0..store.shard_count())
            .map(|index| {
                let store = Arc::clone(&store);
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(sweep_loop(store, index, interval, shutdown_rx))
            })
            .collect();

        debug!(
            shards = store.shard_count(),
            interval_ms = interval.as_millis() as u64,
            "expiry sweepers started"
        );

        Self { shutdown_tx, tasks }
    }

    /// Signals every sweeper to stop after its current tick.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stops all sweepers and waits for their tasks to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl Drop for SweeperSet {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweep_loop(
    store: Arc<Store>,
    index: usize,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    trace!(shard = index, "sweeper stopping");
                    return;
                }
            }
        }

        let removed = store.sweep_shard(index);
        if removed > 0 {
            debug!(shard = index, removed, "swept expired keys");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::unix_now;
    use bytes::Bytes;

    #[tokio::test]
    async fn sweepers_reclaim_expired_keys() {
        let store = Arc::new(Store::new(4));
        let now = unix_now();
        for i in 0..20 {
            store.set(format!("dead-{}", i), Bytes::from("v"), now - 1);
        }
        store.set("kept".into(), Bytes::from("v"), 0);
        assert_eq!(store.len(), 21);

        let sweepers = SweeperSet::start(Arc::clone(&store), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("kept"), Some(Bytes::from("v")));

        sweepers.shutdown().await;
    }

    #[tokio::test]
    async fn stopped_sweepers_leave_entries_to_lazy_expiry() {
        let store = Arc::new(Store::new(2));

        let sweepers = SweeperSet::start(Arc::clone(&store), Duration::from_millis(10));
        sweepers.shutdown().await;

        store.set("k".into(), Bytes::from("v"), unix_now() - 1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // No sweeper ran, but the read path still refuses the entry
        assert_eq!(store.get("k"), None);
    }
}
