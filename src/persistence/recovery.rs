//! Startup Recovery
//!
//! Recovery runs once, before the server accepts its first connection:
//!
//! 1. Load the snapshot (any failure degrades to an empty image).
//! 2. Route every snapshot pair into its shard.
//! 3. Replay the active WAL in append order, applying each record
//!    through the same store mutations the executor uses.
//!
//! Replay stops cleanly at the end of the log or at the first torn
//! record. Entries whose deadlines passed while the process was down
//! are inserted as-is; the lazy read check and the sweepers treat them
//! as already expired, which is exactly the state a running process
//! would have converged to.

use crate::persistence::snapshot::Snapshotter;
use crate::persistence::wal::{read_records, WalCommand, WalError, WalRecord};
use crate::storage::Store;
use std::path::Path;
use tracing::info;

/// What recovery found on disk.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryReport {
    /// Keys loaded from the snapshot
    pub snapshot_keys: usize,
    /// WAL records replayed on top
    pub replayed_records: usize,
}

/// Loads the snapshot into the store and replays the active WAL.
pub fn recover(
    store: &Store,
    snapshotter: &Snapshotter,
    wal_path: &Path,
) -> Result<RecoveryReport, WalError> {
    let image = snapshotter.load();
    let snapshot_keys = image.len();
    for (key, entry) in image {
        store.set(key, entry.value, entry.expire_at);
    }

    let records = read_records(wal_path)?;
    let replayed_records = records.len();
    for record in records {
        apply_record(store, record);
    }

    info!(
        snapshot_keys,
        replayed_records,
        keys = store.len(),
        "recovery complete"
    );

    Ok(RecoveryReport {
        snapshot_keys,
        replayed_records,
    })
}

/// Applies one WAL record to the store.
///
/// The rules mirror the live executor: `Set` overwrites with the stored
/// absolute deadline, `Del` removes if present, `Expire` updates only a
/// key that was live when the record was appended, and `FlushDb` clears
/// every shard (holding the shard locks only for the flush itself).
pub fn apply_record(store: &Store, record: WalRecord) {
    match record.command {
        WalCommand::Set => store.set(record.key, record.value, record.expire_at),
        WalCommand::Del => {
            store.del(&record.key);
        }
        WalCommand::Expire => {
            store.expire_as_of(&record.key, record.expire_at, record.timestamp);
        }
        WalCommand::FlushDb => store.flush(),
    }
}
