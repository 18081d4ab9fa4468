//! Durability Layer
//!
//! Two cooperating mechanisms keep the in-memory store recoverable:
//!
//! - the **write-ahead log** ([`wal`]): every mutating command is
//!   appended before the store is touched, so the log is a replayable
//!   total order of mutations;
//! - **snapshots** ([`snapshot`]): a periodic full copy of the keyspace
//!   that bounds how much WAL has to be replayed, with a forced WAL
//!   rotation after each successful snapshot.
//!
//! [`recovery`] ties them together at startup: latest snapshot first,
//! then the active WAL on top.

pub mod recovery;
pub mod snapshot;
pub mod wal;

pub use recovery::{recover, RecoveryReport};
pub use snapshot::{snapshot_now, SnapshotError, SnapshotService, Snapshotter};
pub use wal::{read_records, WalCommand, WalError, WalRecord, WalWriter};
