//! Sharded Key-Value Store
//!
//! The store splits the keyspace across `S` independent shards, each a
//! `HashMap` behind its own `RwLock`. Single-key operations touch exactly
//! one shard, so unrelated keys never contend on the same lock.
//!
//! ```text
//! key ──FNV-1a──▶ shard index ──▶ ┌─────────┐┌─────────┐   ┌─────────┐
//!                                 │ Shard 0 ││ Shard 1 │...│ Shard S │
//!                                 │ RwLock  ││ RwLock  │   │ RwLock  │
//!                                 └─────────┘└─────────┘   └─────────┘
//! ```
//!
//! Expiry is tracked as an absolute unix-second deadline on each entry
//! (`0` = never expires). Absolute deadlines are what make WAL replay
//! time-idempotent: replaying a `SET k v EX 60` an hour later does not
//! grant the key another 60 seconds. Expired entries become invisible to
//! readers immediately and are physically removed either by the read path
//! (which upgrades to the write lock) or by the background sweeper.
//!
//! The router hash is FNV-1a rather than the standard library hasher:
//! `DefaultHasher` is randomly seeded per process, and replay must route
//! every persisted key to the same shard it lived on when it was logged.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// A stored value and its expiry deadline.
///
/// `expire_at` is an absolute unix timestamp in whole seconds; `0` means
/// the entry never expires. The type is serde-derived so the snapshot
/// file persists exactly what the shards hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The stored bytes
    pub value: Bytes,
    /// Absolute unix-second expiry deadline; 0 = no expiry
    pub expire_at: u64,
}

impl Entry {
    /// Creates an entry with an optional absolute expiry deadline.
    pub fn new(value: Bytes, expire_at: u64) -> Self {
        Self { value, expire_at }
    }

    /// Whether this entry is expired at the given unix-second instant.
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expire_at != 0 && now >= self.expire_at
    }
}

/// Result of a TTL lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Key is absent or already expired
    Missing,
    /// Key exists and never expires
    NoExpiry,
    /// Key exists and expires in this many whole seconds
    Seconds(i64),
}

/// One slice of the keyspace.
#[derive(Debug, Default)]
struct Shard {
    map: RwLock<HashMap<String, Entry>>,
}

/// The sharded store.
///
/// Designed to sit in an `Arc` shared by every connection task, the
/// sweepers, and the snapshot service. All operations are thread-safe;
/// single-key operations acquire exactly one shard lock.
pub struct Store {
    shards: Vec<Shard>,

    /// Approximate live-key count (relaxed atomics)
    key_count: AtomicU64,
    get_count: AtomicU64,
    set_count: AtomicU64,
    del_count: AtomicU64,
    expired_count: AtomicU64,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("shards", &self.shards.len())
            .field("keys", &self.key_count.load(Ordering::Relaxed))
            .finish()
    }
}

/// Current unix time in whole seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Shard count for this host: `available_parallelism * segments_per_cpu`.
///
/// The count is fixed for the process lifetime. Persisted data never
/// records a shard index, so a snapshot or WAL taken on a host with a
/// different CPU count still recovers correctly; every key is re-routed
/// from its bytes on load.
pub fn recommended_shard_count(segments_per_cpu: usize) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus * segments_per_cpu).max(1)
}

/// 32-bit FNV-1a over a byte slice.
#[inline]
fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

impl Store {
    /// Creates a store with the given number of shards.
    ///
    /// # Panics
    ///
    /// Panics if `shard_count` is zero.
    pub fn new(shard_count: usize) -> Self {
        assert!(shard_count > 0, "store requires at least one shard");
        Self {
            shards: (0..shard_count).map(|_| Shard::default()).collect(),
            key_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Number of shards, fixed at construction.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Routes a key to its shard index. Pure function of the key bytes
    /// and the shard count.
    #[inline]
    pub fn shard_index(&self, key: &str) -> usize {
        fnv1a_32(key.as_bytes()) as usize % self.shards.len()
    }

    #[inline]
    fn shard(&self, key: &str) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Inserts or overwrites a key.
    ///
    /// `expire_at` is an absolute unix-second deadline (0 = no expiry).
    pub fn set(&self, key: String, value: Bytes, expire_at: u64) {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let shard = self.shard(&key);
        let mut map = shard.map.write().unwrap();
        if map.insert(key, Entry::new(value, expire_at)).is_none() {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Looks up a key, returning `None` when absent or expired.
    ///
    /// The fast path holds only the shared lock. When the entry turns out
    /// to be expired, the shared lock is released and the exclusive lock
    /// taken to remove it; deleting under a shared lock is not allowed.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        self.live_entry(key).map(|entry| entry.value)
    }

    /// Looks up a key and returns the whole entry when it is live.
    fn live_entry(&self, key: &str) -> Option<Entry> {
        let now = unix_now();
        let shard = self.shard(key);

        {
            let map = shard.map.read().unwrap();
            match map.get(key) {
                Some(entry) if !entry.is_expired(now) => return Some(entry.clone()),
                Some(_) => {} // expired, fall through to removal
                None => return None,
            }
        }

        // Expired under the read lock: retake as writer and re-check,
        // since another writer may have replaced the entry in between.
        let mut map = shard.map.write().unwrap();
        match map.get(key) {
            Some(entry) if entry.is_expired(now) => {
                map.remove(key);
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    /// Removes a key.
    ///
    /// # Returns
    ///
    /// `true` if a mapping was removed.
    pub fn del(&self, key: &str) -> bool {
        self.del_count.fetch_add(1, Ordering::Relaxed);

        let shard = self.shard(key);
        let mut map = shard.map.write().unwrap();
        if map.remove(key).is_some() {
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Sets the absolute expiry deadline of an existing key.
    ///
    /// An entry that is already expired counts as absent: it is removed
    /// and the call reports `false`.
    pub fn expire(&self, key: &str, expire_at: u64) -> bool {
        self.expire_as_of(key, expire_at, unix_now())
    }

    /// Like [`Store::expire`], but evaluates the entry's liveness at the
    /// given instant instead of the current clock.
    ///
    /// WAL replay uses this with the record's own timestamp: whether an
    /// EXPIRE took effect depends on whether the key was live when the
    /// command originally ran, not on the clock at replay time.
    pub fn expire_as_of(&self, key: &str, expire_at: u64, now: u64) -> bool {
        let shard = self.shard(key);
        let mut map = shard.map.write().unwrap();

        match map.get_mut(key) {
            Some(entry) if entry.is_expired(now) => {
                map.remove(key);
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                false
            }
            Some(entry) => {
                entry.expire_at = expire_at;
                true
            }
            None => false,
        }
    }

    /// Remaining time-to-live of a key.
    pub fn ttl(&self, key: &str) -> Ttl {
        match self.live_entry(key) {
            None => Ttl::Missing,
            Some(entry) if entry.expire_at == 0 => Ttl::NoExpiry,
            Some(entry) => Ttl::Seconds(entry.expire_at.saturating_sub(unix_now()) as i64),
        }
    }

    /// Empties every shard.
    ///
    /// All shard locks are taken in ascending index order, every map is
    /// replaced, and the locks are released together. The ordering keeps
    /// concurrent flushes from deadlocking against each other.
    pub fn flush(&self) {
        let mut guards: Vec<_> = self
            .shards
            .iter()
            .map(|shard| shard.map.write().unwrap())
            .collect();
        for map in guards.iter_mut() {
            map.clear();
        }
        drop(guards);
        self.key_count.store(0, Ordering::Relaxed);
    }

    /// Removes expired entries from one shard. Called by that shard's
    /// background sweeper.
    ///
    /// # Returns
    ///
    /// The number of entries removed.
    pub fn sweep_shard(&self, index: usize) -> u64 {
        let now = unix_now();
        let mut map = self.shards[index].map.write().unwrap();
        let before = map.len();
        map.retain(|_, entry| !entry.is_expired(now));
        let removed = (before - map.len()) as u64;
        drop(map);

        if removed > 0 {
            self.key_count.fetch_sub(removed, Ordering::Relaxed);
            self.expired_count.fetch_add(removed, Ordering::Relaxed);
        }
        removed
    }

    /// Sweeps every shard once.
    pub fn sweep_all(&self) -> u64 {
        (0..self.shards.len()).map(|i| self.sweep_shard(i)).sum()
    }

    /// Copies the full keyspace into one map for snapshotting.
    ///
    /// Each shard is copied under its shared lock in index order. The
    /// image is per-shard consistent but not globally atomic; WAL replay
    /// over the snapshot covers writes that land between shard copies.
    pub fn snapshot_image(&self) -> HashMap<String, Entry> {
        let mut image = HashMap::with_capacity(self.len() as usize);
        for shard in &self.shards {
            let map = shard.map.read().unwrap();
            for (key, entry) in map.iter() {
                image.insert(key.clone(), entry.clone());
            }
        }
        image
    }

    /// Approximate number of live keys.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Operation counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            keys: self.key_count.load(Ordering::Relaxed),
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

/// Store operation counters.
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    /// Live keys (approximate)
    pub keys: u64,
    /// Total GET operations
    pub get_ops: u64,
    /// Total SET operations
    pub set_ops: u64,
    /// Total DEL operations
    pub del_ops: u64,
    /// Entries removed because they expired
    pub expired: u64,
}
