//! Write-Ahead Log
//!
//! Every mutating command is appended here *before* the store is touched,
//! making the log a total order of mutations that replay can reapply
//! after a crash.
//!
//! ## On-disk format
//!
//! The active log is a flat sequence of length-prefixed records:
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │ len: u32 LE  │ bincode(WalRecord), len bytes│  ... repeated
//! └──────────────┴──────────────────────────────┘
//! ```
//!
//! Records are self-delimiting, written whole, and buffered in user
//! space; fsync happens on a configurable interval rather than per
//! record. A crash can therefore lose the buffered suffix, and the
//! reader treats a torn tail as the end of the log.
//!
//! ## Rotation and retention
//!
//! Before an append, the writer checks the active file size against the
//! configured threshold. At or past it, the active file is flushed,
//! renamed to `wal-<YYYYMMDD-HHMMSS>.log` in the WAL directory, and a
//! fresh active file is opened. Retention then deletes the oldest
//! archives beyond the configured count; retention failures are logged
//! and never fail the append that triggered them. The snapshot service
//! also forces a rotation after every successful snapshot so the active
//! log only carries records newer than the snapshot.

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::storage::unix_now;

/// Mutating verbs recorded in the log. Read-only verbs (`GET`, `TTL`,
/// `PING`) never reach the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalCommand {
    Set,
    Del,
    Expire,
    FlushDb,
}

/// One logged mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    /// Unix seconds when the record was appended
    pub timestamp: u64,
    /// The mutating verb
    pub command: WalCommand,
    /// Primary key; empty for `FlushDb`
    pub key: String,
    /// Value bytes; empty for `Del`, `Expire`, and `FlushDb`
    pub value: Bytes,
    /// Absolute unix-second expiry deadline for `Set … EX` and
    /// `Expire`; 0 otherwise
    pub expire_at: u64,
}

impl WalRecord {
    /// Record for `SET key value [EX …]` with the already-computed
    /// absolute deadline.
    pub fn set(key: String, value: Bytes, expire_at: u64) -> Self {
        Self {
            timestamp: 0,
            command: WalCommand::Set,
            key,
            value,
            expire_at,
        }
    }

    /// Record for `DEL key`.
    pub fn del(key: String) -> Self {
        Self {
            timestamp: 0,
            command: WalCommand::Del,
            key,
            value: Bytes::new(),
            expire_at: 0,
        }
    }

    /// Record for `EXPIRE key seconds` with the absolute deadline.
    pub fn expire(key: String, expire_at: u64) -> Self {
        Self {
            timestamp: 0,
            command: WalCommand::Expire,
            key,
            value: Bytes::new(),
            expire_at,
        }
    }

    /// Record for `FLUSHDB`.
    pub fn flush_db() -> Self {
        Self {
            timestamp: 0,
            command: WalCommand::FlushDb,
            key: String::new(),
            value: Bytes::new(),
            expire_at: 0,
        }
    }
}

/// WAL failures surfaced to the executor.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("wal i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wal record encoding failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),
}

struct WalInner {
    writer: BufWriter<File>,
    /// Bytes in the active file, including still-buffered writes
    size: u64,
}

/// Append-only writer over the active log file.
///
/// The writer owns the active file descriptor; one mutex serializes
/// encode+write, rotation, and flush. On the mutating hot path the lock
/// order is always WAL writer first, shard lock second.
pub struct WalWriter {
    path: PathBuf,
    directory: PathBuf,
    max_size_bytes: u64,
    max_files: usize,
    inner: Mutex<WalInner>,
}

impl WalWriter {
    /// Opens (or creates) the active log in append mode.
    pub fn open(
        path: impl Into<PathBuf>,
        directory: impl Into<PathBuf>,
        max_size_bytes: u64,
        max_files: usize,
    ) -> Result<Self, WalError> {
        let path = path.into();
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path,
            directory,
            max_size_bytes,
            max_files,
            inner: Mutex::new(WalInner {
                writer: BufWriter::new(file),
                size,
            }),
        })
    }

    /// Appends one record, stamping its timestamp.
    ///
    /// The size-based rotation check runs first, so a log at the
    /// threshold is archived before the record lands in the fresh file.
    /// The record is written whole; durability follows at the next
    /// flush cycle.
    pub fn append(&self, mut record: WalRecord) -> Result<(), WalError> {
        record.timestamp = unix_now();
        let body = bincode::serde::encode_to_vec(&record, bincode::config::standard())?;

        let mut inner = self.inner.lock().unwrap();
        if inner.size >= self.max_size_bytes {
            self.rotate_locked(&mut inner)?;
        }

        inner.writer.write_all(&(body.len() as u32).to_le_bytes())?;
        inner.writer.write_all(&body)?;
        inner.size += 4 + body.len() as u64;
        Ok(())
    }

    /// Flushes buffered records and fsyncs the active file.
    pub fn flush(&self) -> Result<(), WalError> {
        let mut inner = self.inner.lock().unwrap();
        inner.writer.flush()?;
        inner.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Forces a rotation regardless of size. Called by the snapshot
    /// service after a successful snapshot. Rotating an empty log is a
    /// no-op.
    pub fn rotate(&self) -> Result<(), WalError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.size == 0 {
            return Ok(());
        }
        self.rotate_locked(&mut inner)
    }

    /// Size of the active log in bytes, including buffered writes.
    pub fn active_size(&self) -> u64 {
        self.inner.lock().unwrap().size
    }

    /// Path of the active log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rotate_locked(&self, inner: &mut WalInner) -> Result<(), WalError> {
        inner.writer.flush()?;

        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let mut archive = self.directory.join(format!("wal-{}.log", stamp));
        // Multiple rotations in the same second must not clobber an archive
        let mut n = 1;
        while archive.exists() {
            archive = self.directory.join(format!("wal-{}-{}.log", stamp, n));
            n += 1;
        }
        std::fs::rename(&self.path, &archive)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        inner.writer = BufWriter::new(file);
        inner.size = 0;
        info!(archive = %archive.display(), "rotated WAL");

        if let Err(e) = self.apply_retention() {
            warn!(error = %e, "WAL retention scan failed");
        }
        Ok(())
    }

    /// Deletes archived logs beyond `max_files`, newest kept first.
    /// Best-effort: every failure is logged and skipped.
    fn apply_retention(&self) -> std::io::Result<()> {
        let mut archives = Vec::new();
        for dir_entry in std::fs::read_dir(&self.directory)? {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("wal-") || !name.ends_with(".log") {
                continue;
            }
            if let Ok(modified) = dir_entry.metadata().and_then(|m| m.modified()) {
                archives.push((dir_entry.path(), modified));
            }
        }

        archives.sort_by(|a, b| b.1.cmp(&a.1));
        for (old, _) in archives.iter().skip(self.max_files) {
            match std::fs::remove_file(old) {
                Ok(()) => debug!(file = %old.display(), "deleted archived WAL"),
                Err(e) => warn!(file = %old.display(), error = %e, "failed to delete archived WAL"),
            }
        }
        Ok(())
    }
}

/// Reads every decodable record from a log file in append order.
///
/// A missing file reads as an empty log. A torn tail (a partial length
/// prefix, a short body, or an undecodable record) ends the read at the
/// last complete record: that is the expected artifact of a crash
/// between flush cycles.
pub fn read_records(path: &Path) -> Result<Vec<WalRecord>, WalError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    let mut records = Vec::new();

    loop {
        let mut len_bytes = [0u8; 4];
        match reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => {
                warn!(error = %e, "WAL read failed mid-stream; keeping records so far");
                break;
            }
        }

        // The prefix may itself be torn garbage, so never trust it for a
        // large allocation: read at most `len` bytes and see what arrives
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut body = Vec::with_capacity(len.min(1 << 20));
        match (&mut reader).take(len as u64).read_to_end(&mut body) {
            Ok(n) if n == len => {}
            Ok(_) => {
                warn!("WAL ends mid-record; treating as truncated tail");
                break;
            }
            Err(e) => {
                warn!(error = %e, "WAL read failed mid-record; keeping records so far");
                break;
            }
        }

        match bincode::serde::decode_from_slice::<WalRecord, _>(
            &body,
            bincode::config::standard(),
        ) {
            Ok((record, _)) => records.push(record),
            Err(e) => {
                warn!(error = %e, "undecodable WAL record; treating as truncated tail");
                break;
            }
        }
    }

    Ok(records)
}
