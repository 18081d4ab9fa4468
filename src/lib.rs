//! # emberkv: A Durable In-Memory Key-Value Database
//!
//! emberkv is a small Redis-protocol key-value server that keeps its
//! working set in memory and its history on disk. Values are opaque
//! byte strings under UTF-8 keys, with optional per-key expiration.
//! Durability comes from a write-ahead log plus periodic full-state
//! snapshots: on startup the latest snapshot is loaded and the active
//! WAL is replayed on top of it.
//!
//! ## Architecture
//!
//! ```text
//!  client ──TCP──▶ connection ──▶ CommandHandler ──▶ WalWriter (append first)
//!                    handler           │                  │
//!                                      ▼                  ▼ rotation,
//!                                 Store (S shards,     wal.log +
//!                                 RwLock each)         wal-*.log archives
//!                                      ▲
//!                 ┌────────────────────┼──────────────────┐
//!                 │                    │                  │
//!           per-shard sweepers   SnapshotService     recovery (startup)
//!           (expired keys)       (snapshot.db +      snapshot + WAL replay
//!                                 WAL rotation)
//! ```
//!
//! Every mutating command is appended to the WAL *before* the store is
//! touched; a failed append fails the command. The WAL is therefore a
//! total order of acknowledged mutations, and replaying it over the
//! last snapshot reconstructs the store after a crash.
//!
//! ## Commands
//!
//! | verb | reply |
//! |------|-------|
//! | `PING` | `+PONG` |
//! | `GET key` | `+<value>` or `+(nil)` |
//! | `SET key value [EX seconds]` | `+OK` |
//! | `DEL key` | `:1` / `:0` |
//! | `EXPIRE key seconds` | `:1` / `:0` |
//! | `TTL key` | `:<seconds>`, `:-1` no expiry, `:-2` missing |
//! | `FLUSHDB` | `+OK` |
//!
//! ## Quick Start
//!
//! ```ignore
//! use emberkv::commands::CommandHandler;
//! use emberkv::config::Config;
//! use emberkv::connection::{handle_connection, ConnectionStats};
//! use emberkv::lifecycle::Lifecycle;
//! use emberkv::persistence::{recover, Snapshotter, WalWriter};
//! use emberkv::storage::{recommended_shard_count, Store};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!
//!     let store = Arc::new(Store::new(recommended_shard_count(
//!         config.store.segments_per_cpu,
//!     )));
//!     let snapshotter = Arc::new(Snapshotter::new(&config.store.snapshot_file_path)?);
//!     recover(&store, &snapshotter, &config.store.wal_file_path)?;
//!
//!     let wal = Arc::new(WalWriter::open(
//!         &config.store.wal_file_path,
//!         config.store.wal_directory(),
//!         config.store.wal_max_size_bytes,
//!         config.store.wal_max_files,
//!     )?);
//!     let lifecycle = Lifecycle::start(
//!         Arc::clone(&store),
//!         Arc::clone(&wal),
//!         snapshotter,
//!         &config.store,
//!     );
//!
//!     let handler = CommandHandler::new(store, wal);
//!     let stats = Arc::new(ConnectionStats::new());
//!     let listener = TcpListener::bind(config.server.bind_address()).await?;
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         tokio::spawn(handle_connection(
//!             stream,
//!             addr,
//!             handler.clone(),
//!             Arc::clone(&stats),
//!         ));
//!     }
//! }
//! ```
//!
//! ## Modules
//!
//! - [`storage`]: the sharded in-memory store and its expiry sweepers
//! - [`persistence`]: WAL, snapshots, and startup recovery
//! - [`commands`]: command validation, WAL ordering, and dispatch
//! - [`protocol`]: RESP value model and parser
//! - [`connection`]: per-client TCP loop
//! - [`config`]: YAML configuration with defaults
//! - [`lifecycle`]: background task startup and ordered shutdown

pub mod commands;
pub mod config;
pub mod connection;
pub mod lifecycle;
pub mod persistence;
pub mod protocol;
pub mod storage;

pub use commands::CommandHandler;
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use lifecycle::Lifecycle;
pub use persistence::{recover, Snapshotter, WalWriter};
pub use storage::{Store, SweeperSet};

/// Default port the server listens on.
pub const DEFAULT_PORT: u16 = 6379;

/// Crate version, from Cargo.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
