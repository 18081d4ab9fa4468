//! Command Layer
//!
//! Bridges the protocol and the store: parsed RESP commands come in,
//! framed replies go out. All durability ordering lives here: a
//! mutating command is appended to the WAL before any shard changes,
//! and is rejected outright if that append fails.
//!
//! Supported verbs: `PING`, `GET`, `SET` (with `EX seconds`), `DEL`,
//! `EXPIRE`, `TTL`, `FLUSHDB`.

pub mod handler;

pub use handler::CommandHandler;
