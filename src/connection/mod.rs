//! TCP Connection Layer
//!
//! Accept-side plumbing: one task per client running a buffered
//! read → parse → execute → reply loop, with process-wide connection
//! counters.

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionStats};
