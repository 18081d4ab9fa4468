//! Client Connection Handling
//!
//! One task per connected client. The task accumulates socket bytes in
//! a buffer, peels complete RESP commands off the front, runs each one
//! through the command handler, and writes the framed reply back. A
//! single read may carry a partial command or a whole pipeline of them;
//! the buffer-and-parse split handles both.
//!
//! Commands from one connection execute strictly in send order; the
//! task reads, executes, and replies sequentially.

use crate::commands::CommandHandler;
use crate::protocol::{parse, ParseError, RespValue};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Hard cap on buffered, unparsed input per connection.
const MAX_BUFFER_SIZE: usize = 64 * 1024;

const INITIAL_BUFFER_SIZE: usize = 4 * 1024;

/// Process-wide connection counters (relaxed atomics, approximate).
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub accepted: AtomicU64,
    pub active: AtomicU64,
    pub commands: AtomicU64,
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn opened(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    fn closed(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Why a connection loop ended.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    #[error("connection closed mid-command")]
    TruncatedCommand,

    #[error("input buffer limit exceeded")]
    BufferFull,
}

/// Serves one client until it disconnects or errors.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    stats.opened();
    info!(client = %addr, "client connected");

    match serve(stream, addr, &handler, &stats).await {
        Ok(()) => debug!(client = %addr, "client disconnected"),
        Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
            debug!(client = %addr, "connection reset by client")
        }
        Err(e) => warn!(client = %addr, error = %e, "connection closed with error"),
    }

    stats.closed();
}

async fn serve(
    stream: TcpStream,
    addr: SocketAddr,
    handler: &CommandHandler,
    stats: &ConnectionStats,
) -> Result<(), ConnectionError> {
    let mut stream = BufWriter::new(stream);
    let mut buffer = BytesMut::with_capacity(INITIAL_BUFFER_SIZE);

    loop {
        // Drain every complete command already buffered before reading
        // again, so pipelined clients get all their replies
        while let Some(command) = next_command(&mut buffer, addr)? {
            let reply = handler.execute(command);
            stats.commands.fetch_add(1, Ordering::Relaxed);

            let bytes = reply.serialize();
            stream.write_all(&bytes).await?;
            stream.flush().await?;
            stats.bytes_out.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        }

        if buffer.len() >= MAX_BUFFER_SIZE {
            warn!(client = %addr, buffered = buffer.len(), "input buffer limit exceeded");
            return Err(ConnectionError::BufferFull);
        }

        let n = stream.get_mut().read_buf(&mut buffer).await?;
        if n == 0 {
            // EOF: clean if nothing is half-parsed
            if buffer.is_empty() {
                return Ok(());
            }
            return Err(ConnectionError::TruncatedCommand);
        }
        stats.bytes_in.fetch_add(n as u64, Ordering::Relaxed);
        trace!(client = %addr, bytes = n, buffered = buffer.len(), "read");
    }
}

/// Pops one complete command off the front of the buffer.
fn next_command(
    buffer: &mut BytesMut,
    addr: SocketAddr,
) -> Result<Option<RespValue>, ConnectionError> {
    if buffer.is_empty() {
        return Ok(None);
    }
    match parse(buffer) {
        Ok(Some((value, consumed))) => {
            buffer.advance(consumed);
            Ok(Some(value))
        }
        Ok(None) => Ok(None),
        Err(e) => {
            warn!(client = %addr, error = %e, "malformed input");
            Err(e.into())
        }
    }
}
