//! Connection Handler
//!
//! Runs the session loop for one client:
//!
//! ```text
//! 1. Client connects
//!        │
//!        ▼
//! 2. ConnectionHandler created
//!        │
//!        ▼
//! 3. Loop:
//!    ┌──────────────────────────────┐
//!    │ a. Decode the next command   │
//!    │ b. Execute it                │
//!    │ c. Write and flush the reply │
//!    │ d. Stop after QUIT           │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Client disconnects / error / QUIT
//!        │
//!        ▼
//! 5. Handler task ends
//! ```
//!
//! Commands on one connection are handled strictly in order and each reply
//! is flushed before the next command is read. Malformed input gets one
//! `-ERR Protocol error: ...` reply and then the connection is closed, since
//! the position in the stream can no longer be trusted.

use crate::commands::CommandHandler;
use crate::protocol::{CommandReader, DecodeError, RespValue};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
pub struct ConnectionHandler {
    /// Command decoder over the read half
    reader: CommandReader<OwnedReadHalf>,

    /// Buffered write half
    writer: BufWriter<OwnedWriteHalf>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// The command handler (shared storage behind it)
    command_handler: CommandHandler,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        let (read_half, write_half) = stream.into_split();

        Self {
            reader: CommandReader::new(read_half),
            writer: BufWriter::new(write_half),
            addr,
            command_handler,
            stats,
        }
    }

    /// Runs the session until the client quits, disconnects or fails.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client quit"),
            Err(ConnectionError::ClientDisconnected) => {
                info!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let command = match self.reader.read_command().await {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(e) if e.is_malformed() => {
                    warn!(client = %self.addr, error = %e, "Malformed request");
                    let reply = RespValue::error(format!("ERR Protocol error: {}", e));
                    self.send_response(&reply).await?;
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            };

            trace!(client = %self.addr, command = %command, "Command received");

            let response = self.command_handler.execute(command);
            self.stats.command_processed();

            self.send_response(&response.value).await?;

            if !response.keep_open {
                return Ok(());
            }
        }
    }

    /// Writes and flushes one reply.
    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(
            client = %self.addr,
            bytes = bytes.len(),
            "Sent response"
        );
        Ok(())
    }
}

/// Errors that can end a session.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The client sent input that could not be decoded
    #[error("protocol error: {0}")]
    Protocol(DecodeError),

    /// Client disconnected between commands
    #[error("client disconnected")]
    ClientDisconnected,
}

impl From<DecodeError> for ConnectionError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Io(e) => ConnectionError::IoError(e),
            DecodeError::ConnectionClosed => ConnectionError::ClientDisconnected,
            other => ConnectionError::Protocol(other),
        }
    }
}

/// Handles a client connection to completion.
///
/// This is a convenience function that creates a ConnectionHandler
/// and runs it. Errors are already logged by the handler.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    if let Err(e) = handler.run().await {
        trace!(client = %addr, error = %e, "Session ended with error");
    }
}
