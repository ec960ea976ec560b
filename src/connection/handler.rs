//! One client session.
//!
//! ```text
//! 1. Listener accepts a socket and spawns a ConnectionHandler
//!        │
//!        ▼
//! 2. ┌──────────────────────────────┐
//!    │ Read bytes into the buffer   │◄─────────┐
//!    └───────────┬──────────────────┘          │
//!                ▼                             │
//!    ┌──────────────────────────────┐          │
//!    │ Decode one request frame     │── none ──┘
//!    └───────────┬──────────────────┘
//!                ▼
//!    ┌──────────────────────────────┐
//!    │ Notify observers, execute,   │
//!    │ write the reply              │──── loop
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 3. QUIT, client EOF, transport error or server stop ends the task
//! ```
//!
//! Requests are handled strictly one at a time. A malformed frame gets one
//! error reply and the session skips ahead to the next `*` that starts a
//! line, which is where the next request most likely begins. Requests that
//! arrived behind the bad frame in the same read are still served, and the
//! rest of a bad frame arriving in later reads is dropped without a second
//! reply. The connection stays open. The session owns the index of the
//! database its client selected.

use crate::commands::{Command, CommandHandler};
use crate::protocol::{RespParser, RespValue};
use crate::server::Observers;
use crate::shutdown::Shutdown;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, trace, warn};

/// Default ceiling on buffered, not yet decoded input (64 MB).
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Counters shared by every session of a server.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently open connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    pub bytes_read: AtomicU64,
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

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// What the loop does after a request.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// A session over any byte stream; a `TcpStream` in the server, a mock in
/// tests.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,

    /// Peer address, for logging
    addr: SocketAddr,

    /// Bytes received but not yet decoded
    buffer: BytesMut,

    command_handler: CommandHandler,
    parser: RespParser,
    stats: Arc<ConnectionStats>,
    observers: Arc<Observers>,
    shutdown: Shutdown,

    /// Database selected by this client
    db_index: usize,

    max_buffer_size: usize,

    /// Dropping the remainder of a malformed frame
    discarding: bool,

    /// Whether the last dropped byte was `\n`
    after_newline: bool,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            parser: RespParser::new(),
            stats,
            observers: Arc::new(Observers::new()),
            shutdown: Shutdown::never(),
            db_index: 0,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            discarding: false,
            after_newline: false,
        }
    }

    pub fn with_observers(mut self, observers: Arc<Observers>) -> Self {
        self.observers = observers;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    /// Runs the session until the client leaves, sends QUIT, breaks the
    /// transport, or the server stops.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.addr, "client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => debug!(client = %self.addr, "session closed"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "client disconnected")
            }
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            loop {
                match self.next_request() {
                    Ok(Some(parts)) => {
                        if self.handle_request(parts).await? == Flow::Quit {
                            return Ok(());
                        }
                    }
                    Ok(None) => break,
                    Err(reply) => self.send_response(&reply).await?,
                }
            }

            if !self.read_more_data().await? {
                return Ok(());
            }
        }
    }

    /// Decodes the next request from the buffer. A protocol error becomes
    /// the error reply to send, and the undecodable bytes are dropped.
    fn next_request(&mut self) -> Result<Option<Vec<Bytes>>, RespValue> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        if self.discarding {
            self.skip_to_next_request();
            if self.discarding {
                return Ok(None);
            }
        }

        match self.parser.parse_request(&self.buffer) {
            Ok(Some((parts, consumed))) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "parsed request"
                );
                Ok(Some(parts))
            }
            Ok(None) => {
                trace!(client = %self.addr, buffered = self.buffer.len(), "incomplete request");
                Ok(None)
            }
            Err(e) => {
                warn!(client = %self.addr, error = %e, "protocol error");
                // The bad frame starts at offset 0; never resync onto it.
                self.after_newline = false;
                self.skip_to_next_request();
                Err(RespValue::error(format!("ERR Protocol error: {}", e)))
            }
        }
    }

    /// Drops buffered bytes up to the next `*` at the start of a line. When
    /// there is none, everything is dropped and the search resumes on the
    /// next read.
    fn skip_to_next_request(&mut self) {
        let buffer = &self.buffer;
        let after_newline = self.after_newline;
        let found = buffer.iter().enumerate().position(|(i, &byte)| {
            byte == b'*' && if i == 0 { after_newline } else { buffer[i - 1] == b'\n' }
        });

        match found {
            Some(at) => {
                trace!(client = %self.addr, skipped = at, "resynchronized after protocol error");
                let _ = self.buffer.split_to(at);
                self.discarding = false;
            }
            None => {
                self.after_newline = self.buffer.last() == Some(&b'\n');
                self.buffer.clear();
                self.discarding = true;
            }
        }
    }

    async fn handle_request(&mut self, parts: Vec<Bytes>) -> Result<Flow, ConnectionError> {
        let command = match Command::from_parts(parts) {
            Ok(command) => command,
            Err(e) => {
                self.send_response(&e.to_resp()).await?;
                return Ok(Flow::Continue);
            }
        };

        trace!(client = %self.addr, db = self.db_index, command = %command.name, "executing");
        self.observers.command_received(self.db_index, &command);

        let reply = self
            .command_handler
            .execute(&mut self.db_index, &command)
            .await;
        self.stats.command_processed();
        self.send_response(&reply).await?;

        if command.name == "QUIT" {
            return Ok(Flow::Quit);
        }
        Ok(Flow::Continue)
    }

    /// Reads more bytes into the buffer. Returns `false` when the server is
    /// stopping.
    async fn read_more_data(&mut self) -> Result<bool, ConnectionError> {
        if self.shutdown.is_shutdown() {
            return Ok(false);
        }

        if self.buffer.len() >= self.max_buffer_size {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = tokio::select! {
            result = self.stream.get_mut().read_buf(&mut self.buffer) => result?,
            _ = self.shutdown.recv() => {
                trace!(client = %self.addr, "session interrupted by shutdown");
                return Ok(false);
            }
        };

        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            }
            return Err(ConnectionError::UnexpectedEof);
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "read data");
        Ok(true)
    }

    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "sent response");
        Ok(())
    }
}

/// Transport failures. These end the session and are never sent to the
/// client.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Client closed the socket between requests
    #[error("client disconnected")]
    ClientDisconnected,

    /// Client closed the socket part-way through a request
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("buffer size limit exceeded")]
    BufferFull,
}

/// Runs `session` to completion and logs how it ended. This is the task
/// body the listener spawns per connection.
pub async fn handle_connection<S>(session: ConnectionHandler<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let addr = session.addr;
    match session.run().await {
        Ok(()) | Err(ConnectionError::ClientDisconnected) => {}
        Err(ConnectionError::IoError(ref io_err))
            if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
        Err(e) => info!(client = %addr, error = %e, "session ended with error"),
    }
}
