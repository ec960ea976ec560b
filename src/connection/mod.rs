//! Client sessions.
//!
//! ```text
//! ┌──────────────────────────┐
//! │   Listener (server mod)  │
//! └────────────┬─────────────┘
//!              │ accept()
//!              ▼
//! ┌──────────────────────────────────────────────────┐
//! │ ConnectionHandler, one task per client            │
//! │                                                   │
//! │  read bytes ──> decode RESP ──> execute ──> reply │
//! │                                                   │
//! │  owns: input buffer, selected DB index            │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! The handler is generic over the byte stream so it can be driven by a
//! `TcpStream` or by an in-memory mock.

pub mod handler;

pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionStats,
    DEFAULT_MAX_BUFFER_SIZE,
};
