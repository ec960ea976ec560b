//! # standin-kv - an in-process RESP key/value server for tests
//!
//! standin-kv speaks enough of the Redis wire protocol to stand in for a real
//! server in test environments. A test process starts a [`Server`] on an
//! ephemeral port, points its client at it, and may also read or seed the
//! databases directly.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                                Server                                │
//! │                                                                      │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐               │
//! │  │  Listener   │───>│ Connection  │───>│  Command    │               │
//! │  │ (accept)    │    │  Handler    │    │  Handler    │               │
//! │  └──────┬──────┘    └──────┬──────┘    └──────┬──────┘               │
//! │         │                  │                  │                      │
//! │         ▼                  ▼                  ▼                      │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────────────┐  │
//! │  │  Observers  │    │ RESP Parser │    │        Databases         │  │
//! │  └─────────────┘    └─────────────┘    │  ┌─────┐ ┌─────┐ ┌─────┐ │  │
//! │                                        │  │ db0 │ │ db1 │ │ ... │ │  │
//! │                                        │  │Mutex│ │Mutex│ │     │ │  │
//! │                                        │  └─────┘ └─────┘ └─────┘ │  │
//! │                                        └────────────▲─────────────┘  │
//! │                                                     │                │
//! │                                        ┌────────────┴─────────────┐  │
//! │                                        │   PersistenceManager     │  │
//! │                                        │  (timer, SAVE, stop)     │  │
//! │                                        └──────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use standin_kv::{Server, ServerConfig};
//!
//! # async fn run() -> Result<(), standin_kv::ServerError> {
//! let server = Server::new(ServerConfig::new().with_port(0));
//! let addr = server.start().await?;
//! println!("listening on {}", addr);
//!
//! // ... run the code under test against `addr` ...
//!
//! server.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Supported Commands
//!
//! - Strings: `SET key value [NX]`, `GET`, `APPEND`, `STRLEN`, `MGET`, `MSET`,
//!   `MSETNX`, `SETEX key seconds value`
//! - Counters: `INCR`, `DECR`, `INCRBY`, `DECRBY`, `INCRBYFLOAT`, `DECRBYFLOAT`
//! - Expiry: `EXPIRE`, `TTL`, `PTTL`, `PERSIST`
//! - Keys: `DEL`, `EXISTS`, `TYPE`, `KEYS pattern`
//! - Lists: `LPUSH`, `RPUSH`, `LPOP`, `RPOP`, `LLEN`, `LINDEX`, `LRANGE`,
//!   `BLPOP`, `BRPOP`
//! - Server: `PING`, `ECHO`, `QUIT`, `SELECT`, `DBSIZE`, `FLUSHDB`,
//!   `FLUSHALL`, `SAVE`, `INFO [section]`
//!
//! Anything else replies with a "not implemented" error.
//!
//! ## Expiry
//!
//! Expiry is lazy. An expired entry stays in memory until it is deleted or
//! overwritten, but every read path, KEYS and DBSIZE treat it as absent.

pub mod commands;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod storage;

pub use commands::{Command, CommandError, CommandHandler};
pub use connection::{ConnectionHandler, ConnectionStats};
pub use persistence::{PersistenceError, PersistenceManager};
pub use protocol::{ProtocolError, RespParser, RespValue};
pub use server::{ObserverResult, Server, ServerConfig, ServerError, ServerObserver, ServerState};
pub use storage::{Database, Databases, Entry, Value};

/// The default port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host to bind to
pub const DEFAULT_HOST: &str = "127.0.0.1";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
