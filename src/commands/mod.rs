//! Command processing.
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │  Vec<Bytes>
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  handler: lookup, arity, dispatch
//! │                 │  string:  strings, counters, expiry
//! │                 │  list:    lists, BLPOP/BRPOP
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    Database     │  (storage module)
//! └─────────────────┘
//! ```

pub mod error;
pub mod handler;
pub mod list;
pub mod string;

pub use error::{CommandError, CommandResult};
pub use handler::{Arity, Command, CommandHandler, DEFAULT_POLL_INTERVAL};
pub use list::BlockingWait;
