//! In-memory storage.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                      Databases                        │
//! │        RwLock<HashMap<index, Arc<Database>>>          │
//! │  ┌────────────┐ ┌────────────┐       ┌────────────┐   │
//! │  │ Database 0 │ │ Database 1 │  ...  │ Database N │   │
//! │  │   Mutex    │ │   Mutex    │       │   Mutex    │   │
//! │  │  Keyspace  │ │  Keyspace  │       │  Keyspace  │   │
//! │  └────────────┘ └────────────┘       └────────────┘   │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! - `entry`: values, expiry sentinel, clock
//! - `database`: the keyspace and its per-database lock
//! - `registry`: lazily created databases
//! - `glob`: KEYS pattern matching

pub mod database;
pub mod entry;
pub mod glob;
pub mod registry;

pub use database::{format_float, Database, Keyspace, ListEnd, StorageError, StorageResult};
pub use entry::{now_millis, Entry, Value, NEVER};
pub use glob::GlobPattern;
pub use registry::{Databases, DEFAULT_DATABASES};
