//! Snapshot persistence.
//!
//! - `snapshot`: the per-database file format and the write/verify/rename
//!   protocol
//! - `manager`: loading at startup, the background timer, SAVE and the final
//!   snapshot at stop

pub mod manager;
pub mod snapshot;

pub use manager::{PersistenceManager, PersistenceState, DEFAULT_SNAPSHOT_INTERVAL};
pub use snapshot::{
    read_snapshot, snapshot_path, write_snapshot, PersistenceError, PersistenceResult,
};
