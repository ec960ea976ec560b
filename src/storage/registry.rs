//! The set of numbered databases owned by a server.
//!
//! Databases are created on first reference. Creation takes the write lock
//! and re-checks, so two sessions selecting a fresh index at the same time
//! end up sharing one instance.

use crate::storage::database::Database;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Default number of databases (indexes `0..16`).
pub const DEFAULT_DATABASES: usize = 16;

#[derive(Debug)]
pub struct Databases {
    count: usize,
    map: RwLock<HashMap<usize, Arc<Database>>>,
}

impl Databases {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Number of valid indexes.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn contains_index(&self, index: usize) -> bool {
        index < self.count
    }

    /// The database at `index`, created if this is its first use.
    /// `None` when the index is out of range.
    pub fn get_or_create(&self, index: usize) -> Option<Arc<Database>> {
        if !self.contains_index(index) {
            return None;
        }

        if let Some(db) = self.map.read().get(&index) {
            return Some(Arc::clone(db));
        }

        let mut map = self.map.write();
        let db = map.entry(index).or_insert_with(|| {
            debug!(db = index, "creating database");
            Arc::new(Database::new(index))
        });
        Some(Arc::clone(db))
    }

    /// The database at `index` only if it has been created.
    pub fn existing(&self, index: usize) -> Option<Arc<Database>> {
        self.map.read().get(&index).cloned()
    }

    /// Every created database, ordered by index.
    pub fn all(&self) -> Vec<Arc<Database>> {
        let mut dbs: Vec<_> = self.map.read().values().cloned().collect();
        dbs.sort_by_key(|db| db.index());
        dbs
    }

    /// Clears every database while holding the registry exclusively, so no
    /// database can be created part-way through.
    pub fn flush_all(&self) {
        let map = self.map.write();
        for db in map.values() {
            db.clear();
        }
    }
}

impl Default for Databases {
    fn default() -> Self {
        Self::new(DEFAULT_DATABASES)
    }
}
