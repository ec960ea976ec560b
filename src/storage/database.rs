//! One numbered database.
//!
//! A [`Database`] guards a [`Keyspace`] with a single mutex. A command locks
//! it once and runs to completion under the guard, so every command is
//! atomic with respect to every other command on the same database.
//!
//! Expiry is lazy: an expired entry stays in the map until it is deleted or
//! overwritten, and every read or mutate path treats it as absent.
//!
//! ```
//! use standin_kv::storage::{Database, Entry};
//! use bytes::Bytes;
//!
//! let db = Database::new(0);
//! db.lock().put(Bytes::from("name"), Entry::string("alice"));
//! assert_eq!(db.lock().get_string(b"name").unwrap(), Some(Bytes::from("alice")));
//! ```

use crate::storage::entry::{now_millis, Entry, Value, NEVER};
use crate::storage::glob::GlobPattern;
use bytes::{Bytes, BytesMut};
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use thiserror::Error;

/// Failures of a single keyspace operation. All of them are reported to the
/// client as error replies.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("value is not an integer or out of range")]
    NotInteger,

    #[error("value is not a valid float")]
    NotFloat,

    #[error("increment or decrement would overflow")]
    Overflow,

    #[error("increment would produce NaN or Infinity")]
    NanOrInfinity,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Which end of a list an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEnd {
    Head,
    Tail,
}

/// Insertion-ordered map from key to [`Entry`].
#[derive(Debug, Default)]
pub struct Keyspace {
    entries: IndexMap<Bytes, Entry>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Primitive operations
    // ========================================================================

    /// The live entry for `key`, if any.
    pub fn get(&self, key: &[u8]) -> Option<&Entry> {
        let now = now_millis();
        self.entries.get(key).filter(|e| !e.is_expired_at(now))
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut Entry> {
        let now = now_millis();
        self.entries.get_mut(key).filter(|e| !e.is_expired_at(now))
    }

    /// Stores `entry`, replacing whatever was there.
    pub fn put(&mut self, key: Bytes, entry: Entry) {
        self.entries.insert(key, entry);
    }

    /// Removes `key`. Returns the previous entry only if it was live.
    pub fn remove(&mut self, key: &[u8]) -> Option<Entry> {
        let now = now_millis();
        self.entries
            .shift_remove(key)
            .filter(|e| !e.is_expired_at(now))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Live keys accepted by `predicate`, in insertion order.
    pub fn keys_where<F>(&self, mut predicate: F) -> Vec<Bytes>
    where
        F: FnMut(&[u8]) -> bool,
    {
        let now = now_millis();
        self.entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired_at(now) && predicate(&key[..]))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Live keys matching a glob pattern.
    pub fn keys(&self, pattern: &[u8]) -> Vec<Bytes> {
        let glob = GlobPattern::new(pattern);
        if glob.matches_everything() {
            return self.keys_where(|_| true);
        }
        self.keys_where(|key| glob.matches(key))
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = now_millis();
        self.entries
            .values()
            .filter(|e| !e.is_expired_at(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live keys that carry an expiry.
    pub fn expires_count(&self) -> usize {
        let now = now_millis();
        self.entries
            .values()
            .filter(|e| e.has_expiry() && !e.is_expired_at(now))
            .count()
    }

    /// Live entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &Entry)> {
        let now = now_millis();
        self.entries
            .iter()
            .filter(move |(_, e)| !e.is_expired_at(now))
    }

    // ========================================================================
    // String operations
    // ========================================================================

    pub fn get_string(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        match self.get(key) {
            Some(Entry {
                value: Value::String(data),
                ..
            }) => Ok(Some(data.clone())),
            Some(_) => Err(StorageError::WrongType),
            None => Ok(None),
        }
    }

    /// Overwrites `key` with a string and clears any expiry.
    pub fn set_string(&mut self, key: Bytes, value: Bytes) {
        self.put(key, Entry::string(value));
    }

    /// Writes only if the key is absent or expired. Returns whether it wrote.
    pub fn set_string_nx(&mut self, key: Bytes, value: Bytes) -> bool {
        if self.get(&key).is_some() {
            return false;
        }
        self.set_string(key, value);
        true
    }

    /// Writes every pair only if none of the keys is live.
    pub fn set_many_nx(&mut self, pairs: Vec<(Bytes, Bytes)>) -> bool {
        if pairs.iter().any(|(key, _)| self.get(key).is_some()) {
            return false;
        }
        for (key, value) in pairs {
            self.set_string(key, value);
        }
        true
    }

    pub fn strlen(&self, key: &[u8]) -> StorageResult<usize> {
        Ok(self.get_string(key)?.map(|v| v.len()).unwrap_or(0))
    }

    /// Appends to a string, creating it if absent. Returns the new length.
    pub fn append(&mut self, key: &Bytes, suffix: &[u8]) -> StorageResult<usize> {
        match self.get_mut(key) {
            Some(entry) => match &mut entry.value {
                Value::String(data) => {
                    let mut joined = BytesMut::with_capacity(data.len() + suffix.len());
                    joined.extend_from_slice(data);
                    joined.extend_from_slice(suffix);
                    *data = joined.freeze();
                    Ok(data.len())
                }
                Value::List(_) => Err(StorageError::WrongType),
            },
            None => {
                self.set_string(key.clone(), Bytes::copy_from_slice(suffix));
                Ok(suffix.len())
            }
        }
    }

    /// Adds `delta` to the integer stored at `key` (absent counts as 0).
    /// The expiry of an existing key is kept.
    pub fn incr_by(&mut self, key: &Bytes, delta: i64) -> StorageResult<i64> {
        let current = match self.get_string(key)? {
            Some(data) => std::str::from_utf8(&data)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or(StorageError::NotInteger)?,
            None => 0,
        };

        let next = current.checked_add(delta).ok_or(StorageError::Overflow)?;
        self.write_number(key, Bytes::from(next.to_string()));
        Ok(next)
    }

    /// Floating-point counterpart of [`Keyspace::incr_by`].
    pub fn incr_by_float(&mut self, key: &Bytes, delta: f64) -> StorageResult<f64> {
        let current = match self.get_string(key)? {
            Some(data) => std::str::from_utf8(&data)
                .ok()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .filter(|f| f.is_finite())
                .ok_or(StorageError::NotFloat)?,
            None => 0.0,
        };

        let next = current + delta;
        if !next.is_finite() {
            return Err(StorageError::NanOrInfinity);
        }
        self.write_number(key, Bytes::from(format_float(next)));
        Ok(next)
    }

    fn write_number(&mut self, key: &Bytes, rendered: Bytes) {
        match self.get_mut(key) {
            Some(entry) => entry.value = Value::String(rendered),
            None => self.set_string(key.clone(), rendered),
        }
    }

    // ========================================================================
    // Expiry
    // ========================================================================

    /// Sets an absolute expiry on a live key. Returns whether the key existed.
    pub fn expire_at(&mut self, key: &[u8], at_ms: i64) -> bool {
        match self.get_mut(key) {
            Some(entry) => {
                entry.expires_at = at_ms;
                true
            }
            None => false,
        }
    }

    /// Removes the expiry from a live key. Returns whether one was removed.
    pub fn persist(&mut self, key: &[u8]) -> bool {
        match self.get_mut(key) {
            Some(entry) if entry.has_expiry() => {
                entry.expires_at = NEVER;
                true
            }
            _ => false,
        }
    }

    /// Remaining lifetime in milliseconds: -2 when absent or expired, -1 when
    /// the key has no expiry.
    pub fn pttl(&self, key: &[u8]) -> i64 {
        match self.get(key) {
            Some(entry) => entry.remaining_ms(now_millis()).unwrap_or(-1),
            None => -2,
        }
    }

    /// "string", "list" or "none".
    pub fn key_type(&self, key: &[u8]) -> &'static str {
        self.get(key).map(|e| e.value.kind()).unwrap_or("none")
    }

    // ========================================================================
    // Lists
    // ========================================================================

    fn list_mut(&mut self, key: &[u8]) -> StorageResult<Option<&mut VecDeque<Bytes>>> {
        match self.get_mut(key) {
            Some(Entry {
                value: Value::List(items),
                ..
            }) => Ok(Some(items)),
            Some(_) => Err(StorageError::WrongType),
            None => Ok(None),
        }
    }

    fn list(&self, key: &[u8]) -> StorageResult<Option<&VecDeque<Bytes>>> {
        match self.get(key) {
            Some(Entry {
                value: Value::List(items),
                ..
            }) => Ok(Some(items)),
            Some(_) => Err(StorageError::WrongType),
            None => Ok(None),
        }
    }

    /// Pushes values one at a time onto `end`, creating the list if absent.
    /// `LPUSH k a b c` leaves `c` at the head. Returns the new length.
    pub fn push(&mut self, key: &Bytes, end: ListEnd, values: Vec<Bytes>) -> StorageResult<usize> {
        if self.list_mut(key)?.is_none() {
            self.put(key.clone(), Entry::list(std::iter::empty()));
        }
        let items = self.list_mut(key)?.ok_or(StorageError::WrongType)?;
        for value in values {
            match end {
                ListEnd::Head => items.push_front(value),
                ListEnd::Tail => items.push_back(value),
            }
        }
        Ok(items.len())
    }

    /// Removes one element from `end`. An emptied list stays in place.
    pub fn pop(&mut self, key: &[u8], end: ListEnd) -> StorageResult<Option<Bytes>> {
        Ok(self.list_mut(key)?.and_then(|items| match end {
            ListEnd::Head => items.pop_front(),
            ListEnd::Tail => items.pop_back(),
        }))
    }

    pub fn llen(&self, key: &[u8]) -> StorageResult<usize> {
        Ok(self.list(key)?.map(|items| items.len()).unwrap_or(0))
    }

    /// Element at `index`; negative indices count from the tail.
    pub fn lindex(&self, key: &[u8], index: i64) -> StorageResult<Option<Bytes>> {
        let items = match self.list(key)? {
            Some(items) => items,
            None => return Ok(None),
        };
        let len = items.len() as i64;
        let actual = if index < 0 { len + index } else { index };
        if actual < 0 || actual >= len {
            return Ok(None);
        }
        Ok(items.get(actual as usize).cloned())
    }

    /// Inclusive range with negative-index support, clamped to the list.
    pub fn lrange(&self, key: &[u8], start: i64, stop: i64) -> StorageResult<Vec<Bytes>> {
        let items = match self.list(key)? {
            Some(items) => items,
            None => return Ok(Vec::new()),
        };

        let len = items.len() as i64;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Ok(Vec::new());
        }

        Ok(items
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }
}

/// Renders a float the way INCRBYFLOAT replies: shortest form, no trailing
/// `.0` for whole numbers.
pub fn format_float(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e17 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// A numbered database: a [`Keyspace`] behind one lock.
#[derive(Debug)]
pub struct Database {
    index: usize,
    keyspace: Mutex<Keyspace>,
}

impl Database {
    pub fn new(index: usize) -> Self {
        Self::from_keyspace(index, Keyspace::new())
    }

    pub fn from_keyspace(index: usize, keyspace: Keyspace) -> Self {
        Self {
            index,
            keyspace: Mutex::new(keyspace),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Locks the keyspace for the duration of one command.
    pub fn lock(&self) -> MutexGuard<'_, Keyspace> {
        self.keyspace.lock()
    }

    /// Swaps in a freshly loaded keyspace.
    pub fn replace(&self, keyspace: Keyspace) {
        *self.keyspace.lock() = keyspace;
    }

    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        self.lock().get(key).cloned()
    }

    pub fn put(&self, key: Bytes, entry: Entry) {
        self.lock().put(key, entry);
    }

    pub fn remove(&self, key: &[u8]) -> Option<Entry> {
        self.lock().remove(key)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
