//! Stored values and their expiry.
//!
//! An [`Entry`] carries an absolute expiry in Unix milliseconds, with
//! [`NEVER`] meaning no expiry. Absolute wall-clock time is what the
//! snapshot files record, so an entry restored after a restart keeps the
//! same deadline.

use bytes::Bytes;
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// Expiry sentinel: the entry lives until deleted or overwritten.
pub const NEVER: i64 = -1;

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// The payload of a key. Its kind is fixed by the command family that
/// created it; commands of the other family fail with a type error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(Bytes),
    List(VecDeque<Bytes>),
}

impl Value {
    /// Name reported by TYPE.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: Value,
    /// Absolute expiry in Unix ms, or [`NEVER`].
    pub expires_at: i64,
}

impl Entry {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: NEVER,
        }
    }

    pub fn string(data: impl Into<Bytes>) -> Self {
        Self::new(Value::String(data.into()))
    }

    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        Self::new(Value::List(items.into_iter().collect()))
    }

    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.expires_at = expires_at;
        self
    }

    #[inline]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at != NEVER && self.expires_at <= now
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    pub fn has_expiry(&self) -> bool {
        self.expires_at != NEVER
    }

    /// Milliseconds until expiry, `None` when the entry never expires.
    pub fn remaining_ms(&self, now: i64) -> Option<i64> {
        if self.expires_at == NEVER {
            None
        } else {
            Some((self.expires_at - now).max(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_expires() {
        let entry = Entry::string("v");
        assert!(!entry.is_expired_at(i64::MAX));
        assert_eq!(entry.remaining_ms(0), None);
    }

    #[test]
    fn test_expired_at_boundary() {
        let entry = Entry::string("v").with_expiry(1_000);
        assert!(!entry.is_expired_at(999));
        assert!(entry.is_expired_at(1_000));
        assert_eq!(entry.remaining_ms(400), Some(600));
    }

    #[test]
    fn test_kind() {
        assert_eq!(Entry::string("v").value.kind(), "string");
        assert_eq!(Entry::list([Bytes::from("a")]).value.kind(), "list");
    }
}
