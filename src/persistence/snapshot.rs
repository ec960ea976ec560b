//! Snapshot files.
//!
//! One file per database, `db<index>.snapshot`, holding a sequence of
//! records encoded with the wire codec and ended by end-of-file:
//!
//! ```text
//! $<key>            bulk string
//! :<expires_at>     integer, Unix ms or -1
//! $<value>          bulk string, or *<n> of bulk strings for a list
//! ```
//!
//! Writing goes to `db<index>.snapshot.tmp`, which is read back and its
//! record count compared with what was written before it replaces the real
//! file. A failed or truncated write therefore never clobbers the last good
//! snapshot.

use crate::protocol::{parse_message, ProtocolError, RespValue};
use crate::storage::{now_millis, Database, Entry, Keyspace, Value};
use bytes::Bytes;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt snapshot: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("snapshot truncated at byte {0}")]
    Truncated(usize),

    #[error("malformed snapshot record: {0}")]
    BadRecord(String),

    #[error("snapshot verification failed: wrote {expected} entries, read back {found}")]
    CountMismatch { expected: usize, found: usize },
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

pub fn snapshot_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("db{}.snapshot", index))
}

fn temp_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("db{}.snapshot.tmp", index))
}

/// Appends one `(key, expiry, value)` record to `buf`.
pub fn encode_record(key: &Bytes, entry: &Entry, buf: &mut Vec<u8>) {
    RespValue::BulkString(key.clone()).serialize_into(buf);
    RespValue::Integer(entry.expires_at).serialize_into(buf);
    match &entry.value {
        Value::String(data) => RespValue::BulkString(data.clone()).serialize_into(buf),
        Value::List(items) => RespValue::bulk_array(items.iter().cloned()).serialize_into(buf),
    }
}

/// Decodes every record in `data`, expired ones included.
pub fn decode_records(data: &[u8]) -> PersistenceResult<Vec<(Bytes, Entry)>> {
    let mut offset = 0;
    let mut records = Vec::new();

    while offset < data.len() {
        let key = match next_frame(data, &mut offset)? {
            RespValue::BulkString(key) => key,
            other => return Err(bad_record("key", &other)),
        };
        let expires_at = match next_frame(data, &mut offset)? {
            RespValue::Integer(at) => at,
            other => return Err(bad_record("expiry", &other)),
        };
        let value = match next_frame(data, &mut offset)? {
            RespValue::BulkString(data) => Value::String(data),
            RespValue::Array(items) => Value::List(
                items
                    .into_iter()
                    .map(|item| match item {
                        RespValue::BulkString(data) => Ok(data),
                        other => Err(bad_record("list element", &other)),
                    })
                    .collect::<PersistenceResult<_>>()?,
            ),
            other => return Err(bad_record("value", &other)),
        };

        records.push((key, Entry { value, expires_at }));
    }

    Ok(records)
}

fn next_frame(data: &[u8], offset: &mut usize) -> PersistenceResult<RespValue> {
    match parse_message(&data[*offset..])? {
        Some((frame, used)) => {
            *offset += used;
            Ok(frame)
        }
        None => Err(PersistenceError::Truncated(*offset)),
    }
}

fn bad_record(field: &str, frame: &RespValue) -> PersistenceError {
    PersistenceError::BadRecord(format!("unexpected {} frame {:?}", field, frame))
}

/// Writes `db` to its snapshot file in `dir`, verifying the temporary file
/// before it replaces the previous snapshot. Returns the number of entries
/// written.
pub fn write_snapshot(db: &Database, dir: &Path) -> PersistenceResult<usize> {
    fs::create_dir_all(dir)?;
    let path = snapshot_path(dir, db.index());
    let tmp = temp_path(dir, db.index());

    let written = match write_temp(db, &tmp) {
        Ok(written) => written,
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
    };

    let found = match fs::read(&tmp)
        .map_err(PersistenceError::from)
        .and_then(|data| decode_records(&data))
    {
        Ok(records) => records.len(),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
    };

    if found != written {
        let _ = fs::remove_file(&tmp);
        return Err(PersistenceError::CountMismatch {
            expected: written,
            found,
        });
    }

    if let Err(e) = fs::rename(&tmp, &path) {
        // Some platforms refuse to rename over an existing file.
        debug!(error = %e, path = %path.display(), "rename failed, removing old snapshot first");
        if path.exists() {
            fs::remove_file(&path)?;
        }
        fs::rename(&tmp, &path)?;
    }

    debug!(db = db.index(), entries = written, path = %path.display(), "snapshot written");
    Ok(written)
}

/// Serializes the live entries under the database lock.
fn write_temp(db: &Database, tmp: &Path) -> PersistenceResult<usize> {
    let keyspace = db.lock();
    let mut writer = BufWriter::new(File::create(tmp)?);
    let mut buf = Vec::with_capacity(256);
    let mut written = 0;

    for (key, entry) in keyspace.iter() {
        buf.clear();
        encode_record(key, entry, &mut buf);
        writer.write_all(&buf)?;
        written += 1;
    }

    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(written)
}

/// Reads a snapshot file into a keyspace, dropping entries that have
/// expired since it was written.
pub fn read_snapshot(path: &Path) -> PersistenceResult<Keyspace> {
    let data = fs::read(path)?;
    let now = now_millis();
    let mut keyspace = Keyspace::new();
    let mut skipped = 0;

    for (key, entry) in decode_records(&data)? {
        if entry.is_expired_at(now) {
            skipped += 1;
            continue;
        }
        keyspace.put(key, entry);
    }

    if skipped > 0 {
        warn!(path = %path.display(), skipped, "dropped expired entries while loading snapshot");
    }
    Ok(keyspace)
}
