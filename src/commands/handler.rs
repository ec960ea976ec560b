//! Command dispatch.
//!
//! A request arrives as a list of bulk strings. The first one names the
//! command; it is uppercased and looked up in [`COMMAND_TABLE`], the
//! argument count is checked against the entry's [`Arity`], and only then
//! is the command run against the session's selected database.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │   lookup    │───>│ check arity │───>│  dispatch   │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │                                               │             │
//! │                     lock selected Database ◄──┘             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Ordinary commands lock the database once and finish under the lock.
//! BLPOP/BRPOP and SAVE are the only commands that await.
//!
//! ## Supported Commands
//!
//! - Strings: `SET [NX]`, `GET`, `APPEND`, `STRLEN`, `MGET`, `MSET`,
//!   `MSETNX`, `SETEX`
//! - Arithmetic: `INCR`, `DECR`, `INCRBY`, `DECRBY`, `INCRBYFLOAT`,
//!   `DECRBYFLOAT`
//! - Expiry: `EXPIRE`, `TTL`, `PTTL`, `PERSIST`
//! - Keys: `DEL`, `EXISTS`, `TYPE`, `KEYS`
//! - Lists: `LPUSH`, `RPUSH`, `LPOP`, `RPOP`, `LLEN`, `LINDEX`, `LRANGE`,
//!   `BLPOP`, `BRPOP`
//! - Databases: `SELECT`, `FLUSHDB`, `FLUSHALL`, `DBSIZE`
//! - Server: `PING`, `ECHO`, `QUIT`, `INFO`, `SAVE`

use crate::commands::error::{CommandError, CommandResult};
use crate::commands::list::{self, BlockingWait};
use crate::commands::string;
use crate::connection::ConnectionStats;
use crate::persistence::PersistenceManager;
use crate::protocol::RespValue;
use crate::shutdown::Shutdown;
use crate::storage::{Database, Databases, ListEnd, StorageError};
use bytes::Bytes;
use std::fmt::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default sleep between blocking-pop scans.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One request: an uppercased name and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: &str, args: Vec<Bytes>) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            args,
        }
    }

    /// Splits a decoded request into name and arguments.
    pub fn from_parts(parts: Vec<Bytes>) -> CommandResult<Self> {
        let mut parts = parts.into_iter();
        let name = parts.next().ok_or(CommandError::EmptyCommand)?;
        Ok(Self {
            name: String::from_utf8_lossy(&name).to_ascii_uppercase(),
            args: parts.collect(),
        })
    }
}

/// How many arguments (after the name) a command accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Between(usize, usize),
    /// One or more key/value pairs.
    Pairs,
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Between(lo, hi) => (lo..=hi).contains(&count),
            Arity::Pairs => count > 0 && count % 2 == 0,
        }
    }
}

pub const COMMAND_TABLE: &[(&str, Arity)] = &[
    // Strings and arithmetic
    ("SET", Arity::Between(2, 3)),
    ("GET", Arity::Exact(1)),
    ("APPEND", Arity::Exact(2)),
    ("STRLEN", Arity::Exact(1)),
    ("MGET", Arity::AtLeast(1)),
    ("MSET", Arity::Pairs),
    ("MSETNX", Arity::Pairs),
    ("SETEX", Arity::Exact(3)),
    ("INCR", Arity::Exact(1)),
    ("DECR", Arity::Exact(1)),
    ("INCRBY", Arity::Exact(2)),
    ("DECRBY", Arity::Exact(2)),
    ("INCRBYFLOAT", Arity::Exact(2)),
    ("DECRBYFLOAT", Arity::Exact(2)),
    // Expiry and keys
    ("EXPIRE", Arity::Exact(2)),
    ("TTL", Arity::Exact(1)),
    ("PTTL", Arity::Exact(1)),
    ("PERSIST", Arity::Exact(1)),
    ("DEL", Arity::AtLeast(1)),
    ("EXISTS", Arity::AtLeast(1)),
    ("TYPE", Arity::Exact(1)),
    ("KEYS", Arity::Exact(1)),
    // Lists
    ("LPUSH", Arity::AtLeast(2)),
    ("RPUSH", Arity::AtLeast(2)),
    ("LPOP", Arity::Exact(1)),
    ("RPOP", Arity::Exact(1)),
    ("LLEN", Arity::Exact(1)),
    ("LINDEX", Arity::Exact(2)),
    ("LRANGE", Arity::Exact(3)),
    ("BLPOP", Arity::AtLeast(2)),
    ("BRPOP", Arity::AtLeast(2)),
    // Databases
    ("SELECT", Arity::Exact(1)),
    ("FLUSHDB", Arity::Exact(0)),
    ("FLUSHALL", Arity::Exact(0)),
    ("DBSIZE", Arity::Exact(0)),
    // Server
    ("PING", Arity::Between(0, 1)),
    ("ECHO", Arity::Exact(1)),
    ("QUIT", Arity::Exact(0)),
    ("INFO", Arity::Between(0, 1)),
    ("SAVE", Arity::Exact(0)),
];

pub fn lookup(name: &str) -> Option<Arity> {
    COMMAND_TABLE
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, arity)| *arity)
}

/// Parses an integer argument.
pub fn parse_int(arg: &[u8]) -> CommandResult<i64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(CommandError::Storage(StorageError::NotInteger))
}

/// Parses a finite floating-point argument.
pub fn parse_float(arg: &[u8]) -> CommandResult<f64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|f| f.is_finite())
        .ok_or(CommandError::Storage(StorageError::NotFloat))
}

/// Executes commands for one session. Cheap to clone; every clone shares
/// the databases, counters and persistence manager.
#[derive(Clone)]
pub struct CommandHandler {
    databases: Arc<Databases>,
    stats: Arc<ConnectionStats>,
    persistence: Option<Arc<PersistenceManager>>,
    wait: BlockingWait,
    port: u16,
    start_time: Instant,
}

impl CommandHandler {
    pub fn new(databases: Arc<Databases>, stats: Arc<ConnectionStats>) -> Self {
        Self {
            databases,
            stats,
            persistence: None,
            wait: BlockingWait {
                poll_interval: DEFAULT_POLL_INTERVAL,
                shutdown: Shutdown::never(),
            },
            port: 0,
            start_time: Instant::now(),
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<PersistenceManager>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Blocking pops return nil once `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.wait.shutdown = shutdown;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.wait.poll_interval = interval;
        self
    }

    /// Port reported by INFO.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn databases(&self) -> &Arc<Databases> {
        &self.databases
    }

    /// Runs `command` against database `*db_index` and returns the reply.
    /// SELECT updates `db_index`. Failures come back as error replies.
    pub async fn execute(&self, db_index: &mut usize, command: &Command) -> RespValue {
        match self.run(db_index, command).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!(command = %command.name, error = %e, "command failed");
                e.to_resp()
            }
        }
    }

    async fn run(&self, db_index: &mut usize, command: &Command) -> CommandResult {
        let arity = lookup(&command.name)
            .ok_or_else(|| CommandError::UnknownCommand(command.name.clone()))?;
        if !arity.accepts(command.args.len()) {
            return Err(CommandError::WrongArity(command.name.to_ascii_lowercase()));
        }

        let args = &command.args[..];
        match command.name.as_str() {
            "BLPOP" => {
                let db = self.database(*db_index)?;
                list::blocking_pop(&db, args, ListEnd::Head, &self.wait).await
            }
            "BRPOP" => {
                let db = self.database(*db_index)?;
                list::blocking_pop(&db, args, ListEnd::Tail, &self.wait).await
            }
            "SAVE" => self.save().await,
            _ => self.dispatch(db_index, &command.name, args),
        }
    }

    fn dispatch(&self, db_index: &mut usize, name: &str, args: &[Bytes]) -> CommandResult {
        // Commands that do not touch the selected database.
        match name {
            "PING" => {
                return Ok(match args.first() {
                    Some(msg) => RespValue::bulk_string(msg.clone()),
                    None => RespValue::pong(),
                })
            }
            "ECHO" => return Ok(RespValue::bulk_string(args[0].clone())),
            "QUIT" => return Ok(RespValue::ok()),
            "INFO" => return self.info(args),
            "SELECT" => return self.select(db_index, args),
            "FLUSHALL" => {
                self.databases.flush_all();
                return Ok(RespValue::ok());
            }
            _ => {}
        }

        let db = self.database(*db_index)?;
        let mut ks = db.lock();
        let ks = &mut *ks;

        match name {
            "SET" => string::set(ks, args),
            "GET" => string::get(ks, args),
            "APPEND" => string::append(ks, args),
            "STRLEN" => string::strlen(ks, args),
            "MGET" => string::mget(ks, args),
            "MSET" => string::mset(ks, args),
            "MSETNX" => string::msetnx(ks, args),
            "SETEX" => string::setex(ks, args),
            "INCR" => string::incr_by(ks, &args[0], 1),
            "DECR" => string::incr_by(ks, &args[0], -1),
            "INCRBY" => string::incrby(ks, args),
            "DECRBY" => string::decrby(ks, args),
            "INCRBYFLOAT" => string::incrbyfloat(ks, args),
            "DECRBYFLOAT" => string::decrbyfloat(ks, args),

            "EXPIRE" => string::expire(ks, args),
            "TTL" => string::ttl(ks, args),
            "PTTL" => string::pttl(ks, args),
            "PERSIST" => string::persist(ks, args),

            "DEL" => {
                let removed = args.iter().filter(|key| ks.remove(key).is_some()).count();
                Ok(RespValue::integer(removed as i64))
            }
            "EXISTS" => {
                let found = args.iter().filter(|key| ks.get(key).is_some()).count();
                Ok(RespValue::integer(found as i64))
            }
            "TYPE" => Ok(RespValue::simple_string(ks.key_type(&args[0]))),
            "KEYS" => Ok(RespValue::bulk_array(ks.keys(&args[0]))),

            "LPUSH" => list::push(ks, args, ListEnd::Head),
            "RPUSH" => list::push(ks, args, ListEnd::Tail),
            "LPOP" => list::pop(ks, args, ListEnd::Head),
            "RPOP" => list::pop(ks, args, ListEnd::Tail),
            "LLEN" => list::llen(ks, args),
            "LINDEX" => list::lindex(ks, args),
            "LRANGE" => list::lrange(ks, args),

            "FLUSHDB" => {
                ks.clear();
                Ok(RespValue::ok())
            }
            "DBSIZE" => Ok(RespValue::integer(ks.len() as i64)),

            _ => Err(CommandError::UnknownCommand(name.to_string())),
        }
    }

    fn database(&self, index: usize) -> CommandResult<Arc<Database>> {
        self.databases
            .get_or_create(index)
            .ok_or(CommandError::DbIndexOutOfRange)
    }

    /// SELECT index
    fn select(&self, db_index: &mut usize, args: &[Bytes]) -> CommandResult {
        let requested = parse_int(&args[0])?;
        let index = usize::try_from(requested).map_err(|_| CommandError::DbIndexOutOfRange)?;
        self.database(index)?;
        *db_index = index;
        Ok(RespValue::ok())
    }

    /// SAVE
    async fn save(&self) -> CommandResult {
        let manager = match &self.persistence {
            Some(manager) if manager.is_enabled() => manager,
            _ => {
                return Err(CommandError::Persistence(
                    "persistence is disabled: no snapshot directory configured".to_string(),
                ))
            }
        };

        let entries = manager
            .snapshot_all_blocking()
            .await
            .map_err(|e| CommandError::Persistence(format!("snapshot failed: {}", e)))?;
        info!(entries, "SAVE completed");
        Ok(RespValue::ok())
    }

    /// INFO [section]
    fn info(&self, args: &[Bytes]) -> CommandResult {
        let section = args
            .first()
            .map(|s| String::from_utf8_lossy(s).to_ascii_lowercase());
        let wants = |name: &str| match section.as_deref() {
            None | Some("all") | Some("default") | Some("everything") => true,
            Some(requested) => requested == name,
        };

        let mut out = String::new();
        // Writing into a String cannot fail.
        if wants("server") {
            let _ = write!(
                out,
                "# Server\r\n\
                 standin_kv_version:{}\r\n\
                 os:{}\r\n\
                 process_id:{}\r\n\
                 tcp_port:{}\r\n\
                 uptime_in_seconds:{}\r\n\
                 \r\n",
                crate::VERSION,
                std::env::consts::OS,
                std::process::id(),
                self.port,
                self.start_time.elapsed().as_secs(),
            );
        }
        if wants("clients") {
            let _ = write!(
                out,
                "# Clients\r\nconnected_clients:{}\r\n\r\n",
                self.stats.active_connections.load(Ordering::Relaxed),
            );
        }
        if wants("stats") {
            let _ = write!(
                out,
                "# Stats\r\n\
                 total_connections_received:{}\r\n\
                 total_commands_processed:{}\r\n\
                 total_net_input_bytes:{}\r\n\
                 total_net_output_bytes:{}\r\n\
                 \r\n",
                self.stats.connections_accepted.load(Ordering::Relaxed),
                self.stats.commands_processed.load(Ordering::Relaxed),
                self.stats.bytes_read.load(Ordering::Relaxed),
                self.stats.bytes_written.load(Ordering::Relaxed),
            );
        }
        if wants("keyspace") {
            out.push_str("# Keyspace\r\n");
            for db in self.databases.all() {
                let ks = db.lock();
                let keys = ks.len();
                if keys > 0 {
                    let _ = write!(
                        out,
                        "db{}:keys={},expires={}\r\n",
                        db.index(),
                        keys,
                        ks.expires_count()
                    );
                }
            }
        }

        Ok(RespValue::bulk_string(out))
    }
}
