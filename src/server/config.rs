//! Server settings.

use crate::commands::DEFAULT_POLL_INTERVAL;
use crate::connection::DEFAULT_MAX_BUFFER_SIZE;
use crate::persistence::DEFAULT_SNAPSHOT_INTERVAL;
use crate::storage::DEFAULT_DATABASES;
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on; 0 picks a free port
    pub port: u16,

    /// Snapshot directory. `None` disables persistence.
    pub dir: Option<PathBuf>,

    /// Number of databases (valid SELECT indexes are `0..databases`)
    pub databases: usize,

    pub snapshot_interval: Duration,

    /// How often a blocked BLPOP/BRPOP rescans its keys
    pub blocking_poll_interval: Duration,

    /// Ceiling on buffered, not yet decoded input per connection
    pub max_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            dir: None,
            databases: DEFAULT_DATABASES,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            blocking_poll_interval: DEFAULT_POLL_INTERVAL,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_databases(mut self, databases: usize) -> Self {
        self.databases = databases;
        self
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    pub fn with_blocking_poll_interval(mut self, interval: Duration) -> Self {
        self.blocking_poll_interval = interval;
        self
    }

    pub fn with_max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
