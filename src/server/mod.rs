//! The listener and its lifecycle.
//!
//! ```text
//!            start()                          stop()
//!   Idle ───────────────> Running ───────────────────────> Stopped
//!          load snapshots            raise the stop flag
//!          bind                      close the listener
//!          notify observers          wait for sessions
//!          accept loop + timer       final snapshot
//!                                    notify observers
//! ```
//!
//! A [`Server`] also exposes its databases directly so a host process can
//! seed or inspect state without going through a socket.

pub mod config;
pub mod observer;

pub use config::ServerConfig;
pub use observer::{ObserverResult, Observers, ServerObserver};

use crate::commands::CommandHandler;
use crate::connection::{handle_connection, ConnectionHandler, ConnectionStats};
use crate::persistence::{PersistenceManager, PersistenceResult};
use crate::shutdown::Shutdown;
use crate::storage::{Database, Databases, Entry};
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server already started")]
    AlreadyStarted,

    #[error("DB index {0} is out of range")]
    InvalidDatabase(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Running,
    Stopped,
}

pub struct Server {
    config: ServerConfig,
    databases: Arc<Databases>,
    stats: Arc<ConnectionStats>,
    observers: Arc<Observers>,
    persistence: Arc<PersistenceManager>,
    shutdown_tx: watch::Sender<bool>,
    state: Mutex<ServerState>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let databases = Arc::new(Databases::new(config.databases));
        let persistence = Arc::new(PersistenceManager::new(
            Arc::clone(&databases),
            config.dir.clone(),
            config.snapshot_interval,
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            databases,
            stats: Arc::new(ConnectionStats::new()),
            observers: Arc::new(Observers::new()),
            persistence,
            shutdown_tx,
            state: Mutex::new(ServerState::Idle),
            accept_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    /// The bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    pub fn databases(&self) -> &Arc<Databases> {
        &self.databases
    }

    /// Loads snapshots, binds and starts accepting connections. Returns the
    /// bound address, which tells the caller the port when configured with 0.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        {
            let mut state = self.state.lock();
            if *state != ServerState::Idle {
                return Err(ServerError::AlreadyStarted);
            }
            *state = ServerState::Running;
        }

        let persistence = Arc::clone(&self.persistence);
        match tokio::task::spawn_blocking(move || persistence.load_all()).await {
            Ok(loaded) if loaded > 0 => info!(databases = loaded, "restored from snapshots"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "snapshot loading task failed"),
        }

        let bind_addr = self.config.bind_address();
        let bound = match TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(e) => Err(e),
        };
        let (listener, addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                *self.state.lock() = ServerState::Idle;
                return Err(ServerError::Bind {
                    addr: bind_addr,
                    source,
                });
            }
        };
        *self.local_addr.lock() = Some(addr);

        self.observers.server_starting(addr.port());

        let shutdown = Shutdown::new(self.shutdown_tx.subscribe());
        let mut handler = CommandHandler::new(Arc::clone(&self.databases), Arc::clone(&self.stats))
            .with_shutdown(shutdown.clone())
            .with_poll_interval(self.config.blocking_poll_interval)
            .with_port(addr.port());
        if self.persistence.is_enabled() {
            handler = handler.with_persistence(Arc::clone(&self.persistence));
        }

        let sessions = SessionSettings {
            handler,
            stats: Arc::clone(&self.stats),
            observers: Arc::clone(&self.observers),
            shutdown,
            max_buffer_size: self.config.max_buffer_size,
        };
        *self.accept_task.lock() = Some(tokio::spawn(accept_loop(listener, sessions)));

        self.persistence.start();

        info!(%addr, databases = self.databases.count(), "server listening");
        Ok(addr)
    }

    /// Stops accepting, ends every session (blocked pops return nil), writes
    /// a final snapshot and notifies observers. Calling it again is a no-op.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state != ServerState::Running {
                return;
            }
            *state = ServerState::Stopped;
        }

        info!("server stopping");
        self.shutdown_tx.send_replace(true);

        let accept_task = self.accept_task.lock().take();
        if let Some(task) = accept_task {
            if let Err(e) = task.await {
                error!(error = %e, "accept loop failed");
            }
        }

        match self.persistence.stop().await {
            Ok(entries) if self.persistence.is_enabled() => {
                info!(entries, "final snapshot written")
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "final snapshot failed"),
        }

        self.observers.server_stopped();
        info!("server stopped");
    }

    /// Snapshots every database now, like SAVE.
    pub async fn save(&self) -> PersistenceResult<usize> {
        self.persistence.snapshot_all_blocking().await
    }

    /// The database at `index`, created on first use.
    pub fn database(&self, index: usize) -> Result<Arc<Database>, ServerError> {
        self.databases
            .get_or_create(index)
            .ok_or(ServerError::InvalidDatabase(index))
    }

    /// Live entry under `key`; expired entries read as absent.
    pub fn get(&self, index: usize, key: &[u8]) -> Result<Option<Entry>, ServerError> {
        Ok(self.database(index)?.get(key))
    }

    pub fn set(&self, index: usize, key: impl Into<Bytes>, entry: Entry) -> Result<(), ServerError> {
        self.database(index)?.put(key.into(), entry);
        Ok(())
    }

    pub fn flush_db(&self, index: usize) -> Result<(), ServerError> {
        self.database(index)?.clear();
        Ok(())
    }

    pub fn flush_all(&self) {
        self.databases.flush_all();
    }

    pub fn add_observer(&self, observer: Arc<dyn ServerObserver>) {
        self.observers.add(observer);
    }

    pub fn remove_observer<O: ServerObserver + ?Sized>(&self, observer: &Arc<O>) -> bool {
        self.observers.remove(observer)
    }
}

/// Everything a new session needs, cloned per connection.
struct SessionSettings {
    handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    observers: Arc<Observers>,
    shutdown: Shutdown,
    max_buffer_size: usize,
}

/// Accepts until the stop flag is raised, then closes the listener and waits
/// for the open sessions to finish.
async fn accept_loop(listener: TcpListener, settings: SessionSettings) {
    let mut shutdown = settings.shutdown.clone();
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(client = %addr, error = %e, "failed to set TCP_NODELAY");
                    }

                    let session = ConnectionHandler::new(
                        stream,
                        addr,
                        settings.handler.clone(),
                        Arc::clone(&settings.stats),
                    )
                    .with_observers(Arc::clone(&settings.observers))
                    .with_shutdown(settings.shutdown.clone())
                    .with_max_buffer_size(settings.max_buffer_size);

                    sessions.spawn(handle_connection(session));
                }
                Err(e) => error!(error = %e, "failed to accept connection"),
            },
            _ = shutdown.recv() => break,
        }

        // Reap finished sessions so the set does not grow without bound.
        while sessions.try_join_next().is_some() {}
    }

    drop(listener);
    debug!(open = sessions.len(), "listener closed, waiting for sessions");
    while sessions.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RespParser, RespValue};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn config() -> ServerConfig {
        ServerConfig::new().with_port(0)
    }

    async fn roundtrip(stream: &mut TcpStream, request: &[u8]) -> RespValue {
        stream.write_all(request).await.unwrap();
        let mut buf = Vec::new();
        let mut parser = RespParser::new();
        loop {
            let mut chunk = [0u8; 512];
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "server closed the connection");
            buf.extend_from_slice(&chunk[..n]);
            if let Some((value, _)) = parser.parse(&buf).unwrap() {
                return value;
            }
        }
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let server = Server::new(config());
        assert_eq!(server.state(), ServerState::Idle);

        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr(), Some(addr));
        assert_eq!(server.state(), ServerState::Running);
        assert!(matches!(server.start().await, Err(ServerError::AlreadyStarted)));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let reply = roundtrip(&mut stream, b"*1\r\n$4\r\nPING\r\n").await;
        assert_eq!(reply, RespValue::pong());

        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(TcpStream::connect(addr).await.is_err());

        // Second stop is a no-op.
        server.stop().await;
    }

    #[tokio::test]
    async fn test_bind_failure_leaves_server_idle() {
        let first = Server::new(config());
        let addr = first.start().await.unwrap();

        let second = Server::new(config().with_port(addr.port()));
        assert!(matches!(second.start().await, Err(ServerError::Bind { .. })));
        assert_eq!(second.state(), ServerState::Idle);

        first.stop().await;
    }

    #[tokio::test]
    async fn test_embedding_api() {
        let server = Server::new(config().with_databases(4));

        server
            .set(2, "greeting", Entry::string("hello"))
            .unwrap();
        assert_eq!(
            server.get(2, b"greeting").unwrap(),
            Some(Entry::string("hello"))
        );
        assert!(server.get(0, b"greeting").unwrap().is_none());

        server.flush_db(2).unwrap();
        assert!(server.get(2, b"greeting").unwrap().is_none());

        assert!(matches!(server.database(4), Err(ServerError::InvalidDatabase(4))));
        assert!(matches!(
            server.set(9, "k", Entry::string(Bytes::from("v"))),
            Err(ServerError::InvalidDatabase(9))
        ));
    }

    #[tokio::test]
    async fn test_embedded_writes_visible_over_the_wire() {
        let server = Server::new(config());
        server.set(0, "k", Entry::string(Bytes::from("v"))).unwrap();
        let addr = server.start().await.unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let reply = roundtrip(&mut stream, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").await;
        assert_eq!(reply, RespValue::bulk_string(Bytes::from("v")));

        server.flush_all();
        let reply = roundtrip(&mut stream, b"*1\r\n$6\r\nDBSIZE\r\n").await;
        assert_eq!(reply, RespValue::integer(0));

        server.stop().await;
    }
}
