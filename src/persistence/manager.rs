//! Periodic and on-demand snapshots of every database.
//!
//! ```text
//!   Idle ──start()──> Running ──stop()──> Stopped
//!                        │
//!                        └── every `interval`: snapshot all databases
//! ```
//!
//! SAVE and server stop call [`PersistenceManager::snapshot_all`] directly.
//! All snapshot paths share one lock, so a SAVE and a timer tick never write
//! the same temporary file at once.

use crate::persistence::snapshot::{read_snapshot, snapshot_path, write_snapshot, PersistenceResult};
use crate::storage::Databases;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default period between background snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceState {
    Idle,
    Running,
    Stopped,
}

/// Writes every database to one directory, one at a time.
#[derive(Debug)]
struct Snapshotter {
    databases: Arc<Databases>,
    dir: PathBuf,
    lock: Mutex<()>,
}

impl Snapshotter {
    /// Snapshots each created database. A failure is logged and the
    /// remaining databases are still written; the first error is returned.
    fn snapshot_all(&self) -> PersistenceResult<usize> {
        let _guard = self.lock.lock();
        let mut total = 0;
        let mut first_error = None;

        for db in self.databases.all() {
            match write_snapshot(&db, &self.dir) {
                Ok(entries) => total += entries,
                Err(e) => {
                    error!(db = db.index(), dir = %self.dir.display(), error = %e, "snapshot failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }
}

pub struct PersistenceManager {
    databases: Arc<Databases>,
    snapshotter: Option<Arc<Snapshotter>>,
    interval: Duration,
    state: Mutex<PersistenceState>,
    shutdown_tx: watch::Sender<bool>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceManager {
    /// `dir == None` disables persistence: loads find nothing and snapshots
    /// write nothing.
    pub fn new(databases: Arc<Databases>, dir: Option<PathBuf>, interval: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let snapshotter = dir.map(|dir| {
            Arc::new(Snapshotter {
                databases: Arc::clone(&databases),
                dir,
                lock: Mutex::new(()),
            })
        });

        Self {
            databases,
            snapshotter,
            interval,
            state: Mutex::new(PersistenceState::Idle),
            shutdown_tx,
            timer: Mutex::new(None),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.snapshotter.as_ref().map(|s| s.dir.as_path())
    }

    pub fn is_enabled(&self) -> bool {
        self.snapshotter.is_some()
    }

    pub fn state(&self) -> PersistenceState {
        *self.state.lock()
    }

    /// Loads every `db<index>.snapshot` found in the directory. Missing files
    /// are skipped; unreadable ones leave that database empty. Returns the
    /// number of databases restored.
    pub fn load_all(&self) -> usize {
        let dir = match self.dir() {
            Some(dir) => dir,
            None => return 0,
        };

        let mut loaded = 0;
        for index in 0..self.databases.count() {
            let path = snapshot_path(dir, index);
            if !path.exists() {
                continue;
            }

            let db = match self.databases.get_or_create(index) {
                Some(db) => db,
                None => continue,
            };

            match read_snapshot(&path) {
                Ok(keyspace) => {
                    info!(db = index, keys = keyspace.len(), path = %path.display(), "snapshot loaded");
                    db.replace(keyspace);
                    loaded += 1;
                }
                Err(e) => {
                    warn!(db = index, path = %path.display(), error = %e, "could not load snapshot, starting empty");
                    db.clear();
                }
            }
        }
        loaded
    }

    /// Writes every database now. Returns the number of entries written.
    pub fn snapshot_all(&self) -> PersistenceResult<usize> {
        match &self.snapshotter {
            Some(snapshotter) => snapshotter.snapshot_all(),
            None => Ok(0),
        }
    }

    /// [`snapshot_all`](Self::snapshot_all) on the blocking pool.
    pub async fn snapshot_all_blocking(&self) -> PersistenceResult<usize> {
        let snapshotter = match &self.snapshotter {
            Some(snapshotter) => Arc::clone(snapshotter),
            None => return Ok(0),
        };

        match tokio::task::spawn_blocking(move || snapshotter.snapshot_all()).await {
            Ok(result) => result,
            Err(e) => Err(std::io::Error::other(e).into()),
        }
    }

    /// Starts the background timer. Does nothing unless idle and enabled.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if *state != PersistenceState::Idle {
            return;
        }
        *state = PersistenceState::Running;

        if let Some(snapshotter) = &self.snapshotter {
            let handle = tokio::spawn(snapshot_loop(
                Arc::clone(snapshotter),
                self.interval,
                self.shutdown_tx.subscribe(),
            ));
            *self.timer.lock() = Some(handle);
            info!(
                dir = %snapshotter.dir.display(),
                interval_secs = self.interval.as_secs(),
                "background snapshots started"
            );
        }
    }

    /// Stops the timer and writes a final snapshot.
    pub async fn stop(&self) -> PersistenceResult<usize> {
        {
            let mut state = self.state.lock();
            if *state == PersistenceState::Stopped {
                return Ok(0);
            }
            *state = PersistenceState::Stopped;
        }

        self.shutdown_tx.send_replace(true);
        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            let _ = timer.await;
        }

        let written = self.snapshot_all_blocking().await?;
        if self.is_enabled() {
            info!(entries = written, "final snapshot written");
        }
        Ok(written)
    }
}

async fn snapshot_loop(
    snapshotter: Arc<Snapshotter>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("snapshot timer received shutdown signal");
                    return;
                }
            }
        }

        let task = Arc::clone(&snapshotter);
        match tokio::task::spawn_blocking(move || task.snapshot_all()).await {
            Ok(Ok(entries)) => debug!(entries, "periodic snapshot written"),
            Ok(Err(e)) => error!(error = %e, "periodic snapshot failed"),
            Err(e) => error!(error = %e, "snapshot task panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::fs;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn temp_dir() -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("standin_manager_{}_{}", std::process::id(), n))
    }

    fn set(databases: &Databases, index: usize, key: &str, value: &str) {
        databases
            .get_or_create(index)
            .unwrap()
            .lock()
            .set_string(Bytes::from(key.to_string()), Bytes::from(value.to_string()));
    }

    fn manager(databases: &Arc<Databases>, dir: &Path) -> PersistenceManager {
        PersistenceManager::new(
            Arc::clone(databases),
            Some(dir.to_path_buf()),
            DEFAULT_SNAPSHOT_INTERVAL,
        )
    }

    #[test]
    fn test_disabled_manager() {
        let databases = Arc::new(Databases::default());
        set(&databases, 0, "k", "v");
        let manager = PersistenceManager::new(databases, None, DEFAULT_SNAPSHOT_INTERVAL);
        assert!(!manager.is_enabled());
        assert_eq!(manager.snapshot_all().unwrap(), 0);
        assert_eq!(manager.load_all(), 0);
    }

    #[test]
    fn test_snapshot_and_reload() {
        let dir = temp_dir();
        let databases = Arc::new(Databases::default());
        set(&databases, 0, "a", "1");
        set(&databases, 3, "b", "2");
        assert_eq!(manager(&databases, &dir).snapshot_all().unwrap(), 2);

        let restored = Arc::new(Databases::default());
        assert_eq!(manager(&restored, &dir).load_all(), 2);
        assert_eq!(
            restored.existing(3).unwrap().lock().get_string(b"b"),
            Ok(Some(Bytes::from("2")))
        );
        assert!(restored.existing(1).is_none());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = temp_dir();
        fs::create_dir_all(&dir).unwrap();
        fs::write(snapshot_path(&dir, 0), b"$3\r\nkey\r\n:-1\r\n$10\r\nshort").unwrap();

        let databases = Arc::new(Databases::default());
        set(&databases, 1, "fine", "yes");
        manager(&databases, &dir).snapshot_all().unwrap();

        let restored = Arc::new(Databases::default());
        assert_eq!(manager(&restored, &dir).load_all(), 1);
        assert!(restored.existing(0).unwrap().is_empty());
        assert_eq!(restored.existing(1).unwrap().len(), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_timer_writes_snapshots() {
        let dir = temp_dir();
        let databases = Arc::new(Databases::default());
        set(&databases, 0, "k", "v");

        let manager = PersistenceManager::new(
            Arc::clone(&databases),
            Some(dir.clone()),
            Duration::from_millis(20),
        );
        assert_eq!(manager.state(), PersistenceState::Idle);
        manager.start();
        assert_eq!(manager.state(), PersistenceState::Running);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(snapshot_path(&dir, 0).exists());

        manager.stop().await.unwrap();
        assert_eq!(manager.state(), PersistenceState::Stopped);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_stop_writes_final_snapshot() {
        let dir = temp_dir();
        let databases = Arc::new(Databases::default());
        let manager = manager(&databases, &dir);
        manager.start();

        set(&databases, 2, "late", "write");
        assert_eq!(manager.stop().await.unwrap(), 1);

        let loaded = read_snapshot(&snapshot_path(&dir, 2)).unwrap();
        assert_eq!(loaded.get_string(b"late"), Ok(Some(Bytes::from("write"))));

        // A second stop is a no-op.
        assert_eq!(manager.stop().await.unwrap(), 0);

        let _ = fs::remove_dir_all(&dir);
    }
}
