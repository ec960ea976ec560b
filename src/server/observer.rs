//! Lifecycle and command observers.
//!
//! Observers are called synchronously on the task that raised the event:
//! the listener for start/stop, the session for each command. A failing or
//! panicking observer is logged and skipped; the others still run and the
//! command still executes.

use crate::commands::Command;
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, warn};

pub type ObserverResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receives server events. Every method defaults to doing nothing.
pub trait ServerObserver: Send + Sync {
    /// The server is bound to `port` and about to accept connections.
    fn server_starting(&self, _port: u16) -> ObserverResult {
        Ok(())
    }

    fn server_stopped(&self) -> ObserverResult {
        Ok(())
    }

    /// A request was decoded on database `db` and is about to execute.
    fn command_received(&self, _db: usize, _command: &Command) -> ObserverResult {
        Ok(())
    }
}

/// The registered observers of one server.
#[derive(Default)]
pub struct Observers {
    list: RwLock<Vec<Arc<dyn ServerObserver>>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Arc<dyn ServerObserver>) {
        self.list.write().push(observer);
    }

    /// Unregisters `observer` (matched by identity). Returns whether it was
    /// registered.
    pub fn remove<O: ServerObserver + ?Sized>(&self, observer: &Arc<O>) -> bool {
        let target = Arc::as_ptr(observer) as *const ();
        let mut list = self.list.write();
        let before = list.len();
        list.retain(|o| Arc::as_ptr(o) as *const () != target);
        list.len() != before
    }

    pub fn len(&self) -> usize {
        self.list.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }

    pub fn server_starting(&self, port: u16) {
        self.notify("server_starting", |o| o.server_starting(port));
    }

    pub fn server_stopped(&self) {
        self.notify("server_stopped", |o| o.server_stopped());
    }

    pub fn command_received(&self, db: usize, command: &Command) {
        self.notify("command_received", |o| o.command_received(db, command));
    }

    fn notify<F>(&self, event: &'static str, call: F)
    where
        F: Fn(&dyn ServerObserver) -> ObserverResult,
    {
        // Iterate a copy so an observer may add or remove observers.
        let observers: Vec<_> = self.list.read().clone();

        for observer in observers {
            match panic::catch_unwind(AssertUnwindSafe(|| call(observer.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(event, error = %e, "observer failed"),
                Err(_) => error!(event, "observer panicked"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Log {
        events: Mutex<Vec<String>>,
    }

    impl ServerObserver for Log {
        fn server_starting(&self, port: u16) -> ObserverResult {
            self.events.lock().push(format!("starting {}", port));
            Ok(())
        }

        fn server_stopped(&self) -> ObserverResult {
            self.events.lock().push("stopped".to_string());
            Ok(())
        }

        fn command_received(&self, db: usize, command: &Command) -> ObserverResult {
            self.events.lock().push(format!("{} on {}", command.name, db));
            Ok(())
        }
    }

    struct Failing;

    impl ServerObserver for Failing {
        fn server_starting(&self, _port: u16) -> ObserverResult {
            Err("refused".into())
        }

        fn command_received(&self, _db: usize, _command: &Command) -> ObserverResult {
            panic!("observer bug");
        }
    }

    #[test]
    fn test_events_reach_every_observer() {
        let observers = Observers::new();
        let first = Arc::new(Log::default());
        let second = Arc::new(Log::default());
        observers.add(first.clone());
        observers.add(second.clone());

        observers.server_starting(7000);
        observers.command_received(2, &Command::new("get", vec![]));
        observers.server_stopped();

        let expected = vec!["starting 7000", "GET on 2", "stopped"];
        assert_eq!(*first.events.lock(), expected);
        assert_eq!(*second.events.lock(), expected);
    }

    #[test]
    fn test_failures_are_isolated() {
        let observers = Observers::new();
        let log = Arc::new(Log::default());
        observers.add(Arc::new(Failing));
        observers.add(log.clone());

        observers.server_starting(1);
        observers.command_received(0, &Command::new("PING", vec![]));

        assert_eq!(*log.events.lock(), vec!["starting 1", "PING on 0"]);
    }

    #[test]
    fn test_remove_by_identity() {
        let observers = Observers::new();
        let kept = Arc::new(Log::default());
        let removed = Arc::new(Log::default());
        observers.add(kept.clone());
        observers.add(removed.clone());

        assert!(observers.remove(&removed));
        assert!(!observers.remove(&removed));
        assert_eq!(observers.len(), 1);

        observers.server_stopped();
        assert_eq!(kept.events.lock().len(), 1);
        assert!(removed.events.lock().is_empty());
    }
}
