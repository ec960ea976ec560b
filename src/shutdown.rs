//! Server-wide stop signal.
//!
//! The server owns a `watch::Sender<bool>`; every session, blocking pop and
//! the accept loop holds a [`Shutdown`] built from a receiver of it. Setting
//! the value to `true` wakes all of them at once.

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Shutdown {
    notify: Option<watch::Receiver<bool>>,
}

impl Shutdown {
    pub fn new(notify: watch::Receiver<bool>) -> Self {
        Self {
            notify: Some(notify),
        }
    }

    /// A signal that never fires. Used when a handler runs outside a server.
    pub fn never() -> Self {
        Self { notify: None }
    }

    pub fn is_shutdown(&self) -> bool {
        self.notify.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Waits until the stop flag is set. A dropped sender counts as a stop.
    pub async fn recv(&mut self) {
        let rx = match self.notify.as_mut() {
            Some(rx) => rx,
            None => return std::future::pending().await,
        };

        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
