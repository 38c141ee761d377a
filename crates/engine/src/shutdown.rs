//! Cooperative shutdown signalling for drivers and the recovery scanner.

use std::sync::Arc;

use tokio::sync::watch;

/// Create a linked shutdown handle and signal.
///
/// Clone the signal into every task that should stop; call
/// [`ShutdownHandle::shutdown`] once to stop them all.
pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (
        ShutdownHandle { tx },
        ShutdownSignal {
            rx,
            _keep_alive: None,
        },
    )
}

/// Sending half: flips the signal for every listener.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Signal shutdown to all listeners.
    pub fn shutdown(&self) {
        // Receivers may all be gone already; that is not an error.
        let _ = self.tx.send(true);
    }
}

/// Receiving half: checked between loop iterations, awaited by
/// long-running tasks.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
    // Held only so a never() signal's sender outlives every clone.
    _keep_alive: Option<Arc<watch::Sender<bool>>>,
}

impl ShutdownSignal {
    /// A signal that never fires. For callers with no shutdown story,
    /// such as one-shot drives.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keep_alive: Some(Arc::new(tx)),
        }
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is signalled.
    ///
    /// Also resolves if the handle is dropped, so a task never waits on a
    /// sender that can no longer speak.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
