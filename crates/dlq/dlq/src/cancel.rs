//! Cancellation signal for long-running DLQ operations.

use std::time::Duration;
use tokio::sync::watch;

/// Creates a linked cancel handle and signal.
pub fn cancellation() -> (CancelHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, Cancellation { rx })
}

/// Triggers cancellation for every clone of its [`Cancellation`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signals cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes a cancellation request.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    /// A signal that fires once `timeout` has elapsed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_timeout(timeout: Duration) -> Self {
        let (handle, signal) = cancellation();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            handle.cancel();
        });
        signal
    }

    /// Checks whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; never resolves if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}
