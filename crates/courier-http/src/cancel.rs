//! Cooperative cancellation for in-flight calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Cancels a call. Cloned tokens share state.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    /// Create a token and the watcher handed to the transport.
    pub fn new() -> (Self, CancellationWatcher) {
        let (tx, rx) = watch::channel(false);
        let cancelled = Arc::new(AtomicBool::new(false));

        let token = Self {
            cancelled: cancelled.clone(),
            notify: Arc::new(tx),
        };

        let watcher = CancellationWatcher {
            cancelled,
            notify: rx,
        };

        (token, watcher)
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let _ = self.notify.send(true);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Another watcher on the same token.
    pub fn watcher(&self) -> CancellationWatcher {
        CancellationWatcher {
            cancelled: self.cancelled.clone(),
            notify: self.notify.subscribe(),
        }
    }
}

/// Observes a [`CancellationToken`].
#[derive(Clone, Debug)]
pub struct CancellationWatcher {
    cancelled: Arc<AtomicBool>,
    notify: watch::Receiver<bool>,
}

impl CancellationWatcher {
    /// Whether the token has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is requested.
    ///
    /// Never resolves if every token is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        while !*self.notify.borrow() {
            if self.notify.changed().await.is_err() {
                if self.is_cancelled() {
                    return;
                }
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout, Duration};

    #[tokio::test]
    async fn test_cancellation_token() {
        let (token, watcher) = CancellationToken::new();

        assert!(!token.is_cancelled());
        assert!(!watcher.is_cancelled());

        token.cancel();
        token.cancel();

        assert!(token.is_cancelled());
        assert!(watcher.is_cancelled());
        assert!(token.watcher().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancellation_wait() {
        let (token, mut watcher) = CancellationToken::new();

        let handle = tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        watcher.cancelled().await;
        assert!(watcher.is_cancelled());

        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_token_never_cancels() {
        let (token, mut watcher) = CancellationToken::new();
        drop(token);

        let waited = timeout(Duration::from_secs(60), watcher.cancelled()).await;
        assert!(waited.is_err());
        assert!(!watcher.is_cancelled());
    }
}
