use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// One device seen during discovery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Advertisement {
    pub name: Option<String>,
    pub address: String,
}

/// Discovery and session establishment for one kind of link.
#[async_trait]
pub trait Transport: Send + Sync {
    type Session: Session;

    /// Collect advertisements for at most `window`.
    async fn scan(&self, window: Duration) -> Result<Vec<Advertisement>, TransportError>;

    async fn connect(&self, address: &str) -> Result<Self::Session, TransportError>;
}

/// An open connection to one producer.
#[async_trait]
pub trait Session: Send + Sync {
    fn address(&self) -> &str;

    /// Enable notifications. Every received chunk is delivered on the returned channel.
    async fn subscribe(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, TransportError>;

    /// Resolves once the remote side has gone away: `Ok` for an orderly
    /// close, `Err` when the link was lost. Must be cancel-safe.
    async fn wait_disconnect(&self) -> Result<(), TransportError>;

    async fn unsubscribe(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Runs a cleanup closure on drop unless disarmed. Holds half-open links
/// while a connect future is still in flight, so a timeout or shutdown that
/// drops the future does not leak the link.
pub struct CloseGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> CloseGuard<F> {
    pub fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    /// The link has a new owner.
    pub fn disarm(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for CloseGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce()) {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = count.clone();
        (count, move || {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_guard_runs_cleanup_on_drop() {
        let (count, cleanup) = counter();
        drop(CloseGuard::new(cleanup));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disarmed_guard_keeps_link() {
        let (count, cleanup) = counter();
        CloseGuard::new(cleanup).disarm();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_connect_future_closes_link() {
        let (count, cleanup) = counter();
        let connecting = async move {
            let guard = CloseGuard::new(cleanup);
            // service discovery that never finishes
            std::future::pending::<()>().await;
            guard.disarm();
        };
        let timed_out = tokio::time::timeout(Duration::from_secs(10), connecting).await;
        assert!(timed_out.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
