//! Cancellation of running pipelines
//!
//! A latched signal: once triggered, every current and future waiter
//! observes it.

use std::sync::Arc;
use tokio::sync::watch;

/// Shutdown signal shared by the façade and the pipelines it starts
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Create a new, untriggered signal
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Trigger shutdown
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once shutdown has been triggered
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // Err means the sender is gone, which cannot happen while `self` lives
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_signal() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();

        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            42
        });

        signal.shutdown();
        assert_eq!(handle.await.unwrap(), 42);
        assert!(signal.is_shutdown());
    }

    #[tokio::test]
    async fn test_late_waiter_sees_shutdown() {
        let signal = ShutdownSignal::new();
        signal.shutdown();
        signal.cancelled().await;
    }
}
