//! Cooperative shutdown signaling
//!
//! A shared boolean flag set asynchronously (typically from an OS signal
//! handler) and polled by the consumer loop. Cancellation never interrupts
//! an in-flight store call or a partially dispatched batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared shutdown flag checked by the feed loop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Create a new, unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check whether shutdown was requested.
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Spawn a task that requests shutdown on Ctrl-C / SIGINT.
    pub fn listen_for_ctrl_c(&self) {
        let signal = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested via SIGINT");
                signal.request();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_starts_unset() {
        assert!(!ShutdownSignal::new().is_requested());
    }

    #[test]
    fn test_request_is_visible_to_clones() {
        let signal = ShutdownSignal::new();
        let observer = signal.clone();

        signal.request();
        assert!(observer.is_requested());

        // Idempotent
        signal.request();
        assert!(observer.is_requested());
    }
}
