use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

/// Broadcast-based cooperative stop signal.
///
/// Components subscribe and `select!` on the returned receiver alongside
/// their work loop; the signal is observed between timer firings and during
/// the loop's sleep, never mid-unit.
///
/// ```ignore
/// let stop = StopSignal::new();
/// let mut rx = stop.subscribe();
/// tokio::select! {
///     _ = rx.recv() => { /* graceful cleanup */ }
///     _ = do_work() => {}
/// }
/// ```
#[derive(Debug, Clone)]
pub struct StopSignal {
    trigger: broadcast::Sender<()>,
    stopping: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (trigger, _) = broadcast::channel(1);
        Self {
            trigger,
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to the stop signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.trigger.subscribe()
    }

    /// Check whether stop has been requested (non-blocking).
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Relaxed)
    }

    /// Request stop. Idempotent.
    pub fn trigger(&self) {
        if self
            .stopping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            info!("stop signal triggered");
            let _ = self.trigger.send(());
        } else {
            warn!("stop already triggered");
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn new_signal_is_not_stopping() {
        let signal = StopSignal::new();
        assert!(!signal.is_stopping());
    }

    #[test]
    fn trigger_sets_flag_and_is_idempotent() {
        let signal = StopSignal::new();
        signal.trigger();
        signal.trigger(); // no panic
        assert!(signal.is_stopping());
    }

    #[test]
    fn clone_shares_state() {
        let signal = StopSignal::new();
        let clone = signal.clone();
        signal.trigger();
        assert!(clone.is_stopping());
    }

    #[tokio::test]
    async fn subscriber_receives_trigger() {
        let signal = StopSignal::new();
        let mut rx = signal.subscribe();
        signal.trigger();
        let received = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(received.is_ok());
    }
}
