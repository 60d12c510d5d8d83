use std::sync::Arc;
use tokio::sync::watch;

/// A one-shot readiness signal.
///
/// Once fired, it remains fired for the lifetime of the process. Clones observe the same signal.
#[derive(Clone, Debug)]
pub struct Readiness(Arc<watch::Sender<bool>>);

// === impl Readiness ===

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

impl Readiness {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self(Arc::new(tx))
    }

    /// Fires the signal. Returns `true` only for the call that fired it.
    pub fn fire(&self) -> bool {
        self.0.send_if_modified(|fired| {
            if *fired {
                return false;
            }
            *fired = true;
            true
        })
    }

    pub fn is_fired(&self) -> bool {
        *self.0.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.0.subscribe()
    }

    /// Waits until the signal fires. Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.0.subscribe();
        // The sender is held by `self`, so the channel cannot close while waiting.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}
