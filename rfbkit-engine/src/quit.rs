//! The per-connection quit signal.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A latched, idempotent shutdown signal shared by both session tasks.
///
/// Raising it a second time is a no-op; [`raise`](Self::raise) reports
/// whether this call was the one that tripped it, which is what lets the
/// session report a fatal error exactly once.
#[derive(Debug, Default)]
pub struct QuitSignal {
    raised: AtomicBool,
    notify: Notify,
}

impl QuitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Returns true only for the call that actually
    /// transitioned it.
    pub fn raise(&self) -> bool {
        let first = !self.raised.swap(true, Ordering::SeqCst);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Wait until the signal is raised. Returns immediately if it already
    /// was.
    pub async fn wait(&self) {
        if self.is_raised() {
            return;
        }
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before re-checking so a concurrent raise cannot slip
        // between the check and the await.
        notified.as_mut().enable();
        if self.is_raised() {
            return;
        }
        notified.await;
    }
}
