use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// One-shot broadcast fired for every RING the modem reports.
///
/// A pulse wakes every task that is waiting at that moment, exactly once.
/// It is not queued: a task that starts waiting after the pulse misses it.
#[derive(Clone, Default)]
pub struct RingSignal {
    notify: Arc<Notify>
}
impl RingSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pulse(&self) {
        self.notify.notify_waiters();
    }

    /// Waits for the next pulse. Returns false if none arrived in time.
    pub async fn wait(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.notify.notified()).await.is_ok()
    }
}
