//! Stop flag and drain tracking.
//!
//! [`Stopper`] is the process-wide stop flag every worker and the monitor
//! select on. [`ActivityTracker`] counts workers that are outside their
//! accept wait; the server has drained when the count is zero.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::watch;

/// Level-triggered stop flag.
///
/// Waiters that subscribe after [`Stopper::stop`] return immediately.
#[derive(Debug, Clone)]
pub struct Stopper {
    tx: Arc<watch::Sender<bool>>,
}

impl Stopper {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Resolve once the flag is set.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for Stopper {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts active workers.
#[derive(Debug, Default)]
pub struct ActivityTracker {
    active: AtomicUsize,
}

impl ActivityTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark the caller active until the guard drops.
    pub fn enter(self: &Arc<Self>) -> ActiveGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ActiveGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// True when no worker is mid-request.
    pub fn is_quiescent(&self) -> bool {
        self.active() == 0
    }

    /// Poll every `interval` until quiescent.
    pub async fn wait_quiescent(&self, interval: Duration) {
        while !self.is_quiescent() {
            tokio::time::sleep(interval).await;
        }
    }
}

/// Releases one unit of activity on drop.
#[derive(Debug)]
pub struct ActiveGuard {
    tracker: Arc<ActivityTracker>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stopper_wakes_waiters() {
        let stopper = Stopper::new();
        assert!(!stopper.is_stopped());

        let waiter = {
            let stopper = stopper.clone();
            tokio::spawn(async move { stopper.stopped().await })
        };
        tokio::task::yield_now().await;
        stopper.stop();
        waiter.await.unwrap();
        assert!(stopper.is_stopped());
    }

    #[tokio::test]
    async fn test_late_waiter_returns_immediately() {
        let stopper = Stopper::new();
        stopper.stop();
        tokio::time::timeout(Duration::from_millis(100), stopper.stopped())
            .await
            .unwrap();
    }

    #[test]
    fn test_tracker_counts_guards() {
        let tracker = ActivityTracker::new();
        assert!(tracker.is_quiescent());
        let a = tracker.enter();
        let b = tracker.enter();
        assert_eq!(tracker.active(), 2);
        drop(a);
        assert!(!tracker.is_quiescent());
        drop(b);
        assert!(tracker.is_quiescent());
    }

    #[tokio::test]
    async fn test_wait_quiescent_blocks_until_release() {
        let tracker = ActivityTracker::new();
        let guard = tracker.enter();

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait_quiescent(Duration::from_millis(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
