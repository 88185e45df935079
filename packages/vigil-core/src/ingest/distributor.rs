//! In-process last-value-wins frame multicast.
//!
//! The distributor holds at most one frame: a new publish atomically
//! replaces an unread one and wakes all subscribers. Each subscriber
//! observes a monotonic (possibly sparser) subsequence of sequence numbers;
//! lossiness is intentional so the live path never backpressures the reader.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::frame::Frame;

/// Last-value-wins broadcaster for decoded frames.
pub struct FrameDistributor {
    tx: watch::Sender<Option<Arc<Frame>>>,
}

impl FrameDistributor {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Atomically replaces the slot and wakes all subscribers.
    pub fn publish(&self, frame: Frame) {
        // send_replace never fails even with zero subscribers.
        self.tx.send_replace(Some(Arc::new(frame)));
    }

    /// Snapshot of the current slot. Empty during the first moments of a
    /// session, before the reader has produced anything.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.tx.borrow().clone()
    }

    /// Registers a new subscriber. Dropping the returned handle
    /// unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> FrameSubscription {
        FrameSubscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for FrameDistributor {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber's lossy single-slot mailbox.
pub struct FrameSubscription {
    rx: watch::Receiver<Option<Arc<Frame>>>,
}

impl FrameSubscription {
    /// Waits for the next unseen frame. Returns `None` when the distributor
    /// has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<Frame>> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }

    /// Waits for the next unseen frame, up to `timeout`. Returns `None` on
    /// timeout or when the distributor has been dropped.
    pub async fn next(&mut self, timeout: Duration) -> Option<Arc<Frame>> {
        tokio::time::timeout(timeout, self.changed()).await.ok()?
    }
}
