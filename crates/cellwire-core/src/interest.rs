//! Demand tracking for data producers.
//!
//! A producer that is expensive to run (a spectrum analyzer, a scanner)
//! attaches an [`InterestTracker`] to its cells and only does work while at
//! least one subscription exists. The tracker flips to interested on the
//! first subscription and back on the last cancellation; producers either
//! poll [`InterestTracker::is_interested`] or await the watch channel.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::trace;

use crate::sync::lock;

#[derive(Debug)]
struct InterestInner {
    count: Mutex<usize>,
    interested: watch::Sender<bool>,
}

/// Counts subscriptions and publishes whether any exist.
#[derive(Debug, Clone)]
pub struct InterestTracker {
    inner: Arc<InterestInner>,
}

impl InterestTracker {
    pub fn new() -> Self {
        let (interested, _) = watch::channel(false);
        Self {
            inner: Arc::new(InterestInner {
                count: Mutex::new(0),
                interested,
            }),
        }
    }

    pub fn is_interested(&self) -> bool {
        *self.inner.interested.borrow()
    }

    /// Number of live subscriptions holding interest.
    pub fn count(&self) -> usize {
        *lock(&self.inner.count)
    }

    /// Receiver that observes every change of interest.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.inner.interested.subscribe()
    }

    /// Wait until at least one subscription exists.
    pub async fn interested(&self) {
        let mut rx = self.watch();
        // The sender lives as long as `self`, so this cannot observe a close.
        let _ = rx.wait_for(|interested| *interested).await;
    }

    /// Register one subscription; interest is held until the guard drops.
    pub fn acquire(&self) -> InterestGuard {
        let mut count = lock(&self.inner.count);
        *count += 1;
        if *count == 1 {
            trace!("interest acquired");
            self.inner.interested.send_replace(true);
        }
        InterestGuard {
            tracker: self.clone(),
        }
    }

    fn release(&self) {
        let mut count = lock(&self.inner.count);
        *count = count.saturating_sub(1);
        if *count == 0 {
            trace!("interest released");
            self.inner.interested.send_replace(false);
        }
    }
}

impl Default for InterestTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds one unit of interest; releases it on drop.
#[derive(Debug)]
pub struct InterestGuard {
    tracker: InterestTracker,
}

impl Drop for InterestGuard {
    fn drop(&mut self) {
        self.tracker.release();
    }
}
