//! Change callbacks, subscription handles and push-style fan-out.
//!
//! # Invariants
//!
//! 1. A cancelled subscription never receives another callback.
//! 2. Callbacks run outside every internal lock, so a callback may read
//!    cells or even cancel subscriptions without deadlocking.
//! 3. Dropping a [`Subscription`] cancels it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::interest::{InterestGuard, InterestTracker};
use crate::sync::lock;
use crate::value::CellValue;

/// One binary payload pushed by a bulk-data cell.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkChunk {
    /// Scalar header values, one per info format code.
    pub info: Vec<f64>,
    /// Raw array bytes laid out per the array format.
    pub data: Arc<[u8]>,
}

impl BulkChunk {
    pub fn new(info: Vec<f64>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            info,
            data: data.into(),
        }
    }
}

/// What a subscriber is told.
#[derive(Debug, Clone, PartialEq)]
pub enum CellEvent {
    /// The cell now holds a different value or object.
    Changed(CellValue),
    /// A bulk-data cell produced a chunk.
    Chunk(BulkChunk),
    /// Items were appended to an append-log cell.
    Appended(Vec<Value>),
}

pub type Callback = Arc<dyn Fn(CellEvent) + Send + Sync>;

/// Wrap a closure as a [`Callback`].
pub fn callback(f: impl Fn(CellEvent) + Send + Sync + 'static) -> Callback {
    Arc::new(f)
}

/// Handle to an active subscription.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription that will never deliver anything.
    pub fn inert() -> Self {
        Self { cancel: None }
    }

    pub fn is_inert(&self) -> bool {
        self.cancel.is_none()
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

struct Subscriber {
    callback: Callback,
    _interest: Option<InterestGuard>,
}

#[derive(Default)]
struct NotifierState {
    next_id: u64,
    subscribers: BTreeMap<u64, Subscriber>,
}

/// Fan-out list for cells that change when written rather than when polled.
#[derive(Clone, Default)]
pub struct Notifier {
    state: Arc<Mutex<NotifierState>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: Callback, interest: Option<&InterestTracker>) -> Subscription {
        let guard = interest.map(InterestTracker::acquire);
        let id = {
            let mut state = lock(&self.state);
            let id = state.next_id;
            state.next_id += 1;
            state.subscribers.insert(
                id,
                Subscriber {
                    callback,
                    _interest: guard,
                },
            );
            id
        };
        let weak = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                let removed = lock(&state).subscribers.remove(&id);
                drop(removed);
            }
        })
    }

    /// Deliver `event` to every current subscriber.
    pub fn notify(&self, event: &CellEvent) {
        let callbacks: Vec<Callback> = lock(&self.state)
            .subscribers
            .values()
            .map(|s| Arc::clone(&s.callback))
            .collect();
        for callback in callbacks {
            callback(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).subscribers.len()
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
