//! Shared periodic sampler for cells without change notifications.
//!
//! Cells backed by a getter cannot announce changes, so subscribers are
//! registered here instead. On every tick of a cadence each registered
//! source is sampled exactly once, however many subscribers it has, and the
//! new value is fanned out to all of them when it differs from the last one
//! delivered.
//!
//! # Invariants
//!
//! 1. A source's getter runs at most once per tick of its cadence.
//! 2. Subscribers are only called when the sampled value changed.
//! 3. Callbacks run after the poller's lock is released.
//! 4. A getter that starts failing is logged once and then stays silent
//!    until it recovers; recovery is only reported if the value differs
//!    from the last good one.
//! 5. A cadence's timer runs only while that cadence has subscribers.

use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::CellError;
use crate::interest::{InterestGuard, InterestTracker};
use crate::subscription::{Callback, CellEvent, Subscription};
use crate::sync::lock;
use crate::value::{CellValue, SourceId};

/// How often a source is sampled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// Display-rate sampling for values users watch change.
    #[default]
    Fast,
    /// Background sampling for slowly varying state.
    Slow,
}

impl Cadence {
    pub const ALL: [Cadence; 2] = [Cadence::Fast, Cadence::Slow];

    fn index(self) -> usize {
        match self {
            Self::Fast => 0,
            Self::Slow => 1,
        }
    }
}

/// Tick periods for each cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub fast_interval: Duration,
    pub slow_interval: Duration,
}

impl PollerConfig {
    pub fn interval(&self, cadence: Cadence) -> Duration {
        match cadence {
            Cadence::Fast => self.fast_interval,
            Cadence::Slow => self.slow_interval,
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            fast_interval: Duration::from_micros(16_667),
            slow_interval: Duration::from_millis(500),
        }
    }
}

pub type PollGetter = Arc<dyn Fn() -> Result<CellValue, CellError> + Send + Sync>;

/// A source to sample, identified so that duplicate subscriptions share
/// one sampling.
#[derive(Clone)]
pub struct PollTarget {
    pub id: SourceId,
    pub getter: PollGetter,
    pub interest: Option<InterestTracker>,
}

impl PollTarget {
    pub fn new(id: SourceId, getter: PollGetter) -> Self {
        Self {
            id,
            getter,
            interest: None,
        }
    }

    #[must_use]
    pub fn with_interest(mut self, interest: Option<InterestTracker>) -> Self {
        self.interest = interest;
        self
    }
}

impl fmt::Debug for PollTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollTarget").field("id", &self.id).finish_non_exhaustive()
    }
}

enum Sample {
    Good(CellValue),
    Broken { last_good: Option<CellValue> },
}

struct Subscriber {
    callback: Callback,
    _interest: Option<InterestGuard>,
}

struct TargetEntry {
    getter: PollGetter,
    interest: Option<InterestTracker>,
    sample: Sample,
    subscribers: BTreeMap<u64, Subscriber>,
}

#[derive(Default)]
struct PollerState {
    tables: [BTreeMap<SourceId, TargetEntry>; 2],
    counts: [usize; 2],
    timers: [Option<JoinHandle<()>>; 2],
    next_subscriber: u64,
    stopped: bool,
}

struct PollerShared {
    config: PollerConfig,
    runtime: Option<Handle>,
    state: Mutex<PollerState>,
}

impl Drop for PollerShared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(std::sync::PoisonError::into_inner);
        for timer in state.timers.iter_mut().filter_map(Option::take) {
            timer.abort();
        }
    }
}

/// Periodic sampler shared by every connection in a process.
#[derive(Clone)]
pub struct Poller {
    shared: Arc<PollerShared>,
}

impl Poller {
    /// A poller without timers; callers drive it with [`Poller::tick`].
    pub fn manual(config: PollerConfig) -> Self {
        Self::build(config, None)
    }

    /// A poller whose cadences tick on `runtime` while they have subscribers.
    pub fn with_runtime(config: PollerConfig, runtime: Handle) -> Self {
        Self::build(config, Some(runtime))
    }

    /// Use the ambient tokio runtime if there is one, otherwise run manually.
    pub fn current(config: PollerConfig) -> Self {
        Self::build(config, Handle::try_current().ok())
    }

    fn build(config: PollerConfig, runtime: Option<Handle>) -> Self {
        Self {
            shared: Arc::new(PollerShared {
                config,
                runtime,
                state: Mutex::new(PollerState::default()),
            }),
        }
    }

    pub fn config(&self) -> PollerConfig {
        self.shared.config
    }

    /// Start delivering changes of `target` to `callback`.
    ///
    /// Returns the current value alongside the subscription. If the target
    /// cannot be read at all, the value is null and the subscription is
    /// inert.
    pub fn subscribe(
        &self,
        target: PollTarget,
        cadence: Cadence,
        callback: Callback,
    ) -> (CellValue, Subscription) {
        let baseline = {
            let state = lock(&self.shared.state);
            state.tables[cadence.index()]
                .get(&target.id)
                .and_then(|entry| match &entry.sample {
                    Sample::Good(value) => Some(value.clone()),
                    Sample::Broken { .. } => None,
                })
        };
        let initial = match baseline {
            Some(value) => value,
            None => match (target.getter)() {
                Ok(value) => value,
                Err(err) => {
                    warn!(source = %target.id, ?cadence, error = %err, "poll source unreadable; not subscribing");
                    return (CellValue::null(), Subscription::inert());
                }
            },
        };

        let mut state = lock(&self.shared.state);
        let subscriber_id = state.next_subscriber;
        state.next_subscriber += 1;
        let entry = state.tables[cadence.index()]
            .entry(target.id)
            .or_insert_with(|| TargetEntry {
                getter: target.getter,
                interest: target.interest,
                sample: Sample::Good(initial.clone()),
                subscribers: BTreeMap::new(),
            });
        let guard = entry.interest.as_ref().map(InterestTracker::acquire);
        entry.subscribers.insert(
            subscriber_id,
            Subscriber {
                callback,
                _interest: guard,
            },
        );
        state.counts[cadence.index()] += 1;
        if state.counts[cadence.index()] == 1 {
            PollerShared::start_timer(&self.shared, &mut state, cadence);
        }
        drop(state);

        let shared = Arc::downgrade(&self.shared);
        let id = target.id;
        let subscription = Subscription::new(move || {
            if let Some(shared) = Weak::upgrade(&shared) {
                shared.unsubscribe(cadence, id, subscriber_id);
            }
        });
        (initial, subscription)
    }

    /// Sample every source registered for `cadence` once and deliver changes.
    pub fn tick(&self, cadence: Cadence) {
        self.shared.tick(cadence);
    }

    /// Number of live subscriptions on `cadence`.
    pub fn subscription_count(&self, cadence: Cadence) -> usize {
        lock(&self.shared.state).counts[cadence.index()]
    }

    /// Number of distinct sources registered on `cadence`.
    pub fn source_count(&self, cadence: Cadence) -> usize {
        lock(&self.shared.state).tables[cadence.index()].len()
    }

    /// Whether a timer is currently running for `cadence`.
    pub fn is_ticking(&self, cadence: Cadence) -> bool {
        lock(&self.shared.state).timers[cadence.index()].is_some()
    }

    /// Stop all timers. Subscriptions stay registered and can still be
    /// driven with [`Poller::tick`].
    pub fn shutdown(&self) {
        let mut state = lock(&self.shared.state);
        state.stopped = true;
        for timer in state.timers.iter_mut().filter_map(Option::take) {
            timer.abort();
        }
        debug!("poller stopped");
    }
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("config", &self.shared.config)
            .field("threaded", &self.shared.runtime.is_some())
            .finish_non_exhaustive()
    }
}

impl PollerShared {
    fn start_timer(shared: &Arc<Self>, state: &mut PollerState, cadence: Cadence) {
        let Some(runtime) = &shared.runtime else {
            return;
        };
        if state.stopped {
            return;
        }
        let period = shared.config.interval(cadence);
        let weak = Arc::downgrade(shared);
        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; subscribers already have
            // a fresh value.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.tick(cadence);
            }
        });
        state.timers[cadence.index()] = Some(handle);
        debug!(?cadence, ?period, "poll timer started");
    }

    fn unsubscribe(&self, cadence: Cadence, id: SourceId, subscriber_id: u64) {
        let mut state = lock(&self.state);
        let table = &mut state.tables[cadence.index()];
        let Some(entry) = table.get_mut(&id) else {
            return;
        };
        if entry.subscribers.remove(&subscriber_id).is_none() {
            return;
        }
        if entry.subscribers.is_empty() {
            table.remove(&id);
        }
        state.counts[cadence.index()] -= 1;
        if state.counts[cadence.index()] == 0
            && let Some(timer) = state.timers[cadence.index()].take()
        {
            timer.abort();
            debug!(?cadence, "poll timer stopped");
        }
    }

    fn tick(&self, cadence: Cadence) {
        let sources: Vec<(SourceId, PollGetter)> = lock(&self.state).tables[cadence.index()]
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(&entry.getter)))
            .collect();
        let samples: Vec<(SourceId, Result<CellValue, CellError>)> = sources
            .into_iter()
            .map(|(id, getter)| (id, getter()))
            .collect();

        let mut deliveries: Vec<(Vec<Callback>, CellValue)> = Vec::new();
        {
            let mut state = lock(&self.state);
            let table = &mut state.tables[cadence.index()];
            for (id, result) in samples {
                // Unsubscribed while sampling.
                let Some(entry) = table.get_mut(&id) else {
                    continue;
                };
                match result {
                    Ok(value) => {
                        let previous = mem::replace(&mut entry.sample, Sample::Good(value.clone()));
                        let changed = match previous {
                            Sample::Good(prev) => prev != value,
                            Sample::Broken { last_good } => {
                                info!(source = %id, "poll source recovered");
                                last_good.as_ref() != Some(&value)
                            }
                        };
                        if changed {
                            let callbacks = entry
                                .subscribers
                                .values()
                                .map(|s| Arc::clone(&s.callback))
                                .collect();
                            deliveries.push((callbacks, value));
                        }
                    }
                    Err(err) => {
                        if let Sample::Good(prev) = &entry.sample {
                            warn!(source = %id, error = %err, "poll source failed; suppressing until it recovers");
                            entry.sample = Sample::Broken {
                                last_good: Some(prev.clone()),
                            };
                        }
                    }
                }
            }
        }

        for (callbacks, value) in deliveries {
            for callback in callbacks {
                callback(CellEvent::Changed(value.clone()));
            }
        }
    }
}
