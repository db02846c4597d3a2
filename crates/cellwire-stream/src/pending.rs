//! Coalescing queue of cell events waiting to be applied to a stream.
//!
//! Subscription callbacks push here from any thread; the stream owner
//! drains it. While a serial is waiting, newer events fold into the
//! queued ones instead of piling up behind them:
//!
//! - `Changed` replaces everything queued for the serial
//! - `Chunk` replaces a queued trailing `Chunk`
//! - `Appended` extends a queued trailing `Appended`
//!
//! A client that stops reading therefore costs a bounded number of events
//! per registered serial, not one per tick.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use cellwire_core::CellEvent;
use tokio::sync::Notify;

use crate::message::Serial;

#[derive(Default)]
struct Slots {
    order: VecDeque<Serial>,
    events: HashMap<Serial, Vec<CellEvent>>,
}

#[derive(Default)]
pub(crate) struct PendingQueue {
    slots: Mutex<Slots>,
    ready: Notify,
}

impl PendingQueue {
    pub(crate) fn push(&self, serial: Serial, event: CellEvent) {
        {
            let mut slots = self.slots();
            let Slots { order, events } = &mut *slots;
            match events.entry(serial) {
                Entry::Occupied(mut queued) => fold(queued.get_mut(), event),
                Entry::Vacant(slot) => {
                    order.push_back(serial);
                    slot.insert(vec![event]);
                }
            }
        }
        self.ready.notify_one();
    }

    /// The oldest waiting serial with everything queued for it.
    pub(crate) fn pop(&self) -> Option<(Serial, Vec<CellEvent>)> {
        let mut slots = self.slots();
        let serial = slots.order.pop_front()?;
        let events = slots.events.remove(&serial).unwrap_or_default();
        Some((serial, events))
    }

    /// Resolves after the next `push`, or at once if one happened since the
    /// last wait. May resolve with nothing queued.
    pub(crate) async fn changed(&self) {
        self.ready.notified().await;
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots().events.values().map(Vec::len).sum()
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn fold(queued: &mut Vec<CellEvent>, event: CellEvent) {
    match event {
        CellEvent::Changed(_) => {
            queued.clear();
            queued.push(event);
        }
        CellEvent::Chunk(chunk) => match queued.last_mut() {
            Some(CellEvent::Chunk(last)) => *last = chunk,
            _ => queued.push(CellEvent::Chunk(chunk)),
        },
        CellEvent::Appended(items) => match queued.last_mut() {
            Some(CellEvent::Appended(last)) => last.extend(items),
            _ => queued.push(CellEvent::Appended(items)),
        },
    }
}
