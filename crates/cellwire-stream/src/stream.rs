//! The per-connection registration table and update engine.
//!
//! A [`StateStream`] mirrors the object graph reachable from one root onto
//! a client. Every block (exported object) and cell it reaches is
//! registered under a serial and subscribed; changes arrive as pending
//! updates and are turned into wire messages by
//! [`StateStream::process_pending`].
//!
//! # Invariants
//!
//! 1. An object or cell is registered at most once per stream, however
//!    many parents reach it; it carries a reference count.
//! 2. Serials start at 1, increase monotonically and are never reused.
//! 3. A `register_*` message for a serial is always queued before any
//!    message that mentions it.
//! 4. An entry is deleted, and its subscription cancelled, exactly when
//!    its reference count reaches zero; the release cascades to its
//!    children (for blocks) or target (for reference cells).
//! 5. Subscription callbacks only enqueue; the table is mutated solely by
//!    the owner of the stream.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use cellwire_core::{
    BlockId, BlockRef, BulkChunk, Cadence, Callback, Cell, CellEvent, CellValue, PollGetter, PollTarget,
    Poller, SourceId, Subscription, SubscriptionContext,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::error::ProtocolError;
use crate::message::{Command, Message, ROOT_SERIAL, Serial};
use crate::outbox::{Frame, Outbox, encode_bulk_frame};
use crate::pending::PendingQueue;

/// Per-stream settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Cadence used for poll-only cells.
    pub cadence: Cadence,
    /// How long one batch of frames may take to write before the client is
    /// considered stalled and the connection is dropped.
    pub write_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            cadence: Cadence::default(),
            write_timeout_ms: 10_000,
        }
    }
}

impl StreamConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ObjectKey {
    Block(BlockId),
    Cell(SourceId),
}

enum EntryKind {
    Block {
        block: BlockRef,
        children: BTreeMap<String, Serial>,
    },
    Cell {
        cell: Cell,
        last_sent: Option<Value>,
        target: Option<Serial>,
    },
}

struct Entry {
    key: ObjectKey,
    url: String,
    refcount: usize,
    kind: EntryKind,
    subscription: Option<Subscription>,
}

/// One client's synchronized view of an object graph.
pub struct StateStream {
    entries: BTreeMap<Serial, Entry>,
    index: HashMap<ObjectKey, Serial>,
    next_serial: Serial,
    root: Option<Serial>,
    outbox: Outbox,
    context: SubscriptionContext,
    pending: Arc<PendingQueue>,
}

impl StateStream {
    /// Register the graph under `root` and queue its initial messages.
    pub fn new(root: &BlockRef, url: &str, poller: Poller, config: StreamConfig) -> Self {
        let mut stream = Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            next_serial: 1,
            root: None,
            outbox: Outbox::default(),
            context: SubscriptionContext::new(poller, config.cadence),
            pending: Arc::default(),
        };
        let serial = stream.acquire_block(root, url);
        stream.root = Some(serial);
        stream.outbox.push(&Message::Value {
            serial: ROOT_SERIAL,
            value: Value::from(serial),
        });
        debug!(url, registered = stream.entries.len(), "state stream initialized");
        stream
    }

    /// Serial of the root object, until the stream is closed.
    pub fn root_serial(&self) -> Option<Serial> {
        self.root
    }

    /// Number of live registrations.
    pub fn registered_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_registered(&self, serial: Serial) -> bool {
        self.entries.contains_key(&serial)
    }

    /// Take every frame queued so far, flushing pending JSON.
    pub fn take_frames(&mut self) -> Vec<Frame> {
        self.outbox.take_frames()
    }

    /// Apply every update that has already arrived.
    ///
    /// Updates that piled up for one serial since the last call have
    /// already been folded together, so only the newest value or chunk of
    /// each cell is sent.
    pub fn process_pending(&mut self) {
        while let Some((serial, events)) = self.pending.pop() {
            for event in events {
                self.apply(serial, event);
            }
        }
    }

    /// Wait for at least one update and apply it.
    ///
    /// Cancel-safe: an update is either applied or left in the queue.
    pub async fn wait_for_update(&mut self) {
        loop {
            if let Some((serial, events)) = self.pending.pop() {
                for event in events {
                    self.apply(serial, event);
                }
                return;
            }
            self.pending.changed().await;
        }
    }

    /// Handle one text frame from the client.
    ///
    /// Failed writes are reported to the client; protocol violations are
    /// returned and should end the connection.
    pub fn handle_inbound(&mut self, text: &str) -> Result<(), ProtocolError> {
        let command = Command::parse(text).inspect_err(|err| {
            error!(error = %err, message = text, "unparsable client message");
        })?;
        match command {
            Command::Set {
                serial,
                value,
                message_id,
            } => self.handle_set(serial, &value, message_id),
        }
    }

    fn handle_set(&mut self, serial: Serial, value: &Value, message_id: Value) -> Result<(), ProtocolError> {
        let Some(entry) = self.entries.get(&serial) else {
            error!(serial, message = %value, "set names an unregistered serial");
            return Err(ProtocolError::UnknownSerial(serial));
        };
        let EntryKind::Cell { cell, .. } = &entry.kind else {
            error!(serial, url = %entry.url, "set names a block, not a cell");
            return Err(ProtocolError::NotACell(serial));
        };
        let cell = cell.clone();
        let result = cell.set(value);

        // Resend what the cell now holds; coercion may have changed it.
        match cell.get() {
            Ok(CellValue::Value(current)) => {
                self.outbox.push(&Message::Value {
                    serial,
                    value: current.clone(),
                });
                if let Some(Entry {
                    kind: EntryKind::Cell { last_sent, .. },
                    ..
                }) = self.entries.get_mut(&serial)
                {
                    *last_sent = Some(current);
                }
            }
            Ok(CellValue::Block(block)) => self.retarget(serial, &block),
            Err(err) => warn!(serial, error = %err, "cannot read cell after set"),
        }

        match result {
            Ok(()) => self.outbox.push(&Message::Done { message_id }),
            Err(err) => {
                debug!(serial, error = %err, "client set rejected");
                self.outbox.push(&Message::Error {
                    message_id,
                    reason: err.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Cancel every subscription and forget every registration.
    pub fn close(&mut self) {
        let count = self.entries.len();
        // Dropping the entries drops their subscriptions.
        self.entries.clear();
        self.index.clear();
        self.root = None;
        if count > 0 {
            debug!(count, "state stream closed");
        }
    }

    fn allocate(&mut self) -> Serial {
        let serial = self.next_serial;
        self.next_serial += 1;
        serial
    }

    fn callback_for(&self, serial: Serial) -> Callback {
        let pending = Arc::clone(&self.pending);
        Arc::new(move |event| pending.push(serial, event))
    }

    /// Take a reference to `block`, registering it (and everything it
    /// reaches) if this is the first.
    fn acquire_block(&mut self, block: &BlockRef, url: &str) -> Serial {
        let key = ObjectKey::Block(block.id());
        if let Some(serial) = self.bump(key) {
            return serial;
        }
        let serial = self.allocate();
        self.index.insert(key, serial);
        self.outbox.push(&Message::RegisterBlock {
            serial,
            url: url.to_string(),
            interfaces: block.interfaces(),
        });

        let subscription = block.state_is_dynamic().then(|| {
            let watched = block.clone();
            let getter: PollGetter = Arc::new(move || Ok(CellValue::Value(shape_of(&watched))));
            let (_, subscription) = self.context.poller.subscribe(
                PollTarget::new(SourceId::next(), getter),
                Cadence::Slow,
                self.callback_for(serial),
            );
            subscription
        });
        self.entries.insert(
            serial,
            Entry {
                key,
                url: url.to_string(),
                refcount: 1,
                kind: EntryKind::Block {
                    block: block.clone(),
                    children: BTreeMap::new(),
                },
                subscription,
            },
        );

        let mut children = BTreeMap::new();
        for (name, cell) in block.state() {
            let child_url = format!("{url}/{name}");
            children.insert(name, self.acquire_cell(&cell, &child_url));
        }
        self.outbox.push(&Message::Value {
            serial,
            value: children_json(&children),
        });
        if let Some(Entry {
            kind: EntryKind::Block { children: slot, .. },
            ..
        }) = self.entries.get_mut(&serial)
        {
            *slot = children;
        }
        serial
    }

    fn acquire_cell(&mut self, cell: &Cell, url: &str) -> Serial {
        let key = ObjectKey::Cell(cell.id());
        if let Some(serial) = self.bump(key) {
            return serial;
        }
        let serial = self.allocate();
        self.index.insert(key, serial);
        self.entries.insert(
            serial,
            Entry {
                key,
                url: url.to_string(),
                refcount: 1,
                kind: EntryKind::Cell {
                    cell: cell.clone(),
                    last_sent: None,
                    target: None,
                },
                subscription: None,
            },
        );

        let (initial, subscription) = cell.subscribe(self.callback_for(serial), &self.context);
        let (initial_json, target_block) = match initial {
            CellValue::Value(v) => (v, None),
            CellValue::Block(b) => (Value::Null, Some(b)),
        };
        self.outbox.push(&Message::RegisterCell {
            serial,
            url: url.to_string(),
            description: cell.description(),
            initial: initial_json.clone(),
        });
        let target = target_block.map(|block| {
            let target = self.acquire_block(&block, url);
            self.outbox.push(&Message::Value {
                serial,
                value: Value::from(target),
            });
            target
        });

        if let Some(entry) = self.entries.get_mut(&serial) {
            entry.subscription = Some(subscription);
            if let EntryKind::Cell {
                last_sent,
                target: slot,
                ..
            } = &mut entry.kind
            {
                *last_sent = target.is_none().then_some(initial_json);
                *slot = target;
            }
        }
        serial
    }

    /// Increment the reference count of an already registered object.
    fn bump(&mut self, key: ObjectKey) -> Option<Serial> {
        let serial = *self.index.get(&key)?;
        let entry = self.entries.get_mut(&serial)?;
        entry.refcount += 1;
        Some(serial)
    }

    /// Drop one reference to `serial`, deleting it (and cascading) at zero.
    fn release(&mut self, serial: Serial) {
        let mut stack = vec![serial];
        while let Some(serial) = stack.pop() {
            let Some(entry) = self.entries.get_mut(&serial) else {
                continue;
            };
            entry.refcount -= 1;
            if entry.refcount > 0 {
                continue;
            }
            let Some(entry) = self.entries.remove(&serial) else {
                continue;
            };
            self.index.remove(&entry.key);
            self.outbox.push(&Message::Delete { serial });
            debug!(serial, url = %entry.url, "registration deleted");
            drop(entry.subscription);
            match entry.kind {
                EntryKind::Block { children, .. } => stack.extend(children.into_values().rev()),
                EntryKind::Cell {
                    target: Some(target), ..
                } => stack.push(target),
                EntryKind::Cell { target: None, .. } => {}
            }
        }
    }

    fn apply(&mut self, serial: Serial, event: CellEvent) {
        // Updates for released serials are stale.
        let Some(entry) = self.entries.get(&serial) else {
            return;
        };
        let is_block = matches!(entry.kind, EntryKind::Block { .. });
        match event {
            CellEvent::Changed(_) if is_block => self.reshape(serial),
            CellEvent::Changed(CellValue::Block(block)) => self.retarget(serial, &block),
            CellEvent::Changed(CellValue::Value(value)) => self.send_value(serial, value),
            CellEvent::Chunk(chunk) => self.send_chunk(serial, &chunk),
            CellEvent::Appended(items) => {
                if !is_block {
                    self.outbox.push(&Message::ValueAppend {
                        serial,
                        items: Value::Array(items),
                    });
                }
            }
        }
    }

    fn send_chunk(&mut self, serial: Serial, chunk: &BulkChunk) {
        let Some(Entry {
            kind: EntryKind::Cell {
                cell: Cell::Stream(stream),
                ..
            },
            ..
        }) = self.entries.get(&serial)
        else {
            return;
        };
        let Some(bulk_type) = stream.bulk_type() else {
            warn!(serial, "chunk from a cell without a bulk-data type");
            return;
        };
        let Some(bytes) = encode_bulk_frame(serial, bulk_type, chunk) else {
            warn!(serial, info = ?chunk.info, "chunk does not match its info format");
            return;
        };
        self.outbox.push_binary(bytes);
    }

    fn send_value(&mut self, serial: Serial, value: Value) {
        let Some(Entry {
            kind: EntryKind::Cell { last_sent, .. },
            ..
        }) = self.entries.get_mut(&serial)
        else {
            return;
        };
        if last_sent.as_ref() == Some(&value) {
            return;
        }
        *last_sent = Some(value.clone());
        self.outbox.push(&Message::Value { serial, value });
    }

    /// Point a reference cell's registration at `block`: acquire the new
    /// target before releasing the old one so shared children survive.
    fn retarget(&mut self, serial: Serial, block: &BlockRef) {
        let Some(entry) = self.entries.get(&serial) else {
            return;
        };
        let EntryKind::Cell { target: old, .. } = &entry.kind else {
            return;
        };
        let old = *old;
        let url = entry.url.clone();
        let new = self.acquire_block(block, &url);
        if old == Some(new) {
            self.release(new);
            return;
        }
        if let Some(Entry {
            kind: EntryKind::Cell { target, .. },
            ..
        }) = self.entries.get_mut(&serial)
        {
            *target = Some(new);
        }
        self.outbox.push(&Message::Value {
            serial,
            value: Value::from(new),
        });
        if let Some(old) = old {
            self.release(old);
        }
    }

    /// Re-read a dynamic block's cells and reconcile its children.
    fn reshape(&mut self, serial: Serial) {
        let Some(Entry {
            kind: EntryKind::Block { block, children },
            url,
            ..
        }) = self.entries.get(&serial)
        else {
            return;
        };
        let block = block.clone();
        let url = url.clone();
        let old_children = children.clone();

        let mut children = BTreeMap::new();
        let mut stale = Vec::new();
        for (name, cell) in block.state() {
            let kept = old_children
                .get(&name)
                .copied()
                .filter(|&s| self.index.get(&ObjectKey::Cell(cell.id())) == Some(&s));
            let child = match kept {
                Some(s) => s,
                None => {
                    let child_url = format!("{url}/{name}");
                    self.acquire_cell(&cell, &child_url)
                }
            };
            children.insert(name, child);
        }
        for (name, old) in &old_children {
            if children.get(name) != Some(old) {
                stale.push(*old);
            }
        }
        if children == old_children {
            return;
        }
        self.outbox.push(&Message::Value {
            serial,
            value: children_json(&children),
        });
        if let Some(Entry {
            kind: EntryKind::Block { children: slot, .. },
            ..
        }) = self.entries.get_mut(&serial)
        {
            *slot = children;
        }
        for old in stale {
            self.release(old);
        }
    }
}

impl Drop for StateStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn children_json(children: &BTreeMap<String, Serial>) -> Value {
    Value::Object(
        children
            .iter()
            .map(|(name, serial)| (name.clone(), Value::from(*serial)))
            .collect::<Map<String, Value>>(),
    )
}

/// Comparable fingerprint of a block's cell set.
fn shape_of(block: &BlockRef) -> Value {
    Value::Object(
        block
            .state()
            .iter()
            .map(|(name, cell)| (name.clone(), Value::from(cell.id().get())))
            .collect(),
    )
}
