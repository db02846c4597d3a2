//! Observable, optionally writable properties of exported objects.
//!
//! A [`Cell`] is one of three flavours:
//!
//! - [`ValueCell`]: holds a plain value, either stored in the cell itself
//!   (and pushed to subscribers when written) or read through a getter
//!   (and sampled by the [`Poller`]).
//! - [`ReferenceCell`]: points at another exported object, fixed, swappable
//!   or computed.
//! - [`StreamCell`]: a write-only-from-inside stream of bulk chunks or
//!   appended log items.
//!
//! Cells are cheap handles; cloning one yields the same cell.
//!
//! [`Poller`]: crate::poller::Poller

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use cellwire_types::{BulkDataT, ValueType};

use crate::error::CellError;
use crate::interest::InterestTracker;
use crate::poller::{Cadence, PollGetter, PollTarget, Poller};
use crate::subscription::{BulkChunk, Callback, CellEvent, Notifier, Subscription};
use crate::sync::lock;
use crate::value::{BlockRef, CellValue, SourceId};

/// Where and how fast polled subscriptions are sampled.
#[derive(Debug, Clone)]
pub struct SubscriptionContext {
    pub poller: Poller,
    pub cadence: Cadence,
}

impl SubscriptionContext {
    pub fn new(poller: Poller, cadence: Cadence) -> Self {
        Self { poller, cadence }
    }
}

/// Static description of a cell.
///
/// `persists` defaults to the value of `writable`: state a user can change
/// is state worth saving.
#[derive(Debug, Clone, PartialEq)]
pub struct CellMetadata {
    pub value_type: ValueType,
    pub writable: bool,
    pub persists: bool,
    pub label: Option<String>,
    pub description: Option<String>,
    pub sort_key: Option<String>,
}

impl CellMetadata {
    /// Read-only, non-persistent metadata for `value_type`.
    pub fn new(value_type: impl Into<ValueType>) -> Self {
        Self {
            value_type: value_type.into(),
            writable: false,
            persists: false,
            label: None,
            description: None,
            sort_key: None,
        }
    }

    /// Metadata for a reference cell. References persist by default so
    /// their targets' state is saved.
    pub fn reference() -> Self {
        Self::new(ValueType::Reference).persists(true)
    }

    /// Allow clients to write the cell; also makes it persistent.
    #[must_use]
    pub fn writable(mut self) -> Self {
        self.writable = true;
        self.persists = true;
        self
    }

    #[must_use]
    pub fn persists(mut self, persists: bool) -> Self {
        self.persists = persists;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }

    fn describe(&self, kind: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("kind".into(), Value::from(kind));
        map.insert("type".into(), self.value_type.describe());
        map.insert("writable".into(), Value::Bool(self.writable));
        map.insert("persists".into(), Value::Bool(self.persists));
        map.insert("label".into(), self.label.clone().map_or(Value::Null, Value::from));
        map.insert(
            "description".into(),
            self.description.clone().map_or(Value::Null, Value::from),
        );
        map.insert(
            "sort_key".into(),
            self.sort_key.clone().map_or(Value::Null, Value::from),
        );
        map
    }
}

pub type ValueGetter = Arc<dyn Fn() -> Result<Value, CellError> + Send + Sync>;
pub type ValueSetter = Arc<dyn Fn(Value) -> Result<(), CellError> + Send + Sync>;
pub type BlockGetter = Arc<dyn Fn() -> Result<BlockRef, CellError> + Send + Sync>;

enum ValueBacking {
    Stored { value: Mutex<Value>, notifier: Notifier },
    Polled { getter: ValueGetter, setter: Option<ValueSetter> },
}

struct ValueCellInner {
    id: SourceId,
    metadata: CellMetadata,
    interest: OnceLock<InterestTracker>,
    backing: ValueBacking,
}

/// A cell holding a plain value.
#[derive(Clone)]
pub struct ValueCell {
    inner: Arc<ValueCellInner>,
}

impl ValueCell {
    fn build(metadata: CellMetadata, backing: ValueBacking) -> Self {
        Self {
            inner: Arc::new(ValueCellInner {
                id: SourceId::next(),
                metadata,
                interest: OnceLock::new(),
                backing,
            }),
        }
    }

    /// A cell storing its own value and notifying subscribers on change.
    ///
    /// `initial` is stored as given; it is the owner's job to pick a value
    /// inside the domain.
    pub fn stored(metadata: CellMetadata, initial: Value) -> Self {
        Self::build(
            metadata,
            ValueBacking::Stored {
                value: Mutex::new(initial),
                notifier: Notifier::new(),
            },
        )
    }

    /// A read-only cell computed by `getter` and sampled when subscribed.
    pub fn polled(
        metadata: CellMetadata,
        getter: impl Fn() -> Result<Value, CellError> + Send + Sync + 'static,
    ) -> Self {
        Self::build(
            CellMetadata {
                writable: false,
                ..metadata
            },
            ValueBacking::Polled {
                getter: Arc::new(getter),
                setter: None,
            },
        )
    }

    /// A writable cell backed by a getter/setter pair.
    pub fn polled_with_setter(
        metadata: CellMetadata,
        getter: impl Fn() -> Result<Value, CellError> + Send + Sync + 'static,
        setter: impl Fn(Value) -> Result<(), CellError> + Send + Sync + 'static,
    ) -> Self {
        Self::build(
            metadata.writable(),
            ValueBacking::Polled {
                getter: Arc::new(getter),
                setter: Some(Arc::new(setter)),
            },
        )
    }

    /// Attach a demand tracker, shared by every clone of the cell.
    ///
    /// Subscriptions taken before the call are not counted. A cell has at
    /// most one tracker; later ones are ignored.
    #[must_use]
    pub fn with_interest(self, tracker: InterestTracker) -> Self {
        if self.inner.interest.set(tracker).is_err() {
            warn!(id = ?self.inner.id, "cell already has an interest tracker");
        }
        self
    }

    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    pub fn metadata(&self) -> &CellMetadata {
        &self.inner.metadata
    }

    pub fn interest(&self) -> Option<&InterestTracker> {
        self.inner.interest.get()
    }

    pub fn get(&self) -> Result<Value, CellError> {
        match &self.inner.backing {
            ValueBacking::Stored { value, .. } => Ok(lock(value).clone()),
            ValueBacking::Polled { getter, .. } => getter(),
        }
    }

    /// Client-facing write: rejected unless the cell is writable.
    pub fn set(&self, value: &Value) -> Result<(), CellError> {
        if !self.inner.metadata.writable {
            return Err(CellError::NotWritable);
        }
        self.set_internal(value)
    }

    /// Owner-side write: skips the writability check but still coerces.
    pub fn set_internal(&self, value: &Value) -> Result<(), CellError> {
        let coerced = self.inner.metadata.value_type.coerce(value)?;
        match &self.inner.backing {
            ValueBacking::Stored { value: stored, notifier } => {
                {
                    let mut current = lock(stored);
                    if *current == coerced {
                        return Ok(());
                    }
                    *current = coerced.clone();
                }
                debug!(cell = %self.inner.id, value = %coerced, "cell updated");
                notifier.notify(&CellEvent::Changed(CellValue::Value(coerced)));
                Ok(())
            }
            ValueBacking::Polled {
                setter: Some(setter),
                ..
            } => setter(coerced),
            ValueBacking::Polled { setter: None, .. } => Err(CellError::NotWritable),
        }
    }

    pub fn subscribe(&self, callback: Callback, ctx: &SubscriptionContext) -> (CellValue, Subscription) {
        match &self.inner.backing {
            ValueBacking::Stored { value, notifier } => {
                let current = lock(value);
                let subscription = notifier.subscribe(callback, self.inner.interest.get());
                (CellValue::Value(current.clone()), subscription)
            }
            ValueBacking::Polled { getter, .. } => {
                let getter = Arc::clone(getter);
                let poll: PollGetter = Arc::new(move || getter().map(CellValue::Value));
                let target = PollTarget::new(self.inner.id, poll).with_interest(self.inner.interest.get().cloned());
                ctx.poller.subscribe(target, ctx.cadence, callback)
            }
        }
    }
}

impl fmt::Debug for ValueCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCell")
            .field("id", &self.inner.id)
            .field("type", &self.inner.metadata.value_type)
            .finish_non_exhaustive()
    }
}

enum ReferenceBacking {
    Fixed(BlockRef),
    Swappable { target: Mutex<BlockRef>, notifier: Notifier },
    Polled(BlockGetter),
}

struct ReferenceCellInner {
    id: SourceId,
    metadata: CellMetadata,
    backing: ReferenceBacking,
}

/// A cell whose value is another exported object.
#[derive(Clone)]
pub struct ReferenceCell {
    inner: Arc<ReferenceCellInner>,
}

impl ReferenceCell {
    fn build(metadata: CellMetadata, backing: ReferenceBacking) -> Self {
        Self {
            inner: Arc::new(ReferenceCellInner {
                id: SourceId::next(),
                metadata: CellMetadata {
                    value_type: ValueType::Reference,
                    writable: false,
                    ..metadata
                },
                backing,
            }),
        }
    }

    /// A reference that never changes target.
    pub fn fixed(metadata: CellMetadata, target: BlockRef) -> Self {
        Self::build(metadata, ReferenceBacking::Fixed(target))
    }

    /// A reference the owner retargets with [`ReferenceCell::set_target`].
    pub fn swappable(metadata: CellMetadata, target: BlockRef) -> Self {
        Self::build(
            metadata,
            ReferenceBacking::Swappable {
                target: Mutex::new(target),
                notifier: Notifier::new(),
            },
        )
    }

    /// A reference computed on demand and sampled when subscribed.
    pub fn polled(
        metadata: CellMetadata,
        getter: impl Fn() -> Result<BlockRef, CellError> + Send + Sync + 'static,
    ) -> Self {
        Self::build(metadata, ReferenceBacking::Polled(Arc::new(getter)))
    }

    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    pub fn metadata(&self) -> &CellMetadata {
        &self.inner.metadata
    }

    pub fn get(&self) -> Result<BlockRef, CellError> {
        match &self.inner.backing {
            ReferenceBacking::Fixed(target) => Ok(target.clone()),
            ReferenceBacking::Swappable { target, .. } => Ok(lock(target).clone()),
            ReferenceBacking::Polled(getter) => getter(),
        }
    }

    /// Point a swappable reference at `block`.
    ///
    /// Returns false (and does nothing) for fixed or computed references.
    pub fn set_target(&self, block: BlockRef) -> bool {
        let ReferenceBacking::Swappable { target, notifier } = &self.inner.backing else {
            return false;
        };
        {
            let mut current = lock(target);
            if *current == block {
                return true;
            }
            *current = block.clone();
        }
        debug!(cell = %self.inner.id, "reference retargeted");
        notifier.notify(&CellEvent::Changed(CellValue::Block(block)));
        true
    }

    pub fn subscribe(&self, callback: Callback, ctx: &SubscriptionContext) -> (CellValue, Subscription) {
        match &self.inner.backing {
            ReferenceBacking::Fixed(target) => (CellValue::Block(target.clone()), Subscription::inert()),
            ReferenceBacking::Swappable { target, notifier } => {
                let current = lock(target);
                let subscription = notifier.subscribe(callback, None);
                (CellValue::Block(current.clone()), subscription)
            }
            ReferenceBacking::Polled(getter) => {
                let getter = Arc::clone(getter);
                let poll: PollGetter = Arc::new(move || getter().map(CellValue::Block));
                ctx.poller
                    .subscribe(PollTarget::new(self.inner.id, poll), ctx.cadence, callback)
            }
        }
    }
}

impl fmt::Debug for ReferenceCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceCell")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

enum StreamBacking {
    Bulk { latest: Mutex<Option<BulkChunk>> },
    Log { history: Mutex<Vec<Value>>, limit: Option<usize> },
}

struct StreamCellInner {
    id: SourceId,
    metadata: CellMetadata,
    interest: OnceLock<InterestTracker>,
    notifier: Notifier,
    backing: StreamBacking,
}

/// A cell whose updates are events rather than replacements.
#[derive(Clone)]
pub struct StreamCell {
    inner: Arc<StreamCellInner>,
}

impl StreamCell {
    fn build(metadata: CellMetadata, backing: StreamBacking) -> Self {
        Self {
            inner: Arc::new(StreamCellInner {
                id: SourceId::next(),
                metadata: CellMetadata {
                    writable: false,
                    persists: false,
                    ..metadata
                },
                interest: OnceLock::new(),
                notifier: Notifier::new(),
                backing,
            }),
        }
    }

    /// A bulk-data stream of binary chunks.
    pub fn bulk(bulk_type: BulkDataT) -> Self {
        Self::bulk_with(CellMetadata::new(ValueType::BulkData(bulk_type)))
    }

    /// A bulk-data stream with explicit metadata; the value type should be
    /// [`ValueType::BulkData`].
    pub fn bulk_with(metadata: CellMetadata) -> Self {
        Self::build(
            metadata,
            StreamBacking::Bulk {
                latest: Mutex::new(None),
            },
        )
    }

    /// An append-only log; `limit` bounds the retained history.
    pub fn log(metadata: CellMetadata, limit: Option<usize>) -> Self {
        Self::build(
            metadata,
            StreamBacking::Log {
                history: Mutex::new(Vec::new()),
                limit,
            },
        )
    }

    /// Attach a demand tracker, shared by every clone of the cell.
    ///
    /// Subscriptions taken before the call are not counted. A cell has at
    /// most one tracker; later ones are ignored.
    #[must_use]
    pub fn with_interest(self, tracker: InterestTracker) -> Self {
        if self.inner.interest.set(tracker).is_err() {
            warn!(id = ?self.inner.id, "cell already has an interest tracker");
        }
        self
    }

    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    pub fn metadata(&self) -> &CellMetadata {
        &self.inner.metadata
    }

    pub fn interest(&self) -> Option<&InterestTracker> {
        self.inner.interest.get()
    }

    pub fn bulk_type(&self) -> Option<&BulkDataT> {
        match &self.inner.metadata.value_type {
            ValueType::BulkData(b) => Some(b),
            _ => None,
        }
    }

    /// Current value: the retained history for logs, null for bulk streams.
    pub fn get(&self) -> Value {
        match &self.inner.backing {
            StreamBacking::Bulk { .. } => Value::Null,
            StreamBacking::Log { history, .. } => Value::Array(lock(history).clone()),
        }
    }

    pub fn latest_chunk(&self) -> Option<BulkChunk> {
        match &self.inner.backing {
            StreamBacking::Bulk { latest } => lock(latest).clone(),
            StreamBacking::Log { .. } => None,
        }
    }

    /// Publish a chunk. Ignored on log streams.
    pub fn push_chunk(&self, chunk: BulkChunk) {
        let StreamBacking::Bulk { latest } = &self.inner.backing else {
            return;
        };
        *lock(latest) = Some(chunk.clone());
        self.inner.notifier.notify(&CellEvent::Chunk(chunk));
    }

    /// Append items. Ignored on bulk streams.
    pub fn append(&self, items: Vec<Value>) {
        let StreamBacking::Log { history, limit } = &self.inner.backing else {
            return;
        };
        if items.is_empty() {
            return;
        }
        {
            let mut history = lock(history);
            history.extend(items.iter().cloned());
            if let Some(limit) = *limit
                && history.len() > limit
            {
                let excess = history.len() - limit;
                history.drain(..excess);
            }
        }
        self.inner.notifier.notify(&CellEvent::Appended(items));
    }

    pub fn subscribe(&self, callback: Callback) -> (CellValue, Subscription) {
        let interest = self.inner.interest.get();
        match &self.inner.backing {
            StreamBacking::Bulk { latest } => {
                let _held = lock(latest);
                let subscription = self.inner.notifier.subscribe(callback, interest);
                (CellValue::null(), subscription)
            }
            StreamBacking::Log { history, .. } => {
                let history = lock(history);
                let subscription = self.inner.notifier.subscribe(callback, interest);
                (CellValue::Value(Value::Array(history.clone())), subscription)
            }
        }
    }
}

impl fmt::Debug for StreamCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCell")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

/// Any cell.
#[derive(Debug, Clone)]
pub enum Cell {
    Value(ValueCell),
    Reference(ReferenceCell),
    Stream(StreamCell),
}

impl Cell {
    pub fn id(&self) -> SourceId {
        match self {
            Self::Value(c) => c.id(),
            Self::Reference(c) => c.id(),
            Self::Stream(c) => c.id(),
        }
    }

    pub fn metadata(&self) -> &CellMetadata {
        match self {
            Self::Value(c) => c.metadata(),
            Self::Reference(c) => c.metadata(),
            Self::Stream(c) => c.metadata(),
        }
    }

    /// Whether the cell's value is an exported object.
    pub fn is_block(&self) -> bool {
        matches!(self, Self::Reference(_))
    }

    pub fn is_writable(&self) -> bool {
        self.metadata().writable
    }

    pub fn persists(&self) -> bool {
        self.metadata().persists
    }

    pub fn get(&self) -> Result<CellValue, CellError> {
        match self {
            Self::Value(c) => c.get().map(CellValue::Value),
            Self::Reference(c) => c.get().map(CellValue::Block),
            Self::Stream(c) => Ok(CellValue::Value(c.get())),
        }
    }

    /// Client-facing write.
    pub fn set(&self, value: &Value) -> Result<(), CellError> {
        match self {
            Self::Value(c) => c.set(value),
            Self::Reference(_) | Self::Stream(_) => Err(CellError::NotWritable),
        }
    }

    pub fn subscribe(&self, callback: Callback, ctx: &SubscriptionContext) -> (CellValue, Subscription) {
        match self {
            Self::Value(c) => c.subscribe(callback, ctx),
            Self::Reference(c) => c.subscribe(callback, ctx),
            Self::Stream(c) => c.subscribe(callback),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Reference(_) => "block",
            Self::Stream(_) => "stream",
        }
    }

    /// Metadata-only description, suitable for registering the cell.
    pub fn description(&self) -> Value {
        Value::Object(self.metadata().describe(self.kind()))
    }

    /// Description including the current value. Objects are described by
    /// reference only; see `StateJson::state_description` for a full tree.
    pub fn describe(&self) -> Value {
        let mut map = self.metadata().describe(self.kind());
        let current = match self.get() {
            Ok(CellValue::Value(v)) => v,
            Ok(CellValue::Block(_)) | Err(_) => Value::Null,
        };
        map.insert("current".into(), current);
        Value::Object(map)
    }
}

impl From<ValueCell> for Cell {
    fn from(cell: ValueCell) -> Self {
        Self::Value(cell)
    }
}

impl From<ReferenceCell> for Cell {
    fn from(cell: ReferenceCell) -> Self {
        Self::Reference(cell)
    }
}

impl From<StreamCell> for Cell {
    fn from(cell: StreamCell) -> Self {
        Self::Stream(cell)
    }
}
