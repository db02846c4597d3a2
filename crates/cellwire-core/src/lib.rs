//! Observable object trees.
//!
//! Application objects implement [`ExportedState`] to expose their
//! properties as [`Cell`]s. A cell either holds a plain value or points at
//! another exported object, so a single root object describes an entire
//! graph. Consumers subscribe to cells to hear about changes: stored cells
//! push changes when written, getter-backed cells are sampled by a shared
//! [`Poller`], and stream cells push chunks or appended items as they are
//! produced.
//!
//! # Architecture
//!
//! - `value.rs` - identities, [`BlockRef`] and [`CellValue`]
//! - `cell.rs` - the cell flavours and their metadata
//! - `state.rs` - the [`ExportedState`] trait and [`StateNode`]
//! - `collection.rs` - exporting a keyed collection of objects
//! - `subscription.rs` - callbacks, subscription handles, push fan-out
//! - `poller.rs` - the shared periodic sampler
//! - `interest.rs` - demand tracking for expensive producers
//! - `snapshot.rs` - JSON snapshots, restore and descriptions

mod cell;
mod collection;
mod error;
mod interest;
mod poller;
mod snapshot;
mod state;
mod subscription;
mod sync;
mod value;

pub use cell::{
    BlockGetter, Cell, CellMetadata, ReferenceCell, StreamCell, SubscriptionContext, ValueCell,
    ValueGetter, ValueSetter,
};
pub use collection::{CollectionState, Inserter, SharedCollection};
pub use error::{CellError, StateError};
pub use interest::{InterestGuard, InterestTracker};
pub use poller::{Cadence, PollGetter, PollTarget, Poller, PollerConfig};
pub use snapshot::{RestoreReport, SkipReason, StateJson};
pub use state::{CellMap, ExportedState, StateNode, StateNodeBuilder};
pub use subscription::{BulkChunk, Callback, CellEvent, Notifier, Subscription, callback};
pub use value::{BlockId, BlockRef, CellValue, SourceId};

pub use cellwire_types as types;
