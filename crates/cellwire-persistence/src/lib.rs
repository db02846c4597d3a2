//! Durable state for cellwire servers.
//!
//! The state of an exported object tree is stored as a single JSON object
//! (see `cellwire_core::StateJson`). This crate loads that file at startup,
//! writes it back atomically, and runs a debounced background writer that
//! follows changes to the tree.
//!
//! # File Format
//!
//! Pretty-printed JSON mirroring the reference structure of the tree:
//!
//! ```text
//! {
//!   "receiver": { "freq": 100000000.0, "mode": "AM" },
//!   "channels": { "a": { "freq": 7100000.0 } }
//! }
//! ```
//!
//! The previous version of the file is kept beside it with `~` appended.
//!
//! # Architecture
//!
//! - `io/` - File I/O operations (atomic save, load)
//! - `autosave/` - Debounce tracking and the background writer
//! - `error.rs` - Error types with user-friendly messages

mod autosave;
mod error;
mod io;

pub use autosave::{AutoSaveConfig, DirtyTracker, StateWriter};
pub use error::{PersistenceError, Result};
pub use io::{
    backup_path, load_state_file, load_state_file_async, save_state_file, save_state_file_async,
};
