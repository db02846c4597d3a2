//! Debounced auto-save of an exported object tree.
//!
//! Provides:
//! - `AutoSaveConfig` - debounce settings, loadable from the server config
//! - `DirtyTracker` - decides when the next save is due
//! - `StateWriter` - background task that watches a root and writes it out

mod config;
mod tracker;
mod writer;

pub use config::AutoSaveConfig;
pub use tracker::DirtyTracker;
pub use writer::StateWriter;
