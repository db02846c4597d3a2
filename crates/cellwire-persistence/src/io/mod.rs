//! State file I/O.

mod load;
mod save;

pub use load::{load_state_file, load_state_file_async};
pub use save::{backup_path, save_state_file, save_state_file_async};
