//! Dirty state tracking for auto-save.

use tokio::time::Instant;

use super::AutoSaveConfig;

/// Tracks unsaved changes and when they must be written.
///
/// Times are passed in rather than read from the clock so that the writer
/// task and tests agree on "now".
#[derive(Debug, Clone, Default)]
pub struct DirtyTracker {
    dirty: bool,

    /// When the most recent change was seen.
    last_change: Option<Instant>,

    /// When the oldest unsaved change was seen. Cleared by a save.
    first_unsaved_change: Option<Instant>,

    saving: bool,
}

impl DirtyTracker {
    /// Create a new tracker with no unsaved changes.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn is_saving(&self) -> bool {
        self.saving
    }

    pub fn mark_dirty(&mut self, now: Instant) {
        self.dirty = true;
        self.last_change = Some(now);
        self.first_unsaved_change.get_or_insert(now);
    }

    pub fn start_save(&mut self) {
        self.saving = true;
    }

    /// Mark that a save has completed successfully.
    ///
    /// A change seen while the save was running keeps the tracker dirty.
    pub fn save_complete(&mut self, started: Instant) {
        self.saving = false;
        if self.last_change.is_some_and(|t| t > started) {
            self.first_unsaved_change = self.last_change;
        } else {
            self.dirty = false;
            self.first_unsaved_change = None;
        }
    }

    /// Mark that a save has failed. The changes stay pending and the
    /// debounce restarts so a persistent failure is retried at that pace.
    pub fn save_failed(&mut self, now: Instant) {
        self.saving = false;
        self.last_change = Some(now);
        self.first_unsaved_change = Some(now);
    }

    /// When the pending changes must be written, if any are pending.
    pub fn save_due_at(&self, config: &AutoSaveConfig) -> Option<Instant> {
        if !self.dirty || self.saving || !config.enabled {
            return None;
        }
        let last = self.last_change?;
        let first = self.first_unsaved_change.unwrap_or(last);
        Some((last + config.debounce()).min(first + config.max_delay()))
    }

    pub fn should_auto_save(&self, config: &AutoSaveConfig, now: Instant) -> bool {
        self.save_due_at(config).is_some_and(|due| now >= due)
    }
}
