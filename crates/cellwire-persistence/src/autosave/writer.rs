//! Background writer that keeps a state file in step with a root object.
//!
//! The root's snapshot is registered with the poller as a slow-cadence
//! source of its own, so the writer hears about a change only when the
//! snapshot actually differs. Changes are debounced through
//! [`DirtyTracker`] and the file is always written once more on shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use cellwire_core::{
    BlockRef, Cadence, CellEvent, CellValue, PollTarget, Poller, SourceId, StateJson, callback,
};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{AutoSaveConfig, DirtyTracker};
use crate::error::{PersistenceError, Result};
use crate::io::save_state_file_async;

/// Handle to a running state writer task.
pub struct StateWriter {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl StateWriter {
    /// Start writing `root` to `path` whenever its snapshot changes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(root: BlockRef, path: PathBuf, poller: &Poller, config: AutoSaveConfig) -> Self {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let source = root.clone();
        let target = PollTarget::new(
            SourceId::next(),
            Arc::new(move || Ok(CellValue::Value(Value::Object(source.state_to_json())))),
        );
        let (_, subscription) = poller.subscribe(
            target,
            Cadence::Slow,
            callback(move |event| {
                if let CellEvent::Changed(CellValue::Value(Value::Object(snapshot))) = event {
                    // The writer may already be flushing; nothing to do then.
                    let _ = changes_tx.send(snapshot);
                }
            }),
        );
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        info!(
            path = %path.display(),
            enabled = config.enabled,
            debounce_ms = config.debounce_ms,
            "state writer started"
        );
        let task = tokio::spawn(async move {
            let mut task = WriterTask {
                root,
                path,
                config,
                tracker: DirtyTracker::new(),
                pending: None,
            };
            task.watch(changes_rx, shutdown_rx).await;
            drop(subscription);
            task.flush().await
        });

        Self {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// Stop watching, write the current state one last time and wait for it.
    ///
    /// Dropping the handle instead also stops the watch loop; the final
    /// write then completes in the background.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task
            .await
            .map_err(|source| PersistenceError::Task {
                operation: "state writer",
                source,
            })?
    }
}

struct WriterTask {
    root: BlockRef,
    path: PathBuf,
    config: AutoSaveConfig,
    tracker: DirtyTracker,
    /// Latest snapshot not yet written.
    pending: Option<Map<String, Value>>,
}

impl WriterTask {
    async fn watch(
        &mut self,
        mut changes: mpsc::UnboundedReceiver<Map<String, Value>>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        loop {
            let due = self.tracker.save_due_at(&self.config);
            tokio::select! {
                _ = &mut shutdown => break,
                change = changes.recv() => match change {
                    Some(snapshot) => {
                        debug!("state changed");
                        self.pending = Some(snapshot);
                        self.tracker.mark_dirty(Instant::now());
                    }
                    None => break,
                },
                () = tokio::time::sleep_until(due.unwrap_or_else(Instant::now)), if due.is_some() => {
                    if let Some(snapshot) = self.pending.take() {
                        // Failures are logged and retried by the tracker.
                        let _ = self.save(snapshot).await;
                    }
                }
            }
        }
    }

    async fn save(&mut self, snapshot: Map<String, Value>) -> Result<()> {
        let started = Instant::now();
        self.tracker.start_save();
        match save_state_file_async(snapshot.clone(), self.path.clone()).await {
            Ok(()) => {
                self.tracker.save_complete(started);
                debug!(path = %self.path.display(), "state written");
                Ok(())
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    suggestion = %err.suggestion().unwrap_or_default(),
                    "failed to write state"
                );
                self.tracker.save_failed(Instant::now());
                self.pending.get_or_insert(snapshot);
                Err(err)
            }
        }
    }

    async fn flush(mut self) -> Result<()> {
        let snapshot = self.root.state_to_json();
        self.save(snapshot).await?;
        info!(path = %self.path.display(), "state flushed");
        Ok(())
    }
}

