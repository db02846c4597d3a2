//! The TCP front end: restores state, serves connections, flushes on exit.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cellwire_core::{BlockRef, Poller, RestoreReport, StateJson};
use cellwire_persistence::{StateWriter, load_state_file_async};
use cellwire_stream::{RootResolver, StreamConfig, serve_connection};
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::capability::CapabilityTable;
use crate::config::ServerConfig;
use crate::demo::Demo;

const SPECTRUM_INTERVAL: Duration = Duration::from_millis(100);

/// A bound server, ready to [`Server::run`].
pub struct Server {
    listener: TcpListener,
    capability_path: String,
    resolver: Arc<dyn RootResolver>,
    poller: Poller,
    stream_config: StreamConfig,
    demo: Demo,
    writer: StateWriter,
}

impl Server {
    /// Build the control tree, restore its saved state and bind the listener.
    pub async fn bind(config: &ServerConfig) -> anyhow::Result<Self> {
        let poller = Poller::with_runtime(config.poller.to_poller_config(), Handle::current());
        let mut demo = Demo::new(&poller).context("building the control tree")?;
        demo.start(SPECTRUM_INTERVAL);

        let state_path = config.state_path()?;
        restore_state(demo.root(), &state_path).await;
        let writer = StateWriter::spawn(
            demo.root().clone(),
            state_path,
            &poller,
            config.autosave.clone(),
        );

        let mut capabilities = CapabilityTable::new();
        let token = match &config.capability {
            Some(token) => {
                capabilities.grant(token.clone(), demo.root().clone());
                token.clone()
            }
            None => capabilities.issue(demo.root().clone()),
        };

        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("binding {}", config.listen))?;

        Ok(Self {
            listener,
            capability_path: CapabilityTable::path_for(&token),
            resolver: Arc::new(capabilities),
            poller,
            stream_config: config.stream,
            demo,
            writer,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The path clients send to reach the control tree.
    pub fn capability_path(&self) -> &str {
        &self.capability_path
    }

    /// Accept connections until `shutdown` completes, then flush state.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let Self {
            listener,
            resolver,
            poller,
            stream_config,
            mut demo,
            writer,
            ..
        } = self;
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!(error = %err, "failed to accept connection");
                            continue;
                        }
                    };
                    if let Err(err) = socket.set_nodelay(true) {
                        debug!(%peer, error = %err, "could not disable Nagle");
                    }
                    info!(%peer, "connection accepted");
                    let connection = serve_connection(
                        socket,
                        Arc::clone(&resolver),
                        poller.clone(),
                        stream_config,
                    );
                    connections.spawn(
                        async move {
                            match connection.await {
                                Ok(()) => info!("connection closed"),
                                Err(err) => warn!(error = %err, "connection closed with error"),
                            }
                        }
                        .instrument(info_span!("connection", %peer)),
                    );
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        info!(open = connections.len(), "shutting down");
        connections.shutdown().await;
        demo.stop();
        let flushed = writer.shutdown().await.context("saving state");
        poller.shutdown();
        flushed
    }
}

/// Apply the saved snapshot at `path` to `root`.
///
/// Any problem with the file leaves the tree at its defaults; the next
/// write replaces the file (keeping the old one as the `~` backup).
pub async fn restore_state(root: &BlockRef, path: &Path) -> RestoreReport {
    match load_state_file_async(path.to_path_buf()).await {
        Ok(Some(snapshot)) => {
            let report = root.state_from_json(&snapshot);
            for (key, reason) in &report.skipped {
                warn!(key = %key, %reason, "saved setting not restored");
            }
            info!(
                path = %path.display(),
                applied = report.applied.len(),
                skipped = report.skipped.len(),
                "state restored"
            );
            report
        }
        Ok(None) => RestoreReport::default(),
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                suggestion = %err.suggestion().unwrap_or_default(),
                "could not load saved state; using defaults"
            );
            RestoreReport::default()
        }
    }
}
