//! Driving a [`StateStream`] over a byte-stream transport.
//!
//! The first text frame a client sends is the capability path naming the
//! object it wants; after that every text frame is a command. Reading
//! happens on a separate task so that a partially received frame is never
//! lost when the driver wakes up for a cell change instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cellwire_core::{BlockRef, Poller};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::codec::{read_frame, write_frame};
use crate::error::{ProtocolError, Result, StreamError};
use crate::outbox::Frame;
use crate::stream::{StateStream, StreamConfig};

/// Maps capability paths to exported roots.
pub trait RootResolver: Send + Sync {
    fn resolve(&self, path: &str) -> Option<BlockRef>;
}

impl RootResolver for HashMap<String, BlockRef> {
    fn resolve(&self, path: &str) -> Option<BlockRef> {
        self.get(path).cloned()
    }
}

const INBOUND_QUEUE: usize = 32;

enum Wake {
    Inbound(Option<Result<Frame>>),
    Update,
}

/// Serve one client until it disconnects or violates the protocol.
pub async fn serve_connection<S>(
    transport: S,
    resolver: Arc<dyn RootResolver>,
    poller: Poller,
    config: StreamConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(transport);
    let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_QUEUE);
    let read_task = tokio::spawn(read_loop(reader, inbound_tx));

    let result = drive(&mut inbound_rx, &mut writer, resolver.as_ref(), poller, config).await;
    read_task.abort();
    let _ = writer.shutdown().await;
    result
}

async fn drive<W: AsyncWrite + Unpin>(
    inbound: &mut mpsc::Receiver<Result<Frame>>,
    writer: &mut W,
    resolver: &dyn RootResolver,
    poller: Poller,
    config: StreamConfig,
) -> Result<()> {
    let path = match inbound.recv().await {
        None => return Ok(()),
        Some(Err(err)) => return Err(err),
        Some(Ok(Frame::Binary(_))) => return Err(ProtocolError::UnexpectedBinary.into()),
        Some(Ok(Frame::Text(path))) => path,
    };
    let Some(root) = resolver.resolve(&path) else {
        warn!(path = %path, "connection asked for an unknown root");
        return Err(StreamError::UnknownRoot(path));
    };
    info!(path = %path, "state stream opened");

    let timeout = config.write_timeout();
    let mut stream = StateStream::new(&root, &path, poller, config);
    flush(&mut stream, writer, timeout).await?;

    loop {
        let wake = tokio::select! {
            frame = inbound.recv() => Wake::Inbound(frame),
            () = stream.wait_for_update() => Wake::Update,
        };
        match wake {
            Wake::Inbound(None) => break,
            Wake::Inbound(Some(Err(err))) => return Err(err),
            Wake::Inbound(Some(Ok(Frame::Binary(_)))) => {
                return Err(ProtocolError::UnexpectedBinary.into());
            }
            Wake::Inbound(Some(Ok(Frame::Text(text)))) => {
                if let Err(err) = stream.handle_inbound(&text) {
                    error!(path = %path, error = %err, message = %text, "closing connection after protocol error");
                    return Err(err.into());
                }
            }
            Wake::Update => {}
        }
        // Let sibling updates from this scheduling turn land in one batch.
        tokio::task::yield_now().await;
        stream.process_pending();
        if let Err(err) = flush(&mut stream, writer, timeout).await {
            if matches!(err, StreamError::WriteTimeout { .. }) {
                warn!(path = %path, error = %err, "dropping stalled client");
            }
            return Err(err);
        }
    }

    info!(path = %path, "state stream closed by client");
    Ok(())
}

async fn flush<W: AsyncWrite + Unpin>(stream: &mut StateStream, writer: &mut W, timeout: Duration) -> Result<()> {
    let frames = stream.take_frames();
    if frames.is_empty() {
        return Ok(());
    }
    let write = async {
        for frame in &frames {
            write_frame(writer, frame).await?;
        }
        writer.flush().await?;
        Ok::<_, StreamError>(())
    };
    tokio::time::timeout(timeout, write)
        .await
        .map_err(|_| StreamError::WriteTimeout {
            frames: frames.len(),
            timeout,
        })??;
    debug!(frames = frames.len(), "frames sent");
    Ok(())
}

async fn read_loop<R: AsyncRead>(mut reader: ReadHalf<R>, inbound: mpsc::Sender<Result<Frame>>) {
    loop {
        let frame = read_frame(&mut reader).await;
        let stop = !matches!(frame, Ok(Some(_)));
        let item = match frame {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => break,
            Err(err) => Err(err),
        };
        if inbound.send(item).await.is_err() || stop {
            break;
        }
    }
}
