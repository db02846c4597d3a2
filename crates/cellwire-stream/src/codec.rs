//! Length-prefixed framing for byte-stream transports.
//!
//! ```text
//! +------+----------------+-----------------+
//! | kind | length (u32 LE)| payload         |
//! +------+----------------+-----------------+
//!   1 = text (UTF-8 JSON), 2 = binary
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Result, StreamError};
use crate::outbox::Frame;

pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const KIND_TEXT: u8 = 1;
const KIND_BINARY: u8 = 2;

/// Read one frame. Returns `None` on a clean end of stream between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let kind = match reader.read_u8().await {
        Ok(kind) => kind,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let len = reader.read_u32_le().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(StreamError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    match kind {
        KIND_TEXT => String::from_utf8(payload)
            .map(|text| Some(Frame::Text(text)))
            .map_err(|e| ProtocolError::Malformed(format!("text frame is not UTF-8: {e}")).into()),
        KIND_BINARY => Ok(Some(Frame::Binary(payload))),
        other => Err(ProtocolError::Malformed(format!("unknown frame kind {other}")).into()),
    }
}

/// Write one frame (without flushing).
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let (kind, payload) = match frame {
        Frame::Text(text) => (KIND_TEXT, text.as_bytes()),
        Frame::Binary(bytes) => (KIND_BINARY, bytes.as_slice()),
    };
    if payload.len() > MAX_FRAME_LEN {
        return Err(StreamError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    writer.write_u8(kind).await?;
    writer.write_u32_le(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_survive_the_wire() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &Frame::Text("[1]".into())).await.unwrap();
        write_frame(&mut a, &Frame::Binary(vec![9, 8])).await.unwrap();
        drop(a);
        assert_eq!(read_frame(&mut b).await.unwrap(), Some(Frame::Text("[1]".into())));
        assert_eq!(read_frame(&mut b).await.unwrap(), Some(Frame::Binary(vec![9, 8])));
        assert_eq!(read_frame(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_length_is_rejected_before_reading() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u8(KIND_BINARY).await.unwrap();
        a.write_u32_le(u32::MAX).await.unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(StreamError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u8(KIND_TEXT).await.unwrap();
        a.write_u32_le(10).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);
        assert!(matches!(read_frame(&mut b).await, Err(StreamError::Io(_))));
    }
}
