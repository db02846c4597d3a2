//! Outbound frames and per-turn batching.
//!
//! JSON messages accumulate until the connection flushes them as a single
//! text frame holding an array of messages. A binary frame forces pending
//! JSON out first so the client observes messages in the order they were
//! produced.

use cellwire_core::BulkChunk;
use cellwire_core::types::BulkDataT;
use serde_json::Value;

use crate::message::{Message, Serial};

/// One transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Encode a bulk chunk: serial (u32 LE), info packed per the info format,
/// then the raw array bytes.
///
/// Returns `None` when the chunk's info values do not match the format or
/// the serial does not fit the header.
pub fn encode_bulk_frame(serial: Serial, bulk_type: &BulkDataT, chunk: &BulkChunk) -> Option<Vec<u8>> {
    let serial = u32::try_from(serial).ok()?;
    let info = bulk_type.info_format.pack(&chunk.info)?;
    let mut out = Vec::with_capacity(4 + info.len() + chunk.data.len());
    out.extend_from_slice(&serial.to_le_bytes());
    out.extend_from_slice(&info);
    out.extend_from_slice(&chunk.data);
    Some(out)
}

#[derive(Debug, Default)]
pub(crate) struct Outbox {
    pending: Vec<Value>,
    frames: Vec<Frame>,
}

impl Outbox {
    pub(crate) fn push(&mut self, message: &Message) {
        self.pending.push(message.to_json());
    }

    pub(crate) fn push_binary(&mut self, bytes: Vec<u8>) {
        self.flush();
        self.frames.push(Frame::Binary(bytes));
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = Value::Array(std::mem::take(&mut self.pending));
        self.frames.push(Frame::Text(batch.to_string()));
    }

    pub(crate) fn take_frames(&mut self) -> Vec<Frame> {
        self.flush();
        std::mem::take(&mut self.frames)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn binary_flushes_pending_json_first() {
        let mut outbox = Outbox::default();
        outbox.push(&Message::Delete { serial: 3 });
        outbox.push_binary(vec![1, 2]);
        outbox.push(&Message::Delete { serial: 4 });
        let frames = outbox.take_frames();
        assert_eq!(
            frames,
            vec![
                Frame::Text(json!([["delete", 3]]).to_string()),
                Frame::Binary(vec![1, 2]),
                Frame::Text(json!([["delete", 4]]).to_string()),
            ]
        );
        assert!(outbox.take_frames().is_empty());
    }

    #[test]
    fn bulk_frame_layout() {
        let t = BulkDataT::new("dd", "b").unwrap();
        let chunk = BulkChunk::new(vec![100.0, 2.5], vec![7u8, 8, 9]);
        let bytes = encode_bulk_frame(5, &t, &chunk).unwrap();
        assert_eq!(&bytes[..4], &5u32.to_le_bytes());
        assert_eq!(&bytes[4..12], &100.0f64.to_le_bytes());
        assert_eq!(&bytes[12..20], &2.5f64.to_le_bytes());
        assert_eq!(&bytes[20..], &[7, 8, 9]);
        assert!(encode_bulk_frame(5, &t, &BulkChunk::new(vec![1.0], Vec::<u8>::new())).is_none());
    }
}
