//! The state-stream protocol.
//!
//! Each connected client gets a [`StateStream`] that registers every
//! object and cell reachable from the root it asked for, subscribes to
//! them, and turns changes into a batched sequence of `register_*`,
//! `value`, `value_append` and `delete` messages, with bulk data sent as
//! separate binary frames.
//!
//! # Architecture
//!
//! - `stream.rs` - registration table, reference counting, update engine
//! - `message.rs` - outbound messages and the inbound `set` command
//! - `outbox.rs` - per-turn batching and binary bulk frames
//! - `pending.rs` - coalescing queue between subscriptions and the stream
//! - `codec.rs` - kind + length framing for byte streams
//! - `connection.rs` - async driver for one client connection
//! - `error.rs` - protocol and transport errors

mod codec;
mod connection;
mod error;
mod message;
mod outbox;
mod pending;
mod stream;

pub use codec::{MAX_FRAME_LEN, read_frame, write_frame};
pub use connection::{RootResolver, serve_connection};
pub use error::{ProtocolError, Result, StreamError};
pub use message::{Command, Message, ROOT_SERIAL, Serial};
pub use outbox::{Frame, encode_bulk_frame};
pub use stream::{StateStream, StreamConfig};
