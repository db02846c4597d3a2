//! Protocol and transport errors.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::message::Serial;

/// The client sent something that cannot be reconciled with the
/// connection's registration table. Always fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("serial {0} is not registered on this connection")]
    UnknownSerial(Serial),

    #[error("serial {0} names an object, not a cell")]
    NotACell(Serial),

    #[error("binary frames are not accepted from clients")]
    UnexpectedBinary,
}

/// Failure driving a connection.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("connection I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("no object is exported at {0:?}")]
    UnknownRoot(String),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("client did not accept {frames} frames within {timeout:?}")]
    WriteTimeout { frames: usize, timeout: Duration },
}

pub type Result<T> = std::result::Result<T, StreamError>;
