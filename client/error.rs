// Client error taxonomy: every failure belongs to one of four classes
use std::io;
use std::path::PathBuf;

use nodelink_core::{MessageType, ProtocolError};
use nodelink_transport::FrameError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Dial failure, write failure, peer gone. Drives the state machine.
    Connection,
    /// Malformed frame or unexpected reply. Aborts the operation only.
    Protocol,
    /// Local filesystem failure.
    Io,
    /// Bad or missing arguments. Reported before any I/O.
    Usage,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0}")]
    Usage(String),

    #[error("not connected")]
    NotConnected,

    #[error("already connected to {0}")]
    AlreadyConnected(String),

    #[error("connection to {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connection lost")]
    ConnectionLost,

    #[error("another operation is already waiting for a reply")]
    Busy,

    #[error("timed out waiting for the peer")]
    TimedOut,

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("expected {expected}, received {received}")]
    UnexpectedMessage {
        expected: MessageType,
        received: MessageType,
    },

    #[error("peer refused request for '{name}'")]
    Refused { name: String },

    #[error("{context} '{}': {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },
}

impl ClientError {
    pub fn usage(msg: impl Into<String>) -> Self {
        ClientError::Usage(msg.into())
    }

    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        ClientError::Io {
            context,
            path: path.into(),
            source,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ClientError::Usage(_)
            | ClientError::AlreadyConnected(_)
            | ClientError::TooLarge { .. } => ErrorClass::Usage,
            ClientError::NotConnected
            | ClientError::Dial { .. }
            | ClientError::ConnectionLost
            | ClientError::TimedOut
            | ClientError::Write(_) => ErrorClass::Connection,
            ClientError::Frame(e) if e.is_connection_loss() => ErrorClass::Connection,
            ClientError::Frame(FrameError::Io(_)) => ErrorClass::Connection,
            ClientError::Frame(_)
            | ClientError::Protocol(_)
            | ClientError::UnexpectedMessage { .. }
            | ClientError::Refused { .. }
            | ClientError::Busy => ErrorClass::Protocol,
            ClientError::Io { .. } => ErrorClass::Io,
        }
    }
}
