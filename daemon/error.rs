use std::io;
use std::path::PathBuf;

use nodelink_core::{MessageType, ProtocolError};
use nodelink_transport::FrameError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("invalid file name '{0}'")]
    InvalidName(String),

    #[error("{context} '{}': {source}", path.display())]
    Storage {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("peer sent {received} where {expected} was expected")]
    UnexpectedReply {
        expected: MessageType,
        received: MessageType,
    },

    #[error("peer closed the stream after {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },

    #[error("declared size {size} exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("write to peer failed: {0}")]
    Write(#[source] io::Error),
}

impl DaemonError {
    /// Errors after which the peer's stream cannot be trusted any more.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DaemonError::InvalidName(_) | DaemonError::Storage { .. })
    }
}
