// Protocol-level failures: malformed frames, bad payloads, invalid field values
use thiserror::Error;

use crate::types::MessageType;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame too short: {actual} bytes, header needs {min}")]
    FrameTooShort { actual: usize, min: usize },

    #[error("invalid frame length {0}")]
    InvalidLength(u16),

    #[error("frame declares {declared} bytes but {actual} were supplied")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("frame of {0} bytes exceeds the 16-bit length field")]
    FrameTooLarge(usize),

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("{message_type} payload too short: expected {expected} bytes, got {actual}")]
    PayloadTooShort {
        message_type: MessageType,
        expected: usize,
        actual: usize,
    },

    #[error("file name is {len} bytes, maximum is {max}")]
    FileNameTooLong { len: usize, max: usize },

    #[error("file name is empty")]
    EmptyFileName,
}
