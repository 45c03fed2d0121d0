// Core types shared by the codec, the transport and the client
use std::fmt;

use crate::error::ProtocolError;

// Wire layout constants
pub const LENGTH_FIELD_LEN: usize = 2;
pub const SENDER_ID_LEN: usize = 8;
pub const FRAME_HEADER_LEN: usize = LENGTH_FIELD_LEN + SENDER_ID_LEN + 1;
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Width of every fixed filename field on the wire.
pub const FILE_NAME_WIDTH: usize = 256;

/// Raw file content is streamed in slices of this size.
pub const CHUNK_SIZE: usize = 4096;

pub const DEFAULT_PORT: u16 = 52000;

// Sender ID (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId(pub u64);

impl SenderId {
    /// All-ones marks a client that has not been identified by the network.
    pub const UNIDENTIFIED: SenderId = SenderId(u64::MAX);

    pub fn is_unidentified(&self) -> bool {
        *self == Self::UNIDENTIFIED
    }
}

impl Default for SenderId {
    fn default() -> Self {
        Self::UNIDENTIFIED
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_unidentified() {
            write!(f, "unidentified")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

// Message type tag (1 byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    PresentItself = 1,
    CreateFile = 10,
    RequestFile = 15,
    RequestFileResponse = 16,
    StatusOk = 200,
    StatusNotOk = 220,
}

impl MessageType {
    pub const ALL: [MessageType; 6] = [
        MessageType::PresentItself,
        MessageType::CreateFile,
        MessageType::RequestFile,
        MessageType::RequestFileResponse,
        MessageType::StatusOk,
        MessageType::StatusNotOk,
    ];
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::PresentItself),
            10 => Ok(MessageType::CreateFile),
            15 => Ok(MessageType::RequestFile),
            16 => Ok(MessageType::RequestFileResponse),
            200 => Ok(MessageType::StatusOk),
            220 => Ok(MessageType::StatusNotOk),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MessageType::PresentItself => write!(f, "PresentItself"),
            MessageType::CreateFile => write!(f, "CreateFile"),
            MessageType::RequestFile => write!(f, "RequestFile"),
            MessageType::RequestFileResponse => write!(f, "RequestFileResponse"),
            MessageType::StatusOk => write!(f, "StatusOK"),
            MessageType::StatusNotOk => write!(f, "StatusNotOK"),
        }
    }
}

// File name (256 bytes, zero padded)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileName(pub [u8; FILE_NAME_WIDTH]);

impl FileName {
    /// Build a fixed-width name. Names longer than the field are rejected
    /// rather than truncated; a name of exactly `FILE_NAME_WIDTH` bytes is
    /// stored without a terminator.
    pub fn new(s: &str) -> Result<Self, ProtocolError> {
        let bytes = s.as_bytes();
        if bytes.is_empty() {
            return Err(ProtocolError::EmptyFileName);
        }
        if bytes.len() > FILE_NAME_WIDTH {
            return Err(ProtocolError::FileNameTooLong {
                len: bytes.len(),
                max: FILE_NAME_WIDTH,
            });
        }
        let mut name = [0u8; FILE_NAME_WIDTH];
        name[..bytes.len()].copy_from_slice(bytes);
        Ok(FileName(name))
    }

    pub fn from_bytes(bytes: &[u8; FILE_NAME_WIDTH]) -> Self {
        FileName(*bytes)
    }

    /// Logical length: bytes up to the first zero, or the whole field.
    pub fn len(&self) -> usize {
        self.0.iter().position(|&b| b == 0).unwrap_or(FILE_NAME_WIDTH)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_str(&self) -> String {
        String::from_utf8_lossy(&self.0[..self.len()]).to_string()
    }
}

impl fmt::Debug for FileName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("FileName").field(&self.as_str()).finish()
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_tags_match_wire_values() {
        assert_eq!(MessageType::PresentItself as u8, 1);
        assert_eq!(MessageType::CreateFile as u8, 10);
        assert_eq!(MessageType::RequestFile as u8, 15);
        assert_eq!(MessageType::RequestFileResponse as u8, 16);
        assert_eq!(MessageType::StatusOk as u8, 200);
        assert_eq!(MessageType::StatusNotOk as u8, 220);
        for ty in MessageType::ALL {
            assert_eq!(MessageType::try_from(ty as u8), Ok(ty));
        }
    }

    #[test]
    fn unknown_message_type_is_an_error() {
        assert_eq!(
            MessageType::try_from(2),
            Err(ProtocolError::UnknownMessageType(2))
        );
    }

    #[test]
    fn file_name_trims_padding() {
        let name = FileName::new("report.pdf").unwrap();
        assert_eq!(name.len(), 10);
        assert_eq!(name.as_str(), "report.pdf");
        assert!(name.0[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn file_name_at_exact_width_is_accepted() {
        let s = "a".repeat(FILE_NAME_WIDTH);
        let name = FileName::new(&s).unwrap();
        assert_eq!(name.len(), FILE_NAME_WIDTH);
        assert_eq!(name.as_str(), s);
    }

    #[test]
    fn file_name_over_width_is_rejected() {
        let s = "a".repeat(FILE_NAME_WIDTH + 1);
        assert_eq!(
            FileName::new(&s),
            Err(ProtocolError::FileNameTooLong {
                len: FILE_NAME_WIDTH + 1,
                max: FILE_NAME_WIDTH
            })
        );
        assert_eq!(FileName::new(""), Err(ProtocolError::EmptyFileName));
    }

    #[test]
    fn multibyte_names_are_measured_in_bytes() {
        // 128 two-byte characters fill the field exactly
        let s = "é".repeat(128);
        assert!(FileName::new(&s).is_ok());
        let s = "é".repeat(129);
        assert!(FileName::new(&s).is_err());
    }
}
