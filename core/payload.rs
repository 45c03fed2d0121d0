// Typed payloads carried inside a frame, keyed by message type
use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::ProtocolError;
use crate::protocol::{encode_frame, RawFrame};
use crate::types::{FileName, MessageType, SenderId, FILE_NAME_WIDTH};

// File declaration: [name; 256][size u64] (264 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDeclaration {
    pub name: FileName,
    pub size: u64,
}

impl FileDeclaration {
    pub const LEN: usize = FILE_NAME_WIDTH + 8;

    pub fn new(name: FileName, size: u64) -> Self {
        FileDeclaration { name, size }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::LEN);
        bytes.extend_from_slice(&self.name.0);
        bytes.extend_from_slice(&self.size.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        check_len(MessageType::CreateFile, bytes, Self::LEN)?;
        Ok(FileDeclaration {
            name: read_name(bytes),
            size: read_u64(&bytes[FILE_NAME_WIDTH..]),
        })
    }
}

// File request: [name; 256]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRequest {
    pub name: FileName,
}

impl FileRequest {
    pub const LEN: usize = FILE_NAME_WIDTH;

    pub fn new(name: FileName) -> Self {
        FileRequest { name }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.name.0.to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        check_len(MessageType::RequestFile, bytes, Self::LEN)?;
        Ok(FileRequest {
            name: read_name(bytes),
        })
    }
}

// File descriptor: [size u64][file id u64][fragment count u8] (17 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDescriptor {
    pub size: u64,
    pub file_id: u64,
    pub fragment_count: u8,
}

impl FileDescriptor {
    pub const LEN: usize = 8 + 8 + 1;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::LEN);
        bytes.extend_from_slice(&self.size.to_le_bytes());
        bytes.extend_from_slice(&self.file_id.to_le_bytes());
        bytes.push(self.fragment_count);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        check_len(MessageType::RequestFileResponse, bytes, Self::LEN)?;
        Ok(FileDescriptor {
            size: read_u64(&bytes[0..8]),
            file_id: read_u64(&bytes[8..16]),
            fragment_count: bytes[16],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    PresentItself,
    CreateFile(FileDeclaration),
    RequestFile(FileRequest),
    RequestFileResponse(FileDescriptor),
    StatusOk,
    StatusNotOk,
}

type ParseFn = fn(&[u8]) -> Result<Payload, ProtocolError>;

// Message type -> payload parser. The frame decoder never looks inside a payload.
static PARSERS: Lazy<HashMap<MessageType, ParseFn>> = Lazy::new(|| {
    let mut table: HashMap<MessageType, ParseFn> = HashMap::new();
    table.insert(MessageType::PresentItself, |_| Ok(Payload::PresentItself));
    table.insert(MessageType::CreateFile, |b| {
        FileDeclaration::from_bytes(b).map(Payload::CreateFile)
    });
    table.insert(MessageType::RequestFile, |b| {
        FileRequest::from_bytes(b).map(Payload::RequestFile)
    });
    table.insert(MessageType::RequestFileResponse, |b| {
        FileDescriptor::from_bytes(b).map(Payload::RequestFileResponse)
    });
    table.insert(MessageType::StatusOk, |_| Ok(Payload::StatusOk));
    table.insert(MessageType::StatusNotOk, |_| Ok(Payload::StatusNotOk));
    table
});

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::PresentItself => MessageType::PresentItself,
            Payload::CreateFile(_) => MessageType::CreateFile,
            Payload::RequestFile(_) => MessageType::RequestFile,
            Payload::RequestFileResponse(_) => MessageType::RequestFileResponse,
            Payload::StatusOk => MessageType::StatusOk,
            Payload::StatusNotOk => MessageType::StatusNotOk,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::CreateFile(decl) => decl.to_bytes(),
            Payload::RequestFile(req) => req.to_bytes(),
            Payload::RequestFileResponse(desc) => desc.to_bytes(),
            Payload::PresentItself | Payload::StatusOk | Payload::StatusNotOk => Vec::new(),
        }
    }

    /// Bytes beyond a type's fixed layout are ignored; some nodes pad every
    /// frame to the size of their largest payload.
    pub fn parse(message_type: MessageType, bytes: &[u8]) -> Result<Self, ProtocolError> {
        match PARSERS.get(&message_type) {
            Some(parse) => parse(bytes),
            None => Err(ProtocolError::UnknownMessageType(message_type as u8)),
        }
    }
}

// A decoded frame with its payload interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender_id: SenderId,
    pub payload: Payload,
}

impl Message {
    /// Message from this client, which never has a network identity.
    pub fn new(payload: Payload) -> Self {
        Message {
            sender_id: SenderId::UNIDENTIFIED,
            payload,
        }
    }

    pub fn with_sender(sender_id: SenderId, payload: Payload) -> Self {
        Message { sender_id, payload }
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_frame(self.sender_id, self.message_type(), &self.payload.to_bytes())
    }

    pub fn from_raw(frame: &RawFrame) -> Result<Self, ProtocolError> {
        Ok(Message {
            sender_id: frame.sender_id,
            payload: Payload::parse(frame.message_type, &frame.payload)?,
        })
    }
}

fn check_len(
    message_type: MessageType,
    bytes: &[u8],
    expected: usize,
) -> Result<(), ProtocolError> {
    if bytes.len() < expected {
        return Err(ProtocolError::PayloadTooShort {
            message_type,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn read_name(bytes: &[u8]) -> FileName {
    let mut name = [0u8; FILE_NAME_WIDTH];
    name.copy_from_slice(&bytes[..FILE_NAME_WIDTH]);
    FileName::from_bytes(&name)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_frame;

    fn name(s: &str) -> FileName {
        FileName::new(s).unwrap()
    }

    #[test]
    fn declaration_layout() {
        let decl = FileDeclaration::new(name("a.txt"), 0x1122);
        let bytes = decl.to_bytes();
        assert_eq!(bytes.len(), FileDeclaration::LEN);
        assert_eq!(&bytes[..5], b"a.txt");
        assert_eq!(&bytes[256..258], &[0x22, 0x11]);
        assert_eq!(FileDeclaration::from_bytes(&bytes).unwrap(), decl);
    }

    #[test]
    fn every_payload_parses_back() {
        let payloads = [
            Payload::PresentItself,
            Payload::CreateFile(FileDeclaration::new(name("notes.md"), 9000)),
            Payload::RequestFile(FileRequest::new(name(&"z".repeat(FILE_NAME_WIDTH)))),
            Payload::RequestFileResponse(FileDescriptor {
                size: u64::MAX,
                file_id: 7,
                fragment_count: 3,
            }),
            Payload::StatusOk,
            Payload::StatusNotOk,
        ];
        for payload in payloads {
            let parsed = Payload::parse(payload.message_type(), &payload.to_bytes()).unwrap();
            assert_eq!(parsed, payload);
        }
    }

    #[test]
    fn empty_payloads_serialize_to_nothing() {
        assert!(Payload::PresentItself.to_bytes().is_empty());
        assert!(Payload::StatusOk.to_bytes().is_empty());
        assert!(Payload::StatusNotOk.to_bytes().is_empty());
    }

    #[test]
    fn short_descriptor_is_rejected() {
        let err = FileDescriptor::from_bytes(&[0u8; 16]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::PayloadTooShort {
                message_type: MessageType::RequestFileResponse,
                expected: 17,
                actual: 16
            }
        );
    }

    #[test]
    fn padded_payloads_are_accepted() {
        let desc = FileDescriptor {
            size: 10,
            file_id: 2,
            fragment_count: 1,
        };
        let mut bytes = desc.to_bytes();
        bytes.resize(264, 0);
        assert_eq!(
            Payload::parse(MessageType::RequestFileResponse, &bytes).unwrap(),
            Payload::RequestFileResponse(desc)
        );
        assert_eq!(
            Payload::parse(MessageType::StatusOk, &[0u8; 264]).unwrap(),
            Payload::StatusOk
        );
    }

    #[test]
    fn message_goes_through_a_frame() {
        let msg = Message::new(Payload::RequestFile(FileRequest::new(name("data.bin"))));
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.len(), 11 + FILE_NAME_WIDTH);

        let frame = decode_frame(&bytes).unwrap();
        assert!(frame.sender_id.is_unidentified());
        assert_eq!(Message::from_raw(&frame).unwrap(), msg);
    }

    #[test]
    fn presence_message_is_a_bare_header() {
        let bytes = Message::new(Payload::PresentItself).encode().unwrap();
        assert_eq!(bytes.len(), 11);
        assert_eq!(bytes[10], 1);
    }
}
