// Frame codec - pure data structures, no I/O
//
// offset 0  : u16  total length (includes itself)
// offset 2  : u64  sender id
// offset 10 : u8   message type
// offset 11 : payload
//
// Both integer fields are little-endian.
use crate::error::ProtocolError;
use crate::types::{
    MessageType, SenderId, FRAME_HEADER_LEN, LENGTH_FIELD_LEN, MAX_FRAME_LEN, SENDER_ID_LEN,
};

// Complete frame with an opaque payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub sender_id: SenderId,
    pub message_type: MessageType,
    pub payload: Vec<u8>,
}

impl RawFrame {
    pub fn new(sender_id: SenderId, message_type: MessageType, payload: Vec<u8>) -> Self {
        RawFrame {
            sender_id,
            message_type,
            payload,
        }
    }

    /// Serialized size, length field included.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_frame(self.sender_id, self.message_type, &self.payload)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode_frame(bytes)
    }
}

pub fn encode_frame(
    sender_id: SenderId,
    message_type: MessageType,
    payload: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let total = FRAME_HEADER_LEN + payload.len();
    if total > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(total));
    }

    let mut bytes = Vec::with_capacity(total);
    bytes.extend_from_slice(&[0u8; LENGTH_FIELD_LEN]); // patched below
    bytes.extend_from_slice(&sender_id.0.to_le_bytes());
    bytes.push(message_type as u8);
    bytes.extend_from_slice(payload);

    let len = (bytes.len() as u16).to_le_bytes();
    bytes[..LENGTH_FIELD_LEN].copy_from_slice(&len);
    Ok(bytes)
}

/// Decode one complete frame held in a single buffer.
pub fn decode_frame(bytes: &[u8]) -> Result<RawFrame, ProtocolError> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(ProtocolError::FrameTooShort {
            actual: bytes.len(),
            min: FRAME_HEADER_LEN,
        });
    }

    let declared = declared_length([bytes[0], bytes[1]]) as usize;
    if declared != bytes.len() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: bytes.len(),
        });
    }

    let mut sender = [0u8; SENDER_ID_LEN];
    sender.copy_from_slice(&bytes[LENGTH_FIELD_LEN..LENGTH_FIELD_LEN + SENDER_ID_LEN]);
    let message_type = MessageType::try_from(bytes[FRAME_HEADER_LEN - 1])?;

    Ok(RawFrame {
        sender_id: SenderId(u64::from_le_bytes(sender)),
        message_type,
        payload: bytes[FRAME_HEADER_LEN..].to_vec(),
    })
}

pub fn declared_length(prefix: [u8; LENGTH_FIELD_LEN]) -> u16 {
    u16::from_le_bytes(prefix)
}
