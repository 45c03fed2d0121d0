// Frame I/O over any byte stream
//
// Stream reads may return fewer bytes than asked for, so every read here loops
// until the requested count is satisfied or the stream fails.
use nodelink_core::{
    declared_length, decode_frame, ProtocolError, RawFrame, LENGTH_FIELD_LEN,
};
use std::io::{self, ErrorKind, Read, Write};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// True when the stream itself is gone, not just this frame.
    pub fn is_connection_loss(&self) -> bool {
        match self {
            FrameError::ConnectionClosed => true,
            FrameError::Io(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::NotConnected
            ),
            FrameError::Protocol(_) => false,
        }
    }
}

/// Fill `buf` completely. Returns how many bytes were read before a clean
/// EOF, which is less than `buf.len()` only when the stream ended.
pub fn read_exact_bytes<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read one whole frame: two length bytes, then exactly `length - 2` more.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<RawFrame, FrameError> {
    let mut prefix = [0u8; LENGTH_FIELD_LEN];
    match read_exact_bytes(reader, &mut prefix)? {
        LENGTH_FIELD_LEN => {}
        0 => return Err(FrameError::ConnectionClosed),
        _ => return Err(truncated()),
    }

    let length = declared_length(prefix);
    if (length as usize) < LENGTH_FIELD_LEN {
        return Err(ProtocolError::InvalidLength(length).into());
    }

    let mut bytes = vec![0u8; length as usize];
    bytes[..LENGTH_FIELD_LEN].copy_from_slice(&prefix);
    let rest = length as usize - LENGTH_FIELD_LEN;
    if read_exact_bytes(reader, &mut bytes[LENGTH_FIELD_LEN..])? != rest {
        return Err(truncated());
    }

    trace!(length, "frame read");
    Ok(decode_frame(&bytes)?)
}

pub fn write_frame<W: Write + ?Sized>(writer: &mut W, frame: &RawFrame) -> Result<(), FrameError> {
    let bytes = frame.to_bytes()?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

fn truncated() -> FrameError {
    FrameError::Io(io::Error::new(
        ErrorKind::UnexpectedEof,
        "stream ended inside a frame",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodelink_core::{encode_frame, MessageType, SenderId};
    use std::io::Cursor;

    // Hands out at most `step` bytes per read call
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn trickle(data: Vec<u8>, step: usize) -> Trickle {
        Trickle { data, pos: 0, step }
    }

    #[test]
    fn random_frames_survive_the_stream() {
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        for _ in 0..200 {
            let sender = SenderId(rng.u64(..));
            let ty = MessageType::ALL[rng.usize(..MessageType::ALL.len())];
            let payload: Vec<u8> = (0..rng.usize(..2048)).map(|_| rng.u8(..)).collect();

            let bytes = encode_frame(sender, ty, &payload).unwrap();
            let frame = read_frame(&mut Cursor::new(bytes)).unwrap();
            assert_eq!(frame, RawFrame::new(sender, ty, payload));
        }
    }

    #[test]
    fn one_byte_reads_rebuild_the_same_frame() {
        let payload: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let bytes = encode_frame(SenderId(9), MessageType::CreateFile, &payload).unwrap();

        let whole = read_frame(&mut Cursor::new(bytes.clone())).unwrap();
        for step in [1, 2, 3, 7, 64] {
            let pieces = read_frame(&mut trickle(bytes.clone(), step)).unwrap();
            assert_eq!(pieces, whole);
        }
    }

    #[test]
    fn consecutive_frames_stay_aligned() {
        let mut stream = encode_frame(SenderId(1), MessageType::StatusOk, &[]).unwrap();
        stream.extend(encode_frame(SenderId(2), MessageType::StatusNotOk, &[5; 20]).unwrap());
        let mut reader = trickle(stream, 3);

        assert_eq!(read_frame(&mut reader).unwrap().message_type, MessageType::StatusOk);
        let second = read_frame(&mut reader).unwrap();
        assert_eq!(second.sender_id, SenderId(2));
        assert_eq!(second.payload, vec![5; 20]);
        assert!(matches!(read_frame(&mut reader), Err(FrameError::ConnectionClosed)));
    }

    #[test]
    fn length_below_two_is_rejected() {
        for prefix in [[0u8, 0], [1, 0]] {
            let err = read_frame(&mut Cursor::new(prefix.to_vec())).unwrap_err();
            assert!(matches!(err, FrameError::Protocol(ProtocolError::InvalidLength(_))));
        }
    }

    #[test]
    fn declared_length_shorter_than_header_is_rejected() {
        // declares 5 bytes: consumed whole, then refused by the decoder
        let err = read_frame(&mut Cursor::new(vec![5, 0, 1, 2, 3])).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Protocol(ProtocolError::FrameTooShort { actual: 5, .. })
        ));
    }

    #[test]
    fn stream_ending_mid_frame_is_eof() {
        let mut bytes = encode_frame(SenderId(1), MessageType::RequestFile, &[1; 40]).unwrap();
        bytes.truncate(30);
        let err = read_frame(&mut trickle(bytes, 4)).unwrap_err();
        assert!(err.is_connection_loss());

        let err = read_frame(&mut Cursor::new(vec![12])).unwrap_err();
        assert!(matches!(err, FrameError::Io(ref e) if e.kind() == ErrorKind::UnexpectedEof));
    }

    #[test]
    fn write_then_read() {
        let frame = RawFrame::new(SenderId::UNIDENTIFIED, MessageType::PresentItself, vec![]);
        let mut wire = Vec::new();
        write_frame(&mut wire, &frame).unwrap();
        assert_eq!(wire.len(), 11);
        assert_eq!(read_frame(&mut Cursor::new(wire)).unwrap(), frame);
    }
}
