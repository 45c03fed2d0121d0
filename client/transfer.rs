// File transfer engine: upload and download over a live connection
//
// Upload:   CreateFile(name, size) then the content as raw 4096-byte writes,
//           no acknowledgement per chunk.
// Download: RequestFile(name) -> RequestFileResponse(size, id, fragments),
//           StatusOK, then exactly `size` raw bytes.
use std::fmt;
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::ops::Range;
use std::path::{Path, PathBuf};

use nodelink_core::{
    FileDeclaration, FileDescriptor, FileName, FileRequest, Message, MessageType, Payload,
    ProtocolError, CHUNK_SIZE,
};
use nodelink_transport::FrameError;
use tracing::{debug, info};

use crate::connection::{frame_error, Connection};
use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Declared { name: String, size: u64, chunks: usize },
    ChunkSent { index: usize, total: usize },
    Described(FileDescriptor),
    Received { received: u64, expected: u64 },
    Saved { path: PathBuf, size: u64 },
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Progress::Declared { name, size, chunks } => {
                write!(f, "Sending '{}' ({} bytes, {} parts)", name, size, chunks)
            }
            Progress::ChunkSent { index, total } => write!(f, "Part {}/{}", index, total),
            Progress::Described(desc) => write!(
                f,
                "File #{}: {} bytes in {} fragments",
                desc.file_id, desc.size, desc.fragment_count
            ),
            Progress::Received { received, expected } => write!(
                f,
                "Received {}% ({}/{} bytes)",
                percent(*received, *expected),
                received,
                expected
            ),
            Progress::Saved { path, size } => {
                write!(f, "Saved {} bytes to {}", size, path.display())
            }
        }
    }
}

pub trait ProgressSink {
    fn report(&mut self, event: Progress);
}

impl<F: FnMut(Progress)> ProgressSink for F {
    fn report(&mut self, event: Progress) {
        self(event)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub name: String,
    /// Source file for uploads, saved file for downloads.
    pub path: PathBuf,
    pub size: u64,
    /// Chunks written for uploads, fragments declared by the peer for downloads.
    pub chunks: usize,
}

pub fn percent(done: u64, total: u64) -> u64 {
    if total == 0 {
        100
    } else {
        (done as u128 * 100 / total as u128) as u64
    }
}

/// Byte ranges of `len` split into `chunk`-sized pieces, the last one shorter.
pub fn plan_chunks(len: usize, chunk: usize) -> impl Iterator<Item = Range<usize>> {
    let chunk = chunk.max(1);
    (0..len).step_by(chunk).map(move |start| start..(start + chunk).min(len))
}

pub fn chunk_count(len: usize) -> usize {
    len.div_ceil(CHUNK_SIZE)
}

/// Hand `data` to `write` one chunk at a time. Stops at the first failure.
pub fn send_chunks<E>(
    data: &[u8],
    mut write: impl FnMut(&[u8]) -> Result<(), E>,
    sink: &mut dyn ProgressSink,
) -> Result<usize, E> {
    let total = chunk_count(data.len());
    for (i, range) in plan_chunks(data.len(), CHUNK_SIZE).enumerate() {
        write(&data[range])?;
        sink.report(Progress::ChunkSent {
            index: i + 1,
            total,
        });
    }
    Ok(total)
}

/// Read exactly `size` bytes, however the reader slices them.
pub fn receive_exact<R: Read + ?Sized>(
    reader: &mut R,
    size: u64,
    sink: &mut dyn ProgressSink,
) -> Result<Vec<u8>, ClientError> {
    let size = usize::try_from(size).map_err(|_| ClientError::TooLarge {
        size,
        limit: usize::MAX as u64,
    })?;
    let mut data = vec![0u8; size];
    let mut filled = 0;

    while filled < size {
        let end = (filled + CHUNK_SIZE).min(size);
        match reader.read(&mut data[filled..end]) {
            Ok(0) => return Err(ClientError::ConnectionLost),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(frame_error(FrameError::Io(e))),
        }
        sink.report(Progress::Received {
            received: filled as u64,
            expected: size as u64,
        });
    }
    Ok(data)
}

/// Reject names that could escape the destination directory.
pub fn validate_remote_name(name: &str) -> Result<(), ClientError> {
    if name.is_empty() {
        return Err(ClientError::usage("usage: request file <name> [destination]"));
    }
    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(ClientError::usage(format!(
            "invalid file name '{}': must not contain path separators",
            name
        )));
    }
    Ok(())
}

fn fixed_name(name: &str) -> Result<FileName, ClientError> {
    FileName::new(name).map_err(|e| match e {
        ProtocolError::FileNameTooLong { len, max } => ClientError::usage(format!(
            "file name '{}' is {} bytes, the limit is {}",
            name, len, max
        )),
        other => ClientError::Protocol(other),
    })
}

/// Send a local file. The whole file is buffered before the first byte goes
/// out, so a read failure never leaves the peer waiting on a declared size.
pub fn upload(
    conn: &Connection,
    path: &Path,
    sink: &mut dyn ProgressSink,
) -> Result<TransferReport, ClientError> {
    if !conn.is_connected() {
        return Err(ClientError::NotConnected);
    }

    let mut file = File::open(path).map_err(|e| ClientError::io("cannot open", path, e))?;
    let meta = file
        .metadata()
        .map_err(|e| ClientError::io("cannot stat", path, e))?;
    if !meta.is_file() {
        let reason = format!("'{}' is not a regular file", path.display());
        return Err(ClientError::usage(reason));
    }

    let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        ClientError::usage(format!("'{}' has no usable file name", path.display()))
    })?;
    let file_name = fixed_name(name)?;

    let limit = conn.config().max_file_size;
    if meta.len() > limit {
        return Err(ClientError::TooLarge {
            size: meta.len(),
            limit,
        });
    }

    let mut buffer = Vec::with_capacity(meta.len() as usize);
    file.read_to_end(&mut buffer)
        .map_err(|e| ClientError::io("cannot read", path, e))?;
    let size = buffer.len() as u64;

    let declaration = FileDeclaration::new(file_name, size);
    conn.send_message(&Message::new(Payload::CreateFile(declaration)))?;
    let total = chunk_count(buffer.len());
    sink.report(Progress::Declared {
        name: name.to_string(),
        size,
        chunks: total,
    });
    info!(name, size, chunks = total, "upload started");

    let sent = send_chunks(&buffer, |chunk| conn.send_raw(chunk).map(|_| ()), sink)?;
    info!(name, size, "upload finished");

    Ok(TransferReport {
        name: name.to_string(),
        path: path.to_path_buf(),
        size,
        chunks: sent,
    })
}

/// Ask the peer for `name` and store it under `destination` (or the
/// configured download directory).
pub fn download(
    conn: &Connection,
    name: &str,
    destination: Option<&Path>,
    sink: &mut dyn ProgressSink,
) -> Result<TransferReport, ClientError> {
    validate_remote_name(name)?;
    let file_name = fixed_name(name)?;
    let destination = destination.unwrap_or(conn.config().download_dir.as_path());

    let mut exchange = conn.exchange()?;
    exchange.send(&Message::new(Payload::RequestFile(FileRequest::new(file_name))))?;

    let frame = exchange.read_frame()?;
    let descriptor = match frame.message_type {
        MessageType::RequestFileResponse => FileDescriptor::from_bytes(&frame.payload)?,
        MessageType::StatusNotOk => {
            return Err(ClientError::Refused {
                name: name.to_string(),
            })
        }
        received => {
            return Err(ClientError::UnexpectedMessage {
                expected: MessageType::RequestFileResponse,
                received,
            })
        }
    };
    debug!(?descriptor, "file described");
    sink.report(Progress::Described(descriptor));

    let limit = conn.config().max_file_size;
    if descriptor.size > limit {
        exchange.send(&Message::new(Payload::StatusNotOk))?;
        return Err(ClientError::TooLarge {
            size: descriptor.size,
            limit,
        });
    }

    exchange.send(&Message::new(Payload::StatusOk))?;
    let data = match receive_exact(&mut exchange, descriptor.size, sink) {
        Ok(data) => data,
        Err(e) => {
            exchange.abandon();
            return Err(e);
        }
    };
    drop(exchange);

    fs::create_dir_all(destination)
        .map_err(|e| ClientError::io("cannot create directory", destination, e))?;
    let path = destination.join(name);
    fs::write(&path, &data).map_err(|e| ClientError::io("cannot write", &path, e))?;

    sink.report(Progress::Saved {
        path: path.clone(),
        size: descriptor.size,
    });
    info!(name, size = descriptor.size, path = %path.display(), "download finished");

    Ok(TransferReport {
        name: name.to_string(),
        path,
        size: descriptor.size,
        chunks: descriptor.fragment_count as usize,
    })
}
