// Node server: one thread per accepted peer, frames handled in arrival order
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use nodelink_core::{
    FileDeclaration, FileDescriptor, FileRequest, Message, MessageType, Payload, RawFrame,
    SenderId, CHUNK_SIZE,
};
use nodelink_transport::{
    read_exact_bytes, read_frame, FrameError, TcpTransport, TcpTransportListener, Transport,
    TransportIo, TransportListener,
};
use tracing::{debug, info, warn};

use crate::config::DaemonConfig;
use crate::error::DaemonError;
use crate::storage::Storage;

const EVENT_BACKLOG: usize = 1024;

/// What the node observed, in order, per peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    PeerConnected { peer: String },
    FrameReceived { peer: String, frame: RawFrame },
    PeerPresented { peer: String, sender: SenderId },
    FileStored { peer: String, name: String, size: u64 },
    FileServed { peer: String, name: String, size: u64 },
    RequestRefused { peer: String, name: String },
    PeerClosed { peer: String, error: Option<String> },
}

/// Fragment count announced for a file of `size` bytes.
pub fn fragment_count(size: u64) -> u8 {
    size.div_ceil(CHUNK_SIZE as u64).min(u8::MAX as u64) as u8
}

struct Node {
    storage: Storage,
    sender: SenderId,
    max_file_size: u64,
    next_file_id: AtomicU64,
    events: Sender<ServerEvent>,
}

impl Node {
    fn publish(&self, event: ServerEvent) {
        // observers are optional; a full backlog drops the event
        let _ = self.events.try_send(event);
    }

    fn send<S: Write + ?Sized>(&self, io: &mut S, payload: Payload) -> Result<(), DaemonError> {
        let bytes = Message::with_sender(self.sender, payload).encode()?;
        io.write_all(&bytes).map_err(DaemonError::Write)?;
        io.flush().map_err(DaemonError::Write)
    }

    fn read<S: Read + ?Sized>(&self, peer: &str, io: &mut S) -> Result<RawFrame, DaemonError> {
        let frame = read_frame(io)?;
        let len = frame.payload.len();
        debug!(peer, message_type = %frame.message_type, len, "frame received");
        self.publish(ServerEvent::FrameReceived {
            peer: peer.to_string(),
            frame: frame.clone(),
        });
        Ok(frame)
    }

    fn handle_next<S>(&self, peer: &str, io: &mut S) -> Result<(), DaemonError>
    where
        S: Read + Write + ?Sized,
    {
        let frame = self.read(peer, io)?;
        let message = Message::from_raw(&frame)?;

        match message.payload {
            Payload::PresentItself => {
                info!(peer, sender = %message.sender_id, "peer presented itself");
                self.publish(ServerEvent::PeerPresented {
                    peer: peer.to_string(),
                    sender: message.sender_id,
                });
                Ok(())
            }
            Payload::CreateFile(declaration) => self.receive_file(peer, io, declaration),
            Payload::RequestFile(request) => self.serve_file(peer, io, request),
            Payload::StatusOk | Payload::StatusNotOk => {
                info!(peer, status = %frame.message_type, "status received");
                Ok(())
            }
            Payload::RequestFileResponse(_) => {
                warn!(peer, "ignoring unsolicited file response");
                Ok(())
            }
        }
    }

    fn receive_file<S: Read + ?Sized>(
        &self,
        peer: &str,
        io: &mut S,
        declaration: FileDeclaration,
    ) -> Result<(), DaemonError> {
        let name = declaration.name.as_str();
        let size = declaration.size;
        if size > self.max_file_size {
            return Err(DaemonError::TooLarge {
                size,
                limit: self.max_file_size,
            });
        }

        // the body follows unframed, with no acknowledgement
        let mut data = vec![0u8; size as usize];
        let received = read_exact_bytes(io, &mut data).map_err(FrameError::Io)?;
        if received < data.len() {
            return Err(DaemonError::Truncated {
                received: received as u64,
                expected: size,
            });
        }

        let path = self.storage.store(&name, &data)?;
        info!(peer, name = %name, size, path = %path.display(), "file stored");
        self.publish(ServerEvent::FileStored {
            peer: peer.to_string(),
            name,
            size,
        });
        Ok(())
    }

    fn serve_file<S: Read + Write + ?Sized>(
        &self,
        peer: &str,
        io: &mut S,
        request: FileRequest,
    ) -> Result<(), DaemonError> {
        let name = request.name.as_str();
        let data = match self.storage.load(&name) {
            Ok(Some(data)) => data,
            Ok(None) | Err(DaemonError::InvalidName(_)) => {
                info!(peer, name = %name, "requested file not available");
                self.send(io, Payload::StatusNotOk)?;
                self.publish(ServerEvent::RequestRefused {
                    peer: peer.to_string(),
                    name,
                });
                return Ok(());
            }
            Err(e) => {
                self.send(io, Payload::StatusNotOk)?;
                return Err(e);
            }
        };

        let size = data.len() as u64;
        let descriptor = FileDescriptor {
            size,
            file_id: self.next_file_id.fetch_add(1, Ordering::Relaxed),
            fragment_count: fragment_count(size),
        };
        self.send(io, Payload::RequestFileResponse(descriptor))?;

        let reply = self.read(peer, io)?;
        match reply.message_type {
            MessageType::StatusOk => {}
            MessageType::StatusNotOk => {
                info!(peer, name = %name, "peer declined the transfer");
                return Ok(());
            }
            received => {
                return Err(DaemonError::UnexpectedReply {
                    expected: MessageType::StatusOk,
                    received,
                })
            }
        }

        for chunk in data.chunks(CHUNK_SIZE) {
            io.write_all(chunk).map_err(DaemonError::Write)?;
        }
        io.flush().map_err(DaemonError::Write)?;

        info!(peer, name = %name, size, file_id = descriptor.file_id, "file served");
        self.publish(ServerEvent::FileServed {
            peer: peer.to_string(),
            name,
            size,
        });
        Ok(())
    }

    fn serve_peer(&self, mut transport: TcpTransport) {
        let peer = transport.peer_address().to_string();
        info!(%peer, "peer connected");
        self.publish(ServerEvent::PeerConnected { peer: peer.clone() });

        let mut io = TransportIo(&mut transport);
        let error = loop {
            match self.handle_next(&peer, &mut io) {
                Ok(()) => {}
                Err(DaemonError::Frame(FrameError::ConnectionClosed)) => break None,
                Err(e) if e.is_fatal() => break Some(e),
                Err(e) => warn!(%peer, error = %e, "request failed"),
            }
        };

        match error {
            Some(ref e) => warn!(%peer, error = %e, "closing peer"),
            None => info!(%peer, "peer disconnected"),
        }
        let _ = transport.disconnect();
        self.publish(ServerEvent::PeerClosed {
            peer,
            error: error.map(|e| e.to_string()),
        });
    }
}

pub struct NodeServer {
    listener: TcpTransportListener,
    node: Arc<Node>,
    events: Receiver<ServerEvent>,
}

impl NodeServer {
    pub fn bind(config: DaemonConfig) -> Result<Self, DaemonError> {
        let storage = Storage::open(&config.storage_dir)?;

        let mut listener = TcpTransportListener::new(&config.address);
        listener.bind().map_err(|source| DaemonError::Bind {
            addr: config.address.clone(),
            source,
        })?;

        let (tx, rx) = channel::bounded(EVENT_BACKLOG);
        let node = Node {
            storage,
            sender: SenderId(config.node_id),
            max_file_size: config.max_file_size,
            next_file_id: AtomicU64::new(1),
            events: tx,
        };

        Ok(NodeServer {
            listener,
            node: Arc::new(node),
            events: rx,
        })
    }

    pub fn local_address(&self) -> Result<String, DaemonError> {
        self.listener.local_address().map_err(|source| DaemonError::Bind {
            addr: "unbound listener".to_string(),
            source,
        })
    }

    pub fn events(&self) -> Receiver<ServerEvent> {
        self.events.clone()
    }

    /// Accept peers forever.
    pub fn serve(mut self) {
        loop {
            let transport = match self.listener.accept() {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            let node = Arc::clone(&self.node);
            let spawned = thread::Builder::new()
                .name("nodelink-peer".to_string())
                .spawn(move || node.serve_peer(transport));
            if let Err(e) = spawned {
                warn!(error = %e, "cannot spawn peer thread");
            }
        }
    }

    /// Run `serve` on its own thread.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("nodelink-accept".to_string())
            .spawn(move || self.serve())
    }
}
