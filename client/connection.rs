// Connection manager: owns the transport and the only reader on it
//
// One thread per live connection performs every read. Bytes go to whoever
// holds the read interest (an open `Exchange`), otherwise to the idle queue
// drained by `read_idle`. A read error or EOF on that thread is how loss of
// the peer is detected.
use std::fmt;
use std::io::{self, ErrorKind, Read};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Local};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use nodelink_core::{Message, RawFrame, CHUNK_SIZE};
use nodelink_transport::{read_frame, resolve_address, FrameError, TcpTransport, Transport};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Only held while a dial is in progress.
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

enum Inbound {
    Data(Vec<u8>),
    Closed,
}

struct Link {
    state: ConnectionState,
    remote: Option<String>,
    connected_at: Option<DateTime<Local>>,
    transport: Option<Box<dyn Transport>>,
    // bumped per connection so a stale reader cannot tear down its successor
    epoch: u64,
}

struct Shared {
    link: Mutex<Link>,
    interest: Mutex<Option<Sender<Inbound>>>,
    // second handle on the live stream; shutting it down never waits on `link`,
    // which a blocked write may be holding
    canceller: Mutex<Option<(u64, Box<dyn Transport>)>>,
}

impl Shared {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn interest(&self) -> MutexGuard<'_, Option<Sender<Inbound>>> {
        self.interest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn canceller(&self) -> MutexGuard<'_, Option<(u64, Box<dyn Transport>)>> {
        self.canceller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn interrupt(&self) -> bool {
        match *self.canceller() {
            Some((_, ref transport)) => transport.shutdown().is_ok(),
            None => false,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.link().state = state;
    }

    fn route(&self, bytes: Vec<u8>, idle: &Sender<Vec<u8>>) {
        let bytes = match *self.interest() {
            Some(ref tx) => match tx.send(Inbound::Data(bytes)) {
                Ok(()) => return,
                Err(channel::SendError(Inbound::Data(b))) => b,
                Err(_) => return,
            },
            None => bytes,
        };
        debug!(len = bytes.len(), "unsolicited bytes queued");
        let _ = idle.send(bytes);
    }

    /// Release the transport and reset to Disconnected. With `epoch` set,
    /// only acts if that connection is still the live one. Returns the
    /// address that was dropped.
    fn tear_down(&self, epoch: Option<u64>) -> Option<String> {
        let (remote, live) = {
            let mut link = self.link();
            if epoch.is_some_and(|e| e != link.epoch) {
                return None;
            }
            let mut transport = link.transport.take()?;
            let _ = transport.shutdown();
            let _ = transport.disconnect();
            link.state = ConnectionState::Disconnected;
            link.connected_at = None;
            (link.remote.take(), link.epoch)
        };

        {
            let mut canceller = self.canceller();
            if canceller.as_ref().is_some_and(|(e, _)| *e == live) {
                *canceller = None;
            }
        }

        if let Some(ref tx) = *self.interest() {
            let _ = tx.send(Inbound::Closed);
        }
        remote
    }
}

pub struct Connection {
    config: ClientConfig,
    shared: Arc<Shared>,
    idle: Receiver<Vec<u8>>,
    reader: Option<JoinHandle<()>>,
}

impl Connection {
    pub fn new(config: ClientConfig) -> Self {
        Connection {
            config,
            shared: Arc::new(Shared {
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    remote: None,
                    connected_at: None,
                    transport: None,
                    epoch: 0,
                }),
                interest: Mutex::new(None),
                canceller: Mutex::new(None),
            }),
            idle: channel::never(),
            reader: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Dial `address` (default port when omitted) and start the reader.
    /// Returns the normalised address.
    pub fn connect(&mut self, address: Option<&str>) -> Result<String, ClientError> {
        if let Some(remote) = self.remote_address() {
            return Err(ClientError::AlreadyConnected(remote));
        }
        let addr = resolve_address(address)
            .map_err(|e| ClientError::usage(format!("invalid address: {}", e)))?;

        info!(address = %addr, "connecting");
        self.shared.set_state(ConnectionState::Connecting);

        let mut transport = TcpTransport::with_options(&addr, self.config.tcp_options());
        if let Err(source) = transport.connect() {
            self.shared.set_state(ConnectionState::Disconnected);
            warn!(address = %addr, error = %source, "dial failed");
            return Err(ClientError::Dial { addr, source });
        }

        self.attach(Box::new(transport))?;
        Ok(addr)
    }

    /// Take ownership of an already connected transport.
    pub fn attach(&mut self, transport: Box<dyn Transport>) -> Result<(), ClientError> {
        let addr = transport.peer_address().to_string();
        let fail = |shared: &Shared, source: io::Error| {
            shared.set_state(ConnectionState::Disconnected);
            ClientError::Dial {
                addr: addr.clone(),
                source,
            }
        };

        if let Some(remote) = self.remote_address() {
            return Err(ClientError::AlreadyConnected(remote));
        }

        let handles = transport
            .try_clone()
            .and_then(|reader| Ok((reader, transport.try_clone()?)));
        let (reader, canceller) = match handles {
            Ok(handles) => handles,
            Err(e) => return Err(fail(&self.shared, e)),
        };

        // previous reader has already observed its own end
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }

        let (idle_tx, idle_rx) = channel::unbounded();
        let epoch = {
            let mut link = self.shared.link();
            link.epoch += 1;
            link.transport = Some(transport);
            link.state = ConnectionState::Connected;
            link.remote = Some(addr.clone());
            link.connected_at = Some(Local::now());
            link.epoch
        };
        *self.shared.canceller() = Some((epoch, canceller));
        self.idle = idle_rx;

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("nodelink-reader".to_string())
            .spawn(move || reader_loop(shared, epoch, reader, idle_tx));

        match spawned {
            Ok(handle) => {
                self.reader = Some(handle);
                info!(address = %addr, "connected");
                Ok(())
            }
            Err(e) => {
                self.shared.tear_down(Some(epoch));
                Err(fail(&self.shared, e))
            }
        }
    }

    /// Close the live connection. Fails with `NotConnected` when there is
    /// nothing to close.
    pub fn disconnect(&mut self) -> Result<String, ClientError> {
        let remote = self.shared.tear_down(None).ok_or(ClientError::NotConnected)?;
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        info!(address = %remote, "connection closed");
        Ok(remote)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.link().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn remote_address(&self) -> Option<String> {
        self.shared.link().remote.clone()
    }

    pub fn connected_since(&self) -> Option<DateTime<Local>> {
        self.shared.link().connected_at
    }

    pub fn status_line(&self) -> String {
        let link = self.shared.link();
        match (&link.remote, link.connected_at) {
            (Some(remote), Some(since)) => format!(
                "{}, connected to {} since {}",
                link.state,
                remote,
                since.format("%Y/%m/%d %H:%M:%S")
            ),
            _ => format!("{}, connected to: none", link.state),
        }
    }

    /// Write bytes verbatim, outside any framing.
    pub fn send_raw(&self, data: &[u8]) -> Result<usize, ClientError> {
        let mut link = self.shared.link();
        let transport = link.transport.as_mut().ok_or(ClientError::NotConnected)?;
        transport.send_all(data).map_err(ClientError::Write)?;
        Ok(data.len())
    }

    pub fn send_message(&self, message: &Message) -> Result<usize, ClientError> {
        let bytes = message.encode()?;
        debug!(message_type = %message.message_type(), len = bytes.len(), "sending frame");
        self.send_raw(&bytes)
    }

    /// Claim the read interest for one request/response operation.
    pub fn exchange(&self) -> Result<Exchange<'_>, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let (tx, rx) = channel::unbounded();
        {
            let mut interest = self.shared.interest();
            if interest.is_some() {
                return Err(ClientError::Busy);
            }
            *interest = Some(tx);
        }
        // a teardown between the first check and the claim never saw our sender
        if !self.is_connected() {
            *self.shared.interest() = None;
            return Err(ClientError::NotConnected);
        }

        // whatever arrived before the request cannot be its answer
        let stale: usize = self.idle.try_iter().map(|b| b.len()).sum();
        if stale > 0 {
            warn!(bytes = stale, "discarding unsolicited bytes");
        }

        Ok(Exchange {
            conn: self,
            rx,
            pending: Vec::new(),
            pos: 0,
            closed: false,
            desynced: false,
        })
    }

    /// Take one buffer of unsolicited bytes, waiting up to `timeout`.
    pub fn read_idle(&self, timeout: Duration) -> Result<Vec<u8>, ClientError> {
        if let Ok(bytes) = self.idle.try_recv() {
            return Ok(bytes);
        }
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        match self.idle.recv_timeout(timeout) {
            Ok(bytes) => Ok(bytes),
            Err(RecvTimeoutError::Timeout) => Err(ClientError::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(ClientError::ConnectionLost),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.tear_down(None);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

fn reader_loop(
    shared: Arc<Shared>,
    epoch: u64,
    mut reader: Box<dyn Transport>,
    idle: Sender<Vec<u8>>,
) {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match reader.receive(&mut buf) {
            Ok(0) => {
                debug!("reader reached end of stream");
                break;
            }
            Ok(n) => shared.route(buf[..n].to_vec(), &idle),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(error = %e, "reader failed");
                break;
            }
        }
    }

    if let Some(remote) = shared.tear_down(Some(epoch)) {
        warn!(address = %remote, "connection lost");
    }
}

/// Unblocks any pending read and drops the connection from another thread.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl CancelHandle {
    /// Returns false if there was no live connection.
    pub fn cancel(&self) -> bool {
        let interrupted = self.shared.interrupt();
        match self.shared.tear_down(None) {
            Some(remote) => {
                info!(address = %remote, "connection cancelled");
                true
            }
            None => interrupted,
        }
    }
}

/// Read interest held for the length of one request/response operation.
/// Released when dropped.
///
/// An exchange that stopped reading part way through a reply (deadline hit,
/// malformed frame) tears the connection down on drop. The rest of that
/// reply may still arrive and would otherwise be read as the next answer.
pub struct Exchange<'a> {
    conn: &'a Connection,
    rx: Receiver<Inbound>,
    pending: Vec<u8>,
    pos: usize,
    closed: bool,
    desynced: bool,
}

impl Exchange<'_> {
    pub fn send(&self, message: &Message) -> Result<usize, ClientError> {
        self.conn.send_message(message)
    }

    pub fn read_frame(&mut self) -> Result<RawFrame, ClientError> {
        read_frame(self).map_err(|e| {
            if !e.is_connection_loss() {
                self.desynced = true;
            }
            frame_error(e)
        })
    }

    /// True once the stream can no longer be trusted to start on a frame boundary.
    pub fn is_desynced(&self) -> bool {
        self.desynced
    }

    /// Give up on the rest of the reply. The connection is dropped with the
    /// exchange.
    pub fn abandon(&mut self) {
        self.desynced = true;
    }

    pub fn receive(&mut self) -> Result<(RawFrame, Message), ClientError> {
        let frame = self.read_frame()?;
        debug!(message_type = %frame.message_type, len = frame.encoded_len(), "frame received");
        let message = Message::from_raw(&frame)?;
        Ok((frame, message))
    }
}

impl Read for Exchange<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.pending.len() {
            if self.closed {
                return Ok(0);
            }
            match self.rx.recv_timeout(self.conn.config.read_timeout) {
                Ok(Inbound::Data(bytes)) => {
                    self.pending = bytes;
                    self.pos = 0;
                }
                Ok(Inbound::Closed) | Err(RecvTimeoutError::Disconnected) => {
                    self.closed = true;
                    return Ok(0);
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.desynced = true;
                    return Err(io::Error::new(ErrorKind::TimedOut, "peer did not answer in time"));
                }
            }
        }

        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Drop for Exchange<'_> {
    fn drop(&mut self) {
        *self.conn.shared.interest() = None;
        if self.desynced && !self.closed {
            if let Some(remote) = self.conn.shared.tear_down(None) {
                warn!(address = %remote, "dropping connection after an unfinished reply");
            }
        }
    }
}

pub(crate) fn frame_error(err: FrameError) -> ClientError {
    match err {
        FrameError::ConnectionClosed => ClientError::ConnectionLost,
        FrameError::Io(e) if e.kind() == ErrorKind::TimedOut => ClientError::TimedOut,
        FrameError::Io(e) if e.kind() == ErrorKind::UnexpectedEof => ClientError::ConnectionLost,
        other => ClientError::Frame(other),
    }
}
