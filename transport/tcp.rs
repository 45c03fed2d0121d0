// TCP transport implementation
use crate::traits::{Transport, TransportListener};
use nix::sys::socket::{setsockopt, sockopt};
use nodelink_core::DEFAULT_PORT;
use std::io::{Error, ErrorKind, Read, Result, Write};
use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_HOST: &str = "127.0.0.1";

/// Normalise a user-supplied address into `host:port`.
///
/// - missing or empty: `127.0.0.1:52000`
/// - `:port`: `127.0.0.1:port`
/// - `host`: `host:52000`
/// - `localhost` is spelled out as `127.0.0.1`
pub fn resolve_address(input: Option<&str>) -> Result<String> {
    let input = input.map(str::trim).unwrap_or("");
    if input.is_empty() {
        return Ok(format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT));
    }

    let (host, port) = match input.rsplit_once(':') {
        // bare IPv6 literals contain colons but no port
        Some((host, _)) if host.contains(':') && !host.ends_with(']') => (input, None),
        Some((host, port)) => (host, Some(port)),
        None => (input, None),
    };

    let port = match port {
        Some(p) => p.parse::<u16>().map_err(|_| {
            Error::new(ErrorKind::InvalidInput, format!("invalid port '{}'", p))
        })?,
        None => DEFAULT_PORT,
    };

    let host = match host {
        "" | "localhost" => DEFAULT_HOST,
        h => h,
    };

    if host.contains(':') && !host.starts_with('[') {
        Ok(format!("[{}]:{}", host, port))
    } else {
        Ok(format!("{}:{}", host, port))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TcpOptions {
    /// `None` blocks until the OS gives up.
    pub connect_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub keepalive: bool,
}

impl Default for TcpOptions {
    fn default() -> Self {
        TcpOptions {
            connect_timeout: None,
            write_timeout: None,
            keepalive: true,
        }
    }
}

pub struct TcpTransport {
    address: String,
    options: TcpOptions,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(address: &str) -> Self {
        Self::with_options(address, TcpOptions::default())
    }

    pub fn with_options(address: &str, options: TcpOptions) -> Self {
        TcpTransport {
            address: address.to_string(),
            options,
            stream: None,
        }
    }

    fn from_stream(stream: TcpStream, address: String) -> Self {
        TcpTransport {
            address,
            options: TcpOptions::default(),
            stream: Some(stream),
        }
    }

    fn stream(&self) -> Result<&TcpStream> {
        self.stream
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::NotConnected, "Not connected"))
    }

    fn dial(&self) -> Result<TcpStream> {
        let Some(timeout) = self.options.connect_timeout else {
            return TcpStream::connect(&self.address);
        };

        let mut last_err = None;
        for addr in self.address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            Error::new(ErrorKind::InvalidInput, "address resolved to nothing")
        }))
    }

    fn configure(&self, stream: &TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        stream.set_write_timeout(self.options.write_timeout)?;
        if self.options.keepalive {
            if let Err(e) = setsockopt(stream, sockopt::KeepAlive, &true) {
                // keepalive only speeds up loss detection
                warn!(address = %self.address, error = %e, "failed to enable keepalive");
            }
        }
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, data: &[u8]) -> Result<usize> {
        if let Some(ref mut stream) = self.stream {
            stream.write(data)
        } else {
            Err(Error::new(ErrorKind::NotConnected, "Not connected"))
        }
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let Some(ref mut stream) = self.stream {
            stream.read(buf)
        } else {
            Err(Error::new(ErrorKind::NotConnected, "Not connected"))
        }
    }

    fn connect(&mut self) -> Result<()> {
        let stream = self.dial()?;
        self.configure(&stream)?;
        debug!(address = %self.address, "tcp stream established");
        self.stream = Some(stream);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            // peer may already be gone
            let _ = stream.shutdown(Shutdown::Both);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn peer_address(&self) -> &str {
        &self.address
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>> {
        let clone = self.stream()?.try_clone()?;
        Ok(Box::new(TcpTransport {
            address: self.address.clone(),
            options: self.options,
            stream: Some(clone),
        }))
    }

    fn shutdown(&self) -> Result<()> {
        match self.stream()?.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

pub struct TcpTransportListener {
    address: String,
    listener: Option<TcpListener>,
}

impl TcpTransportListener {
    pub fn new(address: &str) -> Self {
        TcpTransportListener {
            address: address.to_string(),
            listener: None,
        }
    }
}

impl TransportListener for TcpTransportListener {
    type Connection = TcpTransport;

    fn bind(&mut self) -> Result<()> {
        let listener = TcpListener::bind(&self.address)?;
        self.listener = Some(listener);
        Ok(())
    }

    fn accept(&mut self) -> Result<TcpTransport> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::NotConnected, "Listener not bound"))?;
        let (stream, peer) = listener.accept()?;
        stream.set_nodelay(true)?;
        Ok(TcpTransport::from_stream(stream, peer.to_string()))
    }

    fn local_address(&self) -> Result<String> {
        match self.listener {
            Some(ref listener) => Ok(listener.local_addr()?.to_string()),
            None => Err(Error::new(ErrorKind::NotConnected, "Listener not bound")),
        }
    }
}
