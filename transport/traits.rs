// Transport abstraction - allows pluggable stream backends
use std::io::{self, ErrorKind, Read, Result, Write};

pub trait Transport: Send {
    fn send(&mut self, data: &[u8]) -> Result<usize>;
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn connect(&mut self) -> Result<()>;
    fn disconnect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Address of the remote end as it was dialled or accepted.
    fn peer_address(&self) -> &str;

    /// Second handle on the same stream. Lets one thread own the read side
    /// while writes keep going through `self`.
    fn try_clone(&self) -> Result<Box<dyn Transport>>;

    /// Shut the stream down in both directions. Blocked reads on any clone
    /// return immediately.
    fn shutdown(&self) -> Result<()>;

    /// Write the whole buffer, looping over partial writes.
    fn send_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            match self.send(data) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::WriteZero,
                        "transport accepted no bytes",
                    ))
                }
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

pub trait TransportListener: Send {
    type Connection: Transport;

    fn bind(&mut self) -> Result<()>;
    fn accept(&mut self) -> Result<Self::Connection>;

    /// Bound address; resolves port 0 to the port actually assigned.
    fn local_address(&self) -> Result<String>;
}

/// `Read`/`Write` view of a transport, for the frame codec and `io::copy`.
pub struct TransportIo<'a, T: Transport + ?Sized>(pub &'a mut T);

impl<T: Transport + ?Sized> Read for TransportIo<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.0.receive(buf)
    }
}

impl<T: Transport + ?Sized> Write for TransportIo<'_, T> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.0.send(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.0.send_all(buf)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
