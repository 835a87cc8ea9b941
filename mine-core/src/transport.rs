//! Transport: one byte stream over a raw socket or a TLS session on top of it.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

use rustls::ClientConnection;

use crate::error::Error;

const PEER_CLOSED: &str = "Connection closed by peer";

/// Ordered byte stream the framing state machines talk to.
///
/// `send` and `recv` return a positive count or an error for non-empty
/// buffers; a zero-byte transfer is reported as an error by implementors.
pub trait Channel {
    fn send(&mut self, bytes: &[u8]) -> Result<usize, Error>;

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error>;

    fn send_all(&mut self, mut bytes: &[u8]) -> Result<(), Error> {
        while !bytes.is_empty() {
            let n = self.send(bytes)?;
            bytes = &bytes[n..];
        }
        Ok(())
    }

    fn recv_exact(&mut self, mut buf: &mut [u8]) -> Result<(), Error> {
        while !buf.is_empty() {
            let n = self.recv(buf)?;
            buf = &mut buf[n..];
        }
        Ok(())
    }

    fn recv_u8(&mut self) -> Result<u8, Error> {
        let mut b = [0u8; 1];
        self.recv_exact(&mut b)?;
        Ok(b[0])
    }
}

/// Connected socket plus the TLS session riding on it, if one was negotiated.
///
/// The TLS session never owns the socket: each I/O call borrows both, so
/// dropping the session leaves the socket open until `close`.
pub struct Transport {
    socket: TcpStream,
    tls: Option<ClientConnection>,
}

impl Transport {
    pub fn plain(socket: TcpStream) -> Self {
        Self { socket, tls: None }
    }

    pub fn tls(socket: TcpStream, session: ClientConnection) -> Self {
        Self {
            socket,
            tls: Some(session),
        }
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Tear down: TLS close_notify (best effort), then shut the socket down.
    /// The socket is closed when `self` drops regardless of the result.
    pub fn close(mut self) -> Result<(), Error> {
        if let Some(mut session) = self.tls.take() {
            session.send_close_notify();
            if let Err(e) = session.complete_io(&mut self.socket) {
                tracing::warn!(error = %e, "tls close_notify not delivered");
            }
        }
        match self.socket.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn fail(&self, e: io::Error) -> Error {
        if self.tls.is_some() {
            Error::Tls(e.to_string())
        } else {
            e.into()
        }
    }

    fn closed(&self) -> Error {
        if self.tls.is_some() {
            Error::Tls(PEER_CLOSED.to_string())
        } else {
            Error::system(PEER_CLOSED)
        }
    }
}

impl Channel for Transport {
    fn send(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        if bytes.is_empty() {
            return Ok(0);
        }
        loop {
            let result = match self.tls.as_mut() {
                Some(session) => {
                    let mut stream = rustls::Stream::new(session, &mut self.socket);
                    stream.write(bytes).and_then(|n| stream.flush().map(|()| n))
                }
                // std sends with MSG_NOSIGNAL: a broken pipe is EPIPE, not SIGPIPE.
                None => self.socket.write(bytes),
            };
            return match result {
                Ok(0) => Err(self.closed()),
                Ok(n) => Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(self.fail(e)),
            };
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let result = match self.tls.as_mut() {
                Some(session) => rustls::Stream::new(session, &mut self.socket).read(buf),
                None => self.socket.read(buf),
            };
            return match result {
                Ok(0) => Err(self.closed()),
                Ok(n) => Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(self.fail(e)),
            };
        }
    }
}
