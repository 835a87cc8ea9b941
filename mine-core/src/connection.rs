//! Connection: session lifecycle, login, event registration, publish and receive.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ProtocolError};
use crate::inbound::{Delivery, InboundTransfer};
use crate::outbound::OutboundTransfer;
use crate::protocol::{ByteOrder, AUTH_FAIL};
use crate::session;
use crate::tls::TlsVerify;
use crate::transport::{Channel, Transport};
use crate::wire;

/// Connection settings. Every field has a default matching historical brokers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Byte order of payload lengths in data frames.
    pub byte_order: ByteOrder,
    /// Certificate policy when the broker asks for TLS.
    pub tls_verify: TlsVerify,
    /// Name checked against the broker certificate (defaults to the connect host).
    pub tls_server_name: Option<String>,
}

/// One broker session. Not for concurrent use: publish and consume on separate connections.
///
/// Every operation returns its own `Result`; the most recent failure is also
/// kept until [`Connection::take_last_error`] reads it.
pub struct Connection {
    config: ConnectionConfig,
    transport: Option<Transport>,
    outbound: OutboundTransfer,
    inbound: InboundTransfer,
    last_error: Option<Error>,
}

impl Connection {
    pub fn new() -> Self {
        Self::with_config(ConnectionConfig::default())
    }

    pub fn with_config(config: ConnectionConfig) -> Self {
        Self {
            config,
            transport: None,
            outbound: OutboundTransfer::new(),
            inbound: InboundTransfer::new(),
            last_error: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Replace the settings. Only allowed while disconnected, so a session
    /// never changes byte order or certificate policy midway.
    pub fn set_config(&mut self, config: ConnectionConfig) -> Result<(), Error> {
        if self.transport.is_some() {
            return self.record(Err(Error::system(
                "Cannot change settings of an open connection",
            )));
        }
        self.config = config;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// True when the broker upgraded this session to TLS.
    pub fn is_tls(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_tls)
    }

    pub fn outbound(&self) -> &OutboundTransfer {
        &self.outbound
    }

    pub fn inbound(&self) -> &InboundTransfer {
        &self.inbound
    }

    /// Most recent failure, if any.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Most recent failure, cleared by reading it.
    pub fn take_last_error(&mut self) -> Option<Error> {
        self.last_error.take()
    }

    /// Connect and run the selector handshake. No-op when already connected.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), Error> {
        if self.transport.is_some() {
            return Ok(());
        }
        let transport = self.record(session::open(host, port, &self.config))?;
        tracing::debug!(%host, port, tls = transport.is_tls(), "connected");
        self.transport = Some(transport);
        self.outbound = OutboundTransfer::new();
        self.inbound = InboundTransfer::new();
        Ok(())
    }

    /// Close the session. No-op when not connected. On a close failure the
    /// connection is still left disconnected.
    pub fn disconnect(&mut self) -> Result<(), Error> {
        let Some(transport) = self.transport.take() else {
            return Ok(());
        };
        self.outbound = OutboundTransfer::new();
        self.inbound = InboundTransfer::new();
        let result = transport.close();
        tracing::debug!(ok = result.is_ok(), "disconnected");
        self.record(result)
    }

    /// Send credentials and read the one-byte verdict.
    pub fn login(&mut self, login: Option<&str>, password: Option<&str>) -> Result<(), Error> {
        let result = self
            .channel()
            .and_then(|channel| authenticate(channel, login, password));
        if result.is_ok() {
            tracing::debug!("logged in");
        }
        self.record(result)
    }

    /// Subscribe to `event` coming from source address `ip` (dotted quad).
    /// The broker sends no acknowledgement.
    pub fn register_event(&mut self, event: &str, ip: &str) -> Result<(), Error> {
        let result = self
            .channel()
            .and_then(|channel| register(channel, event, ip));
        if result.is_ok() {
            tracing::debug!(%event, %ip, "event registered");
        }
        self.record(result)
    }

    /// Publish one chunk of a `total_len` payload for `event`. See [`OutboundTransfer::send`].
    pub fn send_event(&mut self, event: &str, total_len: u64, chunk: &[u8]) -> Result<(), Error> {
        let order = self.config.byte_order;
        let result = match self.transport.as_mut() {
            Some(transport) => self.outbound.send(transport, event, total_len, chunk, order),
            None => Err(ProtocolError::NotConnected.into()),
        };
        self.record(result)
    }

    /// Publish a whole payload in `chunk_size` pieces.
    pub fn send_payload(
        &mut self,
        event: &str,
        payload: &[u8],
        chunk_size: usize,
    ) -> Result<(), Error> {
        let total_len = payload.len() as u64;
        if payload.is_empty() {
            return self.send_event(event, 0, &[]);
        }
        for chunk in payload.chunks(chunk_size.max(1)) {
            self.send_event(event, total_len, chunk)?;
        }
        Ok(())
    }

    /// Receive at most one chunk into `buf`. See [`InboundTransfer::next`].
    pub fn recv_event(&mut self, buf: &mut [u8]) -> Result<Delivery<'_>, Error> {
        let order = self.config.byte_order;
        let Some(transport) = self.transport.as_mut() else {
            let e = Error::from(ProtocolError::NotConnected);
            self.last_error = Some(e.clone());
            return Err(e);
        };
        match self.inbound.next(transport, buf, order) {
            Ok(delivery) => Ok(delivery),
            Err(e) => {
                self.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    fn channel(&mut self) -> Result<&mut Transport, Error> {
        self.transport
            .as_mut()
            .ok_or_else(|| ProtocolError::NotConnected.into())
    }

    fn record<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(e) = &result {
            tracing::debug!(error = %e, "operation failed");
            self.last_error = Some(e.clone());
        }
        result
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            tracing::warn!(error = %e, "close on drop failed");
        }
    }
}

fn authenticate<C: Channel + ?Sized>(
    channel: &mut C,
    login: Option<&str>,
    password: Option<&str>,
) -> Result<(), Error> {
    let frame = wire::encode_auth(login, password)?;
    channel.send_all(&frame)?;
    if channel.recv_u8()? == AUTH_FAIL {
        return Err(ProtocolError::LoginFailed.into());
    }
    Ok(())
}

fn register<C: Channel + ?Sized>(channel: &mut C, event: &str, ip: &str) -> Result<(), Error> {
    let addr: Ipv4Addr = ip
        .parse()
        .map_err(|_| Error::system(format!("Invalid IPv4 address {ip:?}")))?;
    let frame = wire::encode_event_reg(event, addr)?;
    channel.send_all(&frame)
}
