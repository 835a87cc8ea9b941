//! MINE event-transport client.
//! One blocking TCP session per `Connection`, upgraded to TLS when the broker asks;
//! payloads of any size are published and received in caller-sized chunks.

pub mod connection;
pub mod error;
pub mod inbound;
pub mod outbound;
pub mod protocol;
pub mod session;
pub mod tls;
pub mod transport;
pub mod wire;

pub use connection::{Connection, ConnectionConfig};
pub use error::{Error, ProtocolError};
pub use inbound::Delivery;
pub use protocol::{ByteOrder, Protocol, DEFAULT_CHUNK_SIZE};
pub use tls::TlsVerify;

// C ABI for static linking from C hosts.
pub mod ffi;
