//! Error type shared by every connection operation.

use std::io;

/// Failure of a connection operation. Exactly one category applies.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// OS-level failure: resolve, connect, close, address parsing, plaintext I/O.
    #[error("{message}")]
    System { code: Option<i32>, message: String },
    /// Failure inside the TLS layer (config, handshake, encrypted I/O).
    #[error("{0}")]
    Tls(String),
    /// Peer or caller broke the framing rules.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Framing violations. Display texts are fixed and carry no numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Login failed")]
    LoginFailed,
    #[error("Incomplete data remain from previous event")]
    IncompleteTransfer,
    #[error("Unexpected protocol operation received")]
    UnexpectedOperation { opcode: u8 },
    #[error("Data received before event")]
    DataBeforeEvent,
    #[error("Event name longer than 255 bytes")]
    NameTooLong,
    #[error("Credential longer than 255 bytes")]
    CredentialTooLong,
    #[error("Chunk exceeds remaining payload length")]
    ChunkOverrun,
    #[error("Not connected")]
    NotConnected,
}

impl Error {
    pub fn system(message: impl Into<String>) -> Self {
        Error::System {
            code: None,
            message: message.into(),
        }
    }

    /// OS error code, present only for system failures that came from the OS.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::System { code, .. } => *code,
            _ => None,
        }
    }

    #[cfg(test)]
    fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::System {
            code: e.raw_os_error(),
            message: e.to_string(),
        }
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Error::Tls(e.to_string())
    }
}
