//! MINE wire protocol: opcodes, handshake selector and sentinels.

use serde::{Deserialize, Serialize};

/// Handshake selector: broker keeps talking plaintext.
pub const SELECTOR_PLAIN: u8 = 0;
/// Handshake selector: broker expects a TLS client handshake next.
pub const SELECTOR_TLS: u8 = 1;

/// Auth response byte meaning the credentials were rejected. Anything else is success.
pub const AUTH_FAIL: u8 = 0;

/// Longest event name or credential a `u8` length prefix can describe.
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Receive buffer size used by drivers that don't pick their own.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Control byte at the start of every frame after authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// `[0][length:u64]` followed by the payload bytes.
    Data = 0,
    /// `[2][len:u8][name]`: the event owning the next data frame. Same byte both directions.
    EventName = 2,
    /// `[3][len:u8][name][ipv4:4]`: subscribe to an event from a source address.
    EventReg = 3,
}

impl Opcode {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Opcode::Data),
            2 => Some(Opcode::EventName),
            3 => Some(Opcode::EventReg),
            _ => None,
        }
    }
}

/// Transport negotiated by the handshake selector byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Plain,
    Tls,
}

impl Protocol {
    pub fn from_selector(byte: u8) -> Option<Self> {
        match byte {
            SELECTOR_PLAIN => Some(Protocol::Plain),
            SELECTOR_TLS => Some(Protocol::Tls),
            _ => None,
        }
    }
}

/// Byte order of the 8-byte payload length in data frames.
///
/// Historically brokers and clients wrote the length in host order, so two
/// little-endian machines interoperate and anything else is undefined.
/// `Native` keeps that behavior; pick `Little` or `Big` to pin the order
/// when the broker runs on a known architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Native,
    Little,
    Big,
}

impl ByteOrder {
    pub fn encode_u64(self, value: u64) -> [u8; 8] {
        match self {
            ByteOrder::Native => value.to_ne_bytes(),
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }

    pub fn decode_u64(self, bytes: [u8; 8]) -> u64 {
        match self {
            ByteOrder::Native => u64::from_ne_bytes(bytes),
            ByteOrder::Little => u64::from_le_bytes(bytes),
            ByteOrder::Big => u64::from_be_bytes(bytes),
        }
    }
}
