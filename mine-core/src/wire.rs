//! Framing: u8 length-prefixed names and credentials, opcode-led control frames.

use std::net::Ipv4Addr;

use crate::error::ProtocolError;
use crate::protocol::{ByteOrder, Opcode, MAX_NAME_LEN};

/// Size of a data header: opcode + u64 length.
pub const DATA_HEADER_LEN: usize = 1 + 8;

/// Encode the auth request: `[len][login][len][password]`.
/// Absent credentials encode as length 0.
pub fn encode_auth(
    login: Option<&str>,
    password: Option<&str>,
) -> Result<Vec<u8>, FrameEncodeError> {
    let login = login.unwrap_or("").as_bytes();
    let password = password.unwrap_or("").as_bytes();
    if login.len() > MAX_NAME_LEN || password.len() > MAX_NAME_LEN {
        return Err(FrameEncodeError::CredentialTooLong);
    }
    let mut out = Vec::with_capacity(2 + login.len() + password.len());
    out.push(login.len() as u8);
    out.extend_from_slice(login);
    out.push(password.len() as u8);
    out.extend_from_slice(password);
    Ok(out)
}

/// Decode an auth request from the front of `bytes`. Returns (login, password, bytes consumed).
#[cfg(test)]
pub(crate) fn decode_auth(bytes: &[u8]) -> Result<(String, String, usize), FrameDecodeError> {
    let (login, n1) = decode_short(bytes)?;
    let (password, n2) = decode_short(&bytes[n1..])?;
    Ok((login, password, n1 + n2))
}

/// Encode an event registration: `[3][len][name][ipv4]`.
pub fn encode_event_reg(name: &str, addr: Ipv4Addr) -> Result<Vec<u8>, FrameEncodeError> {
    let name = checked_name(name)?;
    let mut out = Vec::with_capacity(2 + name.len() + 4);
    out.push(Opcode::EventReg as u8);
    out.push(name.len() as u8);
    out.extend_from_slice(name);
    out.extend_from_slice(&addr.octets());
    Ok(out)
}

/// Decode an event registration from the front of `bytes`. Returns (name, address, bytes consumed).
#[cfg(test)]
pub(crate) fn decode_event_reg(
    bytes: &[u8],
) -> Result<(String, Ipv4Addr, usize), FrameDecodeError> {
    let (&op, rest) = bytes.split_first().ok_or(FrameDecodeError::NeedMore)?;
    if op != Opcode::EventReg as u8 {
        return Err(FrameDecodeError::UnexpectedOpcode(op));
    }
    let (name, n) = decode_short(rest)?;
    let rest = &rest[n..];
    if rest.len() < 4 {
        return Err(FrameDecodeError::NeedMore);
    }
    let addr = Ipv4Addr::new(rest[0], rest[1], rest[2], rest[3]);
    Ok((name, addr, 1 + n + 4))
}

/// Encode an event-name frame: `[2][len][name]`.
pub fn encode_event_name(name: &str) -> Result<Vec<u8>, FrameEncodeError> {
    let name = checked_name(name)?;
    let mut out = Vec::with_capacity(2 + name.len());
    out.push(Opcode::EventName as u8);
    out.push(name.len() as u8);
    out.extend_from_slice(name);
    Ok(out)
}

/// Encode a data header: `[0][length:u64]` in the configured byte order.
pub fn encode_data_header(total_len: u64, order: ByteOrder) -> [u8; DATA_HEADER_LEN] {
    let mut out = [0u8; DATA_HEADER_LEN];
    out[0] = Opcode::Data as u8;
    out[1..].copy_from_slice(&order.encode_u64(total_len));
    out
}

fn checked_name(name: &str) -> Result<&[u8], FrameEncodeError> {
    let bytes = name.as_bytes();
    if bytes.len() > MAX_NAME_LEN {
        return Err(FrameEncodeError::NameTooLong);
    }
    Ok(bytes)
}

#[cfg(test)]
fn decode_short(bytes: &[u8]) -> Result<(String, usize), FrameDecodeError> {
    let (&len, rest) = bytes.split_first().ok_or(FrameDecodeError::NeedMore)?;
    let len = len as usize;
    if rest.len() < len {
        return Err(FrameDecodeError::NeedMore);
    }
    let s = std::str::from_utf8(&rest[..len]).map_err(|_| FrameDecodeError::InvalidUtf8)?;
    Ok((s.to_string(), 1 + len))
}

/// Error building a frame from caller input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("event name too long")]
    NameTooLong,
    #[error("credential too long")]
    CredentialTooLong,
}

impl From<FrameEncodeError> for ProtocolError {
    fn from(e: FrameEncodeError) -> Self {
        match e {
            FrameEncodeError::NameTooLong => ProtocolError::NameTooLong,
            FrameEncodeError::CredentialTooLong => ProtocolError::CredentialTooLong,
        }
    }
}

impl From<FrameEncodeError> for crate::Error {
    fn from(e: FrameEncodeError) -> Self {
        crate::Error::Protocol(e.into())
    }
}

/// Error decoding a frame (need more bytes, wrong opcode, bad text).
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub(crate) enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("unexpected opcode {0}")]
    UnexpectedOpcode(u8),
    #[error("invalid utf-8")]
    InvalidUtf8,
}
