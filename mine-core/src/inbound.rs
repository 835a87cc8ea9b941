//! Inbound assembly: split control frames from payload bytes, hand payloads out in chunks.

use crate::error::{Error, ProtocolError};
use crate::protocol::{ByteOrder, Opcode};
use crate::transport::Channel;

/// Result of one receive step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery<'a> {
    /// `len` payload bytes landed at the front of the caller's buffer.
    Chunk {
        /// Event name as sent by the broker. Names are not validated; bytes that
        /// are not UTF-8 are replaced with U+FFFD.
        event: &'a str,
        total_len: u64,
        len: usize,
    },
    /// The previous chunk completed the payload. Not an error.
    EndOfPayload,
}

/// Cursor over the payload currently being received.
///
/// The event name outlives individual payloads: a data frame without a
/// fresh event-name frame belongs to the last named event.
#[derive(Debug, Default)]
pub struct InboundTransfer {
    event: Option<String>,
    total: u64,
    remaining: u64,
    finished: bool,
}

impl InboundTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    /// Payload bytes announced but not yet read.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Read at most one chunk into `buf`.
    ///
    /// After the chunk that drains a payload, the next call returns
    /// [`Delivery::EndOfPayload`] without touching the channel, so a caller
    /// looping until end-of-payload never consumes the next frame.
    /// An empty `buf` while payload bytes are owed is an error: such a read
    /// could never make progress. The cursor is left as it was.
    pub fn next<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        buf: &mut [u8],
        order: ByteOrder,
    ) -> Result<Delivery<'_>, Error> {
        if self.finished {
            self.finished = false;
            return Ok(Delivery::EndOfPayload);
        }

        if self.remaining == 0 {
            self.read_frame_header(channel, order)?;
        }

        let mut len = 0;
        if self.remaining != 0 {
            if buf.is_empty() {
                return Err(Error::system("Receive buffer is empty"));
            }
            let want = usize::try_from(self.remaining).map_or(buf.len(), |r| r.min(buf.len()));
            len = channel.recv(&mut buf[..want])?;
            self.remaining -= len as u64;
            tracing::trace!(len, remaining = self.remaining, "inbound chunk");
        }
        if self.remaining == 0 {
            self.finished = true;
        }

        let event = self.event.as_deref().ok_or(ProtocolError::DataBeforeEvent)?;
        Ok(Delivery::Chunk {
            event,
            total_len: self.total,
            len,
        })
    }

    /// Consume an optional event-name frame plus the data header, and arm the cursor.
    fn read_frame_header<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        order: ByteOrder,
    ) -> Result<(), Error> {
        let mut op = channel.recv_u8()?;
        if Opcode::from_u8(op) == Some(Opcode::EventName) {
            let name_len = channel.recv_u8()? as usize;
            let mut name = vec![0u8; name_len];
            channel.recv_exact(&mut name)?;
            let name = String::from_utf8_lossy(&name).into_owned();
            tracing::debug!(event = %name, "inbound event switched");
            self.event = Some(name);
            op = channel.recv_u8()?;
        }
        if Opcode::from_u8(op) != Some(Opcode::Data) {
            return Err(ProtocolError::UnexpectedOperation { opcode: op }.into());
        }
        if self.event.is_none() {
            return Err(ProtocolError::DataBeforeEvent.into());
        }

        let mut len = [0u8; 8];
        channel.recv_exact(&mut len)?;
        self.total = order.decode_u64(len);
        self.remaining = self.total;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::ScriptedPeer;
    use crate::wire;

    const LE: ByteOrder = ByteOrder::Little;

    fn data_header(len: u64) -> [u8; wire::DATA_HEADER_LEN] {
        wire::encode_data_header(len, LE)
    }

    #[test]
    fn payload_across_two_reads() {
        let mut peer = ScriptedPeer::new();
        let mut first = b"\x02\x03abc".to_vec();
        first.extend_from_slice(&data_header(5));
        first.extend_from_slice(b"he");
        peer.push(&first);
        peer.push(b"llo");

        let mut inbound = InboundTransfer::new();
        let mut buf = [0u8; 64];

        let d = inbound.next(&mut peer, &mut buf, LE).unwrap();
        assert_eq!(
            d,
            Delivery::Chunk {
                event: "abc",
                total_len: 5,
                len: 2
            }
        );
        assert_eq!(&buf[..2], b"he");

        let d = inbound.next(&mut peer, &mut buf, LE).unwrap();
        assert_eq!(
            d,
            Delivery::Chunk {
                event: "abc",
                total_len: 5,
                len: 3
            }
        );
        assert_eq!(&buf[..3], b"llo");

        let d = inbound.next(&mut peer, &mut buf, LE).unwrap();
        assert_eq!(d, Delivery::EndOfPayload);
    }

    #[test]
    fn chunks_bounded_by_buffer() {
        let mut peer = ScriptedPeer::new();
        let mut frame = b"\x02\x01e".to_vec();
        frame.extend_from_slice(&data_header(10));
        frame.extend_from_slice(b"0123456789");
        peer.push(&frame);

        let mut inbound = InboundTransfer::new();
        let mut buf = [0u8; 4];
        let mut got = Vec::new();
        loop {
            match inbound.next(&mut peer, &mut buf, LE).unwrap() {
                Delivery::Chunk { len, total_len, .. } => {
                    assert!(len <= 4);
                    assert_eq!(total_len, 10);
                    got.extend_from_slice(&buf[..len]);
                }
                Delivery::EndOfPayload => break,
            }
        }
        assert_eq!(got, b"0123456789");
    }

    #[test]
    fn event_name_persists_across_payloads() {
        let mut peer = ScriptedPeer::new();
        let mut bytes = b"\x02\x02ev".to_vec();
        bytes.extend_from_slice(&data_header(1));
        bytes.push(b'a');
        bytes.extend_from_slice(&data_header(1));
        bytes.push(b'b');
        peer.push(&bytes);

        let mut inbound = InboundTransfer::new();
        let mut buf = [0u8; 8];
        assert!(matches!(
            inbound.next(&mut peer, &mut buf, LE).unwrap(),
            Delivery::Chunk { event: "ev", .. }
        ));
        assert_eq!(
            inbound.next(&mut peer, &mut buf, LE).unwrap(),
            Delivery::EndOfPayload
        );
        let d = inbound.next(&mut peer, &mut buf, LE).unwrap();
        assert_eq!(
            d,
            Delivery::Chunk {
                event: "ev",
                total_len: 1,
                len: 1
            }
        );
        assert_eq!(buf[0], b'b');
    }

    #[test]
    fn empty_payload_reports_zero_then_end() {
        let mut peer = ScriptedPeer::new();
        let mut bytes = b"\x02\x01z".to_vec();
        bytes.extend_from_slice(&data_header(0));
        peer.push(&bytes);

        let mut inbound = InboundTransfer::new();
        let mut buf = [0u8; 8];
        assert_eq!(
            inbound.next(&mut peer, &mut buf, LE).unwrap(),
            Delivery::Chunk {
                event: "z",
                total_len: 0,
                len: 0
            }
        );
        assert_eq!(
            inbound.next(&mut peer, &mut buf, LE).unwrap(),
            Delivery::EndOfPayload
        );
    }

    #[test]
    fn non_utf8_event_name_is_replaced_not_rejected() {
        let mut peer = ScriptedPeer::new();
        let mut bytes = b"\x02\x03a\xffb".to_vec();
        bytes.extend_from_slice(&data_header(1));
        bytes.push(b'x');
        peer.push(&bytes);

        let mut inbound = InboundTransfer::new();
        let d = inbound.next(&mut peer, &mut [0u8; 4], LE).unwrap();
        assert_eq!(
            d,
            Delivery::Chunk {
                event: "a\u{fffd}b",
                total_len: 1,
                len: 1
            }
        );
    }

    #[test]
    fn non_data_after_event_name_is_unexpected() {
        let mut peer = ScriptedPeer::new();
        peer.push(b"\x02\x03abc\x02\x03def");
        let mut inbound = InboundTransfer::new();
        let err = inbound.next(&mut peer, &mut [0u8; 8], LE).unwrap_err();
        assert_eq!(
            err,
            Error::Protocol(ProtocolError::UnexpectedOperation { opcode: 2 })
        );
        assert_eq!(err.to_string(), "Unexpected protocol operation received");
    }

    #[test]
    fn data_without_event_is_rejected() {
        let mut peer = ScriptedPeer::new();
        let mut bytes = data_header(3).to_vec();
        bytes.extend_from_slice(b"abc");
        peer.push(&bytes);
        let mut inbound = InboundTransfer::new();
        let err = inbound.next(&mut peer, &mut [0u8; 8], LE).unwrap_err();
        assert_eq!(err, Error::Protocol(ProtocolError::DataBeforeEvent));
        assert_eq!(err.to_string(), "Data received before event");
    }

    #[test]
    fn unknown_leading_opcode_is_unexpected() {
        let mut peer = ScriptedPeer::new();
        peer.push(&[9]);
        let mut inbound = InboundTransfer::new();
        let err = inbound.next(&mut peer, &mut [0u8; 8], LE).unwrap_err();
        assert_eq!(
            err,
            Error::Protocol(ProtocolError::UnexpectedOperation { opcode: 9 })
        );
    }

    #[test]
    fn empty_buffer_mid_payload_is_error() {
        let mut peer = ScriptedPeer::new();
        let mut bytes = b"\x02\x01e".to_vec();
        bytes.extend_from_slice(&data_header(3));
        bytes.extend_from_slice(b"abc");
        peer.push(&bytes);

        let mut inbound = InboundTransfer::new();
        for _ in 0..3 {
            let err = inbound.next(&mut peer, &mut [], LE).unwrap_err();
            assert_eq!(err, Error::system("Receive buffer is empty"));
            assert_eq!(inbound.remaining(), 3);
        }

        let mut buf = [0u8; 8];
        assert_eq!(
            inbound.next(&mut peer, &mut buf, LE).unwrap(),
            Delivery::Chunk {
                event: "e",
                total_len: 3,
                len: 3
            }
        );
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(
            inbound.next(&mut peer, &mut [], LE).unwrap(),
            Delivery::EndOfPayload
        );
    }

    #[test]
    fn peer_close_mid_payload_is_error() {
        let mut peer = ScriptedPeer::new();
        let mut bytes = b"\x02\x01e".to_vec();
        bytes.extend_from_slice(&data_header(4));
        bytes.extend_from_slice(b"ab");
        peer.push(&bytes);
        let mut inbound = InboundTransfer::new();
        let mut buf = [0u8; 8];
        inbound.next(&mut peer, &mut buf, LE).unwrap();
        let err = inbound.next(&mut peer, &mut buf, LE).unwrap_err();
        assert!(matches!(err, Error::System { .. }));
        assert_eq!(inbound.remaining(), 2);
    }

    #[test]
    fn big_endian_length() {
        let mut peer = ScriptedPeer::new();
        let mut bytes = b"\x02\x01e".to_vec();
        bytes.extend_from_slice(&wire::encode_data_header(3, ByteOrder::Big));
        bytes.extend_from_slice(b"xyz");
        peer.push(&bytes);
        let mut inbound = InboundTransfer::new();
        let d = inbound
            .next(&mut peer, &mut [0u8; 8], ByteOrder::Big)
            .unwrap();
        assert_eq!(
            d,
            Delivery::Chunk {
                event: "e",
                total_len: 3,
                len: 3
            }
        );
    }
}
