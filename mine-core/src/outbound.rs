//! Outbound transfer: name the event once, frame the total length once, stream chunks.

use crate::error::{Error, ProtocolError};
use crate::protocol::ByteOrder;
use crate::transport::Channel;
use crate::wire;

/// Cursor over the payload currently being published.
///
/// `remaining > 0` means `event` is mid-publish and no other event may start.
#[derive(Debug, Default)]
pub struct OutboundTransfer {
    event: Option<String>,
    remaining: u64,
}

impl OutboundTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Event named by the last event-name frame sent.
    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    /// Payload bytes declared but not yet written.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn is_idle(&self) -> bool {
        self.remaining == 0
    }

    /// Publish one chunk of a `total_len` payload for `event`.
    ///
    /// The first chunk of a payload emits the data header (preceded by an
    /// event-name frame when the event changed). Chunks must add up to
    /// `total_len`; a chunk past the declared end is rejected before any
    /// byte is written.
    pub fn send<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        event: &str,
        total_len: u64,
        chunk: &[u8],
        order: ByteOrder,
    ) -> Result<(), Error> {
        let switching = self.event.as_deref() != Some(event);
        if switching && self.remaining != 0 {
            return Err(ProtocolError::IncompleteTransfer.into());
        }
        let outstanding = if self.remaining == 0 {
            total_len
        } else {
            self.remaining
        };
        if chunk.len() as u64 > outstanding {
            return Err(ProtocolError::ChunkOverrun.into());
        }

        if switching {
            let frame = wire::encode_event_name(event)?;
            channel.send_all(&frame)?;
            tracing::debug!(%event, "outbound event switched");
            self.event = Some(event.to_string());
        }
        if self.remaining == 0 {
            channel.send_all(&wire::encode_data_header(total_len, order))?;
            self.remaining = total_len;
        }
        channel.send_all(chunk)?;
        self.remaining -= chunk.len() as u64;
        tracing::trace!(%event, sent = chunk.len(), remaining = self.remaining, "outbound chunk");
        Ok(())
    }
}
