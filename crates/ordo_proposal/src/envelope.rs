//! Proposal wire envelope.
//!
//! Fixed field order and widths, all integers little-endian:
//!
//! | field          | width |
//! |----------------|-------|
//! | id             | i32   |
//! | state          | u32   |
//! | created_at     | u64   |
//! | is_local       | u32   |
//! | op_tag         | i32   |
//! | payload_len    | u64   |
//! | payload        | bytes |
//!
//! Decoding is strict so that `decode(encode(p)) == p` and re-encoding a
//! decoded envelope reproduces the original bytes.

use crate::proposal::{OpTag, Proposal, ProposalState};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ordo_core::{ProposalId, Timestamp};

/// Size of the fixed header preceding the payload
pub const HEADER_LEN: usize = 4 + 4 + 8 + 4 + 4 + 8;

/// Envelope decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// Buffer ends before the header or payload does
    #[error("Truncated envelope: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes present
        available: usize,
    },

    /// State ordinal outside the known lifecycle
    #[error("Unknown proposal state ordinal: {0}")]
    UnknownState(u32),

    /// Local flag other than 0 or 1
    #[error("Invalid is_local flag: {0}")]
    InvalidFlag(u32),

    /// Payload length does not fit in memory on this platform
    #[error("Payload length overflow: {0}")]
    PayloadTooLarge(u64),

    /// Bytes left over after the payload
    #[error("Trailing bytes after payload: {0}")]
    TrailingBytes(usize),
}

/// Trait for envelope serialization
pub trait WireEncode {
    /// Encode to envelope bytes
    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Append the envelope to a buffer
    fn encode_into(&self, buf: &mut BytesMut);

    /// Exact encoded length
    fn encoded_len(&self) -> usize;
}

/// Trait for envelope deserialization
pub trait WireDecode: Sized {
    /// Decode from envelope bytes
    ///
    /// # Errors
    ///
    /// Returns error if the buffer is not exactly one well-formed envelope
    fn decode(data: &[u8]) -> Result<Self, EnvelopeError>;
}

impl WireEncode for Proposal {
    fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_i32_le(self.id().as_i32());
        buf.put_u32_le(self.state().ordinal());
        buf.put_u64_le(self.created_at().as_micros());
        buf.put_u32_le(u32::from(self.is_local()));
        buf.put_i32_le(self.op_tag().as_i32());
        buf.put_u64_le(self.payload().len() as u64);
        buf.put_slice(self.payload());
    }

    fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload().len()
    }
}

impl WireDecode for Proposal {
    fn decode(data: &[u8]) -> Result<Self, EnvelopeError> {
        let mut cur = data;
        if cur.remaining() < HEADER_LEN {
            return Err(EnvelopeError::Truncated {
                needed: HEADER_LEN,
                available: cur.remaining(),
            });
        }

        let id = ProposalId::from_raw(cur.get_i32_le());
        let raw_state = cur.get_u32_le();
        let state = ProposalState::from_ordinal(raw_state)
            .ok_or(EnvelopeError::UnknownState(raw_state))?;
        let created_at = Timestamp::from_micros(cur.get_u64_le());
        let is_local = match cur.get_u32_le() {
            0 => false,
            1 => true,
            other => return Err(EnvelopeError::InvalidFlag(other)),
        };
        let op_tag = OpTag::new(cur.get_i32_le());
        let raw_len = cur.get_u64_le();
        let payload_len =
            usize::try_from(raw_len).map_err(|_| EnvelopeError::PayloadTooLarge(raw_len))?;

        if cur.remaining() < payload_len {
            return Err(EnvelopeError::Truncated {
                needed: HEADER_LEN.saturating_add(payload_len),
                available: data.len(),
            });
        }
        let payload = Bytes::copy_from_slice(&cur[..payload_len]);
        cur.advance(payload_len);

        if cur.has_remaining() {
            return Err(EnvelopeError::TrailingBytes(cur.remaining()));
        }

        Ok(Proposal::from_parts(id, state, created_at, is_local, op_tag, payload))
    }
}
