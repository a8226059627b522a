//! Wire formats: data fragments and acknowledgements.
//!
//! Data fragment (little-endian):
//! ```text
//! offset size field
//!  0     2    connection_id
//!  2     4    source_minihash
//!  6     4    target_minihash
//! 10     4    frame_no
//! 14     2    fragment_no
//! 16     2    fragments_in_this_frame
//! 18     4    time_since_last_microseconds
//! 22     *    payload (nonempty, at most 1400 bytes)
//! ```
//!
//! Ack:
//! ```text
//! offset size field
//!  0     2    connection_id
//!  2     4    frame_no
//!  6     2    fragment_no
//!  8     4    avg_delay_microseconds
//! 12     4    current_state_minihash
//! 16     4    count
//! 20+4i  4    complete_states[i]
//! ```

use bytes::{Buf, BufMut};

use crate::error::{Result, TransportError};

/// Largest payload one fragment carries.
pub const MAXIMUM_PAYLOAD: usize = 1400;

const FRAGMENT_HEADER_LEN: usize = 22;
const ACK_HEADER_LEN: usize = 20;

/// One UDP datagram carrying part of a serialized frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub connection_id: u16,
    pub source_minihash: u32,
    pub target_minihash: u32,
    pub frame_no: u32,
    pub fragment_no: u16,
    pub fragments_in_this_frame: u16,
    /// Microseconds since the previous frame's first fragment; zero on all
    /// but the first fragment of a frame.
    pub time_since_last: u32,
    pub payload: Vec<u8>,
}

impl Fragment {
    pub fn parse(mut data: &[u8]) -> Result<Self> {
        if data.len() <= FRAGMENT_HEADER_LEN {
            return Err(TransportError::invalid(format!(
                "fragment of {} bytes has no payload",
                data.len()
            )));
        }

        let connection_id = data.get_u16_le();
        let source_minihash = data.get_u32_le();
        let target_minihash = data.get_u32_le();
        let frame_no = data.get_u32_le();
        let fragment_no = data.get_u16_le();
        let fragments_in_this_frame = data.get_u16_le();
        let time_since_last = data.get_u32_le();
        let payload = data.to_vec();

        if fragment_no >= fragments_in_this_frame {
            return Err(TransportError::invalid(format!(
                "fragment_no {fragment_no} out of range ({fragments_in_this_frame} in frame)"
            )));
        }
        if payload.len() > MAXIMUM_PAYLOAD {
            return Err(TransportError::invalid(format!(
                "payload of {} bytes exceeds maximum",
                payload.len()
            )));
        }

        Ok(Self {
            connection_id,
            source_minihash,
            target_minihash,
            frame_no,
            fragment_no,
            fragments_in_this_frame,
            time_since_last,
            payload,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAGMENT_HEADER_LEN + self.payload.len());
        out.put_u16_le(self.connection_id);
        out.put_u32_le(self.source_minihash);
        out.put_u32_le(self.target_minihash);
        out.put_u32_le(self.frame_no);
        out.put_u16_le(self.fragment_no);
        out.put_u16_le(self.fragments_in_this_frame);
        out.put_u32_le(self.time_since_last);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Split a serialized frame into fragments. The first carries
/// `time_since_last`; the rest carry zero.
pub fn fragment_frame(
    frame: &[u8],
    connection_id: u16,
    source_minihash: u32,
    target_minihash: u32,
    frame_no: u32,
    time_since_last: u32,
) -> Result<Vec<Fragment>> {
    if frame.is_empty() {
        return Err(TransportError::internal("fragmentation", "empty frame"));
    }

    let count = frame.len().div_ceil(MAXIMUM_PAYLOAD);
    if count > u16::MAX as usize {
        return Err(TransportError::internal("fragmentation", "frame too large"));
    }

    let mut fragments = Vec::with_capacity(count);
    for (index, chunk) in frame.chunks(MAXIMUM_PAYLOAD).enumerate() {
        fragments.push(Fragment {
            connection_id,
            source_minihash,
            target_minihash,
            frame_no,
            fragment_no: index as u16,
            fragments_in_this_frame: count as u16,
            time_since_last: if index == 0 { time_since_last } else { 0 },
            payload: chunk.to_vec(),
        });
    }
    Ok(fragments)
}

/// Receiver-to-sender acknowledgement, sent on every received fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub connection_id: u16,
    pub frame_no: u32,
    pub fragment_no: u16,
    pub avg_delay_us: u32,
    pub current_state: u32,
    /// Fully-decoded state minihashes, oldest first.
    pub complete_states: Vec<u32>,
}

impl Ack {
    pub fn parse(mut data: &[u8]) -> Result<Self> {
        if data.len() < ACK_HEADER_LEN {
            return Err(TransportError::invalid("ack too short"));
        }

        let connection_id = data.get_u16_le();
        let frame_no = data.get_u32_le();
        let fragment_no = data.get_u16_le();
        let avg_delay_us = data.get_u32_le();
        let current_state = data.get_u32_le();
        let count = data.get_u32_le() as usize;

        if data.len() != count * 4 {
            return Err(TransportError::invalid(format!(
                "ack declares {count} complete states but carries {} bytes",
                data.len()
            )));
        }

        let mut complete_states = Vec::with_capacity(count);
        for _ in 0..count {
            complete_states.push(data.get_u32_le());
        }

        Ok(Self {
            connection_id,
            frame_no,
            fragment_no,
            avg_delay_us,
            current_state,
            complete_states,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ACK_HEADER_LEN + 4 * self.complete_states.len());
        out.put_u16_le(self.connection_id);
        out.put_u32_le(self.frame_no);
        out.put_u16_le(self.fragment_no);
        out.put_u32_le(self.avg_delay_us);
        out.put_u32_le(self.current_state);
        out.put_u32_le(self.complete_states.len() as u32);
        for &state in &self.complete_states {
            out.put_u32_le(state);
        }
        out
    }
}
