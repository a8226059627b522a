//! Receiver-side frame reassembly.
//!
//! Fragments collect per frame number. Packets for frames already passed
//! are dropped; a packet for a later frame flushes every intervening frame
//! as a partial (its received prefix, stopping at the first gap) so the
//! decoder can conceal rather than stall.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::packet::Fragment;

/// One frame's fragments, possibly incomplete.
pub struct FragmentedFrame {
    connection_id: u16,
    source_minihash: u32,
    target_minihash: u32,
    frame_no: u32,
    fragments_in_this_frame: u16,
    fragments: Vec<Option<Vec<u8>>>,
    remaining: u16,
}

impl FragmentedFrame {
    pub fn new(fragment: Fragment) -> Self {
        let count = fragment.fragments_in_this_frame;
        let mut frame = Self {
            connection_id: fragment.connection_id,
            source_minihash: fragment.source_minihash,
            target_minihash: fragment.target_minihash,
            frame_no: fragment.frame_no,
            fragments_in_this_frame: count,
            fragments: (0..count).map(|_| None).collect(),
            remaining: count,
        };
        frame.add(fragment).expect("first fragment is consistent");
        frame
    }

    /// Add another fragment of the same frame. Duplicates are tolerated;
    /// inconsistent bookkeeping is an error.
    pub fn add(&mut self, fragment: Fragment) -> Result<()> {
        if fragment.frame_no != self.frame_no
            || fragment.fragments_in_this_frame != self.fragments_in_this_frame
            || fragment.connection_id != self.connection_id
            || fragment.source_minihash != self.source_minihash
            || fragment.target_minihash != self.target_minihash
        {
            return Err(TransportError::internal(
                "reassembly",
                format!(
                    "fragment disagrees with frame {} bookkeeping",
                    self.frame_no
                ),
            ));
        }

        let slot = &mut self.fragments[fragment.fragment_no as usize];
        if slot.is_none() {
            *slot = Some(fragment.payload);
            self.remaining -= 1;
        }
        Ok(())
    }

    pub fn complete(&self) -> bool {
        self.remaining == 0
    }

    pub fn frame_no(&self) -> u32 {
        self.frame_no
    }

    pub fn source_minihash(&self) -> u32 {
        self.source_minihash
    }

    pub fn target_minihash(&self) -> u32 {
        self.target_minihash
    }

    /// The whole frame; only valid once complete.
    pub fn frame(&self) -> Result<Vec<u8>> {
        if !self.complete() {
            return Err(TransportError::internal(
                "reassembly",
                "frame() on incomplete frame",
            ));
        }
        Ok(self.partial_frame())
    }

    /// Received fragments in order, stopping at the first gap.
    pub fn partial_frame(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for fragment in &self.fragments {
            match fragment {
                Some(payload) => out.extend_from_slice(payload),
                None => break,
            }
        }
        out
    }
}

/// What the reassembler hands the decoding layer.
pub enum ReassemblyEvent {
    /// Nothing decodable yet.
    Pending,
    /// Frames ready for the decoder, oldest first. Partial frames come
    /// from the flush-forward rule; the final entry may be complete.
    Frames(Vec<ReassembledFrame>),
}

pub struct ReassembledFrame {
    pub frame_no: u32,
    pub source_minihash: u32,
    pub target_minihash: u32,
    pub complete: bool,
    pub bytes: Vec<u8>,
}

/// Orders incoming fragments into decodable frames.
pub struct Reassembler {
    fragmented_frames: HashMap<u32, FragmentedFrame>,
    next_frame_no: u32,
}

impl Reassembler {
    pub fn new() -> Self {
        Self {
            fragmented_frames: HashMap::new(),
            next_frame_no: 0,
        }
    }

    pub fn next_frame_no(&self) -> u32 {
        self.next_frame_no
    }

    /// Process one incoming fragment.
    pub fn receive(&mut self, fragment: Fragment) -> Result<ReassemblyEvent> {
        if fragment.frame_no < self.next_frame_no {
            debug!(frame_no = fragment.frame_no, "dropping fragment for passed frame");
            return Ok(ReassemblyEvent::Pending);
        }

        let mut ready = Vec::new();

        if fragment.frame_no > self.next_frame_no {
            // flush forward: emit the partial prefixes of every frame we
            // were still waiting on
            debug!(
                from = self.next_frame_no,
                to = fragment.frame_no,
                "skipping ahead; flushing partial frames"
            );
            for frame_no in self.next_frame_no..fragment.frame_no {
                if let Some(partial) = self.fragmented_frames.remove(&frame_no) {
                    let bytes = partial.partial_frame();
                    if !bytes.is_empty() {
                        ready.push(ReassembledFrame {
                            frame_no,
                            source_minihash: partial.source_minihash(),
                            target_minihash: partial.target_minihash(),
                            complete: partial.complete(),
                            bytes,
                        });
                    }
                }
            }
            self.next_frame_no = fragment.frame_no;
        }

        let frame_no = fragment.frame_no;
        match self.fragmented_frames.get_mut(&frame_no) {
            Some(frame) => frame.add(fragment)?,
            None => {
                self.fragmented_frames
                    .insert(frame_no, FragmentedFrame::new(fragment));
            }
        }

        if let Some(frame) = self.fragmented_frames.get(&self.next_frame_no) {
            if frame.complete() {
                let frame = self
                    .fragmented_frames
                    .remove(&self.next_frame_no)
                    .expect("checked above");
                ready.push(ReassembledFrame {
                    frame_no: frame.frame_no(),
                    source_minihash: frame.source_minihash(),
                    target_minihash: frame.target_minihash(),
                    complete: true,
                    bytes: frame.frame()?,
                });
                self.next_frame_no += 1;
            }
        }

        if ready.is_empty() {
            Ok(ReassemblyEvent::Pending)
        } else {
            Ok(ReassemblyEvent::Frames(ready))
        }
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::fragment_frame;

    fn fragments_of(frame_no: u32, bytes: &[u8]) -> Vec<Fragment> {
        fragment_frame(bytes, 1, 10, 20, frame_no, 0).unwrap()
    }

    #[test]
    fn out_of_order_delivery_completes_on_last_fragment() {
        let frame_bytes = vec![0x5a; 3000];
        let fragments = fragments_of(0, &frame_bytes);
        assert_eq!(fragments.len(), 3);

        let mut reassembler = Reassembler::new();
        // deliver in order {2, 0, 1}
        assert!(matches!(
            reassembler.receive(fragments[2].clone()).unwrap(),
            ReassemblyEvent::Pending
        ));
        assert!(matches!(
            reassembler.receive(fragments[0].clone()).unwrap(),
            ReassemblyEvent::Pending
        ));
        let event = reassembler.receive(fragments[1].clone()).unwrap();

        let ReassemblyEvent::Frames(frames) = event else {
            panic!("expected completed frame");
        };
        assert_eq!(frames.len(), 1);
        assert!(frames[0].complete);
        assert_eq!(frames[0].bytes, frame_bytes);
        assert_eq!(frames[0].source_minihash, 10);
        assert_eq!(frames[0].target_minihash, 20);
        assert_eq!(reassembler.next_frame_no(), 1);
    }

    #[test]
    fn old_fragments_are_dropped() {
        let mut reassembler = Reassembler::new();
        for fragment in fragments_of(0, &[1; 100]) {
            reassembler.receive(fragment).unwrap();
        }
        assert_eq!(reassembler.next_frame_no(), 1);

        // a late fragment for frame 0 is ignored
        let stale = fragments_of(0, &[2; 100]).remove(0);
        assert!(matches!(
            reassembler.receive(stale).unwrap(),
            ReassemblyEvent::Pending
        ));
        assert_eq!(reassembler.next_frame_no(), 1);
    }

    #[test]
    fn skip_ahead_flushes_partial_prefix() {
        let mut reassembler = Reassembler::new();

        // frame 0: fragments 0 and 2 of 3 arrive; 1 is lost
        let fragments = fragments_of(0, &[7; 3000]);
        reassembler.receive(fragments[0].clone()).unwrap();
        reassembler.receive(fragments[2].clone()).unwrap();

        // frame 1 arrives; frame 0's prefix (fragment 0 only) flushes
        let next = fragments_of(1, &[9; 100]).remove(0);
        let event = reassembler.receive(next).unwrap();

        let ReassemblyEvent::Frames(frames) = event else {
            panic!("expected flushed partial and complete frame");
        };
        // partial frame 0 stops at the gap
        assert_eq!(frames[0].frame_no, 0);
        assert!(!frames[0].complete);
        assert_eq!(frames[0].bytes, vec![7; 1400]);
        // frame 1 is complete in one fragment
        assert_eq!(frames[1].frame_no, 1);
        assert!(frames[1].complete);
        assert_eq!(reassembler.next_frame_no(), 2);
    }

    #[test]
    fn duplicate_fragments_are_harmless() {
        let mut reassembler = Reassembler::new();
        let fragments = fragments_of(0, &[3; 2000]);
        reassembler.receive(fragments[0].clone()).unwrap();
        reassembler.receive(fragments[0].clone()).unwrap();
        let event = reassembler.receive(fragments[1].clone()).unwrap();
        assert!(matches!(event, ReassemblyEvent::Frames(_)));
    }
}
