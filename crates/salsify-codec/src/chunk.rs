//! The uncompressed chunk wrapping every frame: the 3-byte tag, the
//! key-frame start code and dimensions, and the DCT partition table.

use crate::error::{CodecError, Result};

/// Sub-pixel interpolation selected by the frame tag's version field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructionFilter {
    Bicubic,
    Bilinear,
    NoFilter,
}

/// Loop-filter family selected by the version field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopFilterKind {
    Normal,
    Simple,
    NoFilter,
}

const KEY_FRAME_START_CODE: [u8; 3] = [0x9d, 0x01, 0x2a];

/// Parsed uncompressed chunk, borrowing the frame bytes.
pub struct UncompressedChunk<'a> {
    pub key_frame: bool,
    pub show_frame: bool,
    pub reconstruction_filter: ReconstructionFilter,
    pub loop_filter: LoopFilterKind,
    pub first_partition: &'a [u8],
    /// Everything after the first partition: the DCT partition table and
    /// the partitions themselves.
    pub rest: &'a [u8],
}

impl<'a> UncompressedChunk<'a> {
    pub fn parse(frame: &'a [u8], expected_width: u16, expected_height: u16) -> Result<Self> {
        if frame.len() < 3 {
            return Err(CodecError::invalid("VP8 frame truncated"));
        }

        let tag = u32::from_le_bytes([frame[0], frame[1], frame[2], 0]);
        let key_frame = tag & 1 == 0;
        let version = ((tag >> 1) & 0x7) as u8;
        let show_frame = (tag >> 4) & 1 != 0;
        let first_partition_length = (tag >> 5) as usize;

        let (reconstruction_filter, loop_filter) = match version {
            0 => (ReconstructionFilter::Bicubic, LoopFilterKind::Normal),
            1 => (ReconstructionFilter::Bilinear, LoopFilterKind::Simple),
            2 => (ReconstructionFilter::Bilinear, LoopFilterKind::NoFilter),
            3 => (ReconstructionFilter::NoFilter, LoopFilterKind::NoFilter),
            _ => return Err(CodecError::unsupported(format!("VP8 version {version}"))),
        };

        let first_partition_offset = if key_frame { 10 } else { 3 };
        if frame.len() <= first_partition_offset + first_partition_length {
            return Err(CodecError::invalid("invalid VP8 first partition length"));
        }

        if key_frame {
            if frame[3..6] != KEY_FRAME_START_CODE {
                return Err(CodecError::invalid("did not find key-frame start code"));
            }

            let size = u32::from_le_bytes([frame[6], frame[7], frame[8], frame[9]]);
            let frame_width = (size & 0x3fff) as u16;
            let horizontal_scale = ((size >> 14) & 0x3) as u8;
            let frame_height = ((size >> 16) & 0x3fff) as u16;
            let vertical_scale = ((size >> 30) & 0x3) as u8;

            if horizontal_scale != 0 || vertical_scale != 0 {
                return Err(CodecError::unsupported("VP8 upscaling"));
            }
            if frame_width != expected_width || frame_height != expected_height {
                return Err(CodecError::invalid(format!(
                    "key frame is {frame_width}x{frame_height}, decoder expects {expected_width}x{expected_height}"
                )));
            }
        }

        Ok(Self {
            key_frame,
            show_frame,
            reconstruction_filter,
            loop_filter,
            first_partition: &frame
                [first_partition_offset..first_partition_offset + first_partition_length],
            rest: &frame[first_partition_offset + first_partition_length..],
        })
    }

    /// Split `rest` into `count` DCT partitions. The sizes of all but the
    /// last are prefixed as little-endian 24-bit lengths.
    pub fn dct_partitions(&self, count: usize) -> Result<Vec<&'a [u8]>> {
        let table_len = 3 * (count - 1);
        if self.rest.len() < table_len {
            return Err(CodecError::invalid("missing DCT partition table"));
        }

        let mut partitions = Vec::with_capacity(count);
        let mut cursor = table_len;
        for i in 0..count - 1 {
            let entry = &self.rest[3 * i..3 * i + 3];
            let length = u32::from_le_bytes([entry[0], entry[1], entry[2], 0]) as usize;
            if cursor + length > self.rest.len() {
                return Err(CodecError::invalid("DCT partition overruns frame"));
            }
            partitions.push(&self.rest[cursor..cursor + length]);
            cursor += length;
        }
        partitions.push(&self.rest[cursor..]);
        Ok(partitions)
    }
}

/// Assemble a complete serialized frame from its pieces.
pub fn assemble_frame(
    key_frame: bool,
    show_frame: bool,
    width: u16,
    height: u16,
    first_partition: &[u8],
    dct_partitions: &[Vec<u8>],
) -> Result<Vec<u8>> {
    if width > 16383 || height > 16383 {
        return Err(CodecError::invalid("VP8 frame dimensions too large"));
    }
    if dct_partitions.is_empty() {
        return Err(CodecError::internal(
            "frame assembly",
            "at least one DCT partition is required",
        ));
    }

    let first_partition_length = first_partition.len() as u32;
    if first_partition_length >= 1 << 19 {
        return Err(CodecError::invalid("first partition too long"));
    }

    let mut out = Vec::with_capacity(
        10 + first_partition.len() + dct_partitions.iter().map(Vec::len).sum::<usize>(),
    );

    let tag: u32 = (!key_frame as u32) | ((show_frame as u32) << 4) | (first_partition_length << 5);
    out.extend_from_slice(&tag.to_le_bytes()[..3]);

    if key_frame {
        out.extend_from_slice(&KEY_FRAME_START_CODE);
        out.extend_from_slice(&(width & 0x3fff).to_le_bytes());
        out.extend_from_slice(&(height & 0x3fff).to_le_bytes());
    }

    out.extend_from_slice(first_partition);

    for partition in &dct_partitions[..dct_partitions.len() - 1] {
        let length = partition.len() as u32;
        out.extend_from_slice(&length.to_le_bytes()[..3]);
    }
    for partition in dct_partitions {
        out.extend_from_slice(partition);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_frame_round_trip() {
        let first = vec![0xaa; 20];
        let tokens = vec![vec![0xbb; 7]];
        let frame = assemble_frame(true, true, 176, 144, &first, &tokens).unwrap();

        let chunk = UncompressedChunk::parse(&frame, 176, 144).unwrap();
        assert!(chunk.key_frame);
        assert!(chunk.show_frame);
        assert_eq!(chunk.reconstruction_filter, ReconstructionFilter::Bicubic);
        assert_eq!(chunk.first_partition, &first[..]);
        assert_eq!(chunk.dct_partitions(1).unwrap(), vec![&tokens[0][..]]);
    }

    #[test]
    fn partition_table_round_trip() {
        let first = vec![1; 4];
        let tokens = vec![vec![2; 10], vec![3; 20], vec![4; 5], vec![5; 1]];
        let frame = assemble_frame(false, true, 176, 144, &first, &tokens).unwrap();

        let chunk = UncompressedChunk::parse(&frame, 176, 144).unwrap();
        assert!(!chunk.key_frame);
        let partitions = chunk.dct_partitions(4).unwrap();
        for (got, want) in partitions.iter().zip(&tokens) {
            assert_eq!(got, &&want[..]);
        }
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let frame = assemble_frame(true, true, 176, 144, &[0; 4], &[vec![0; 4]]).unwrap();
        assert!(UncompressedChunk::parse(&frame, 640, 480).is_err());
    }

    #[test]
    fn truncated_frame_rejected() {
        assert!(UncompressedChunk::parse(&[0x00, 0x01], 176, 144).is_err());
    }

    #[test]
    fn bad_start_code_rejected() {
        let mut frame = assemble_frame(true, true, 176, 144, &[0; 4], &[vec![0; 4]]).unwrap();
        frame[3] = 0x00;
        assert!(UncompressedChunk::parse(&frame, 176, 144).is_err());
    }
}
