//! IVF container reader and writer.
//!
//! IVF is the simplest container for VP8 bitstreams and is what the
//! file-based tests and tools use.
//!
//! Layout:
//! ```text
//! 0-3:   signature "DKIF"
//! 4-5:   version (0)
//! 6-7:   header size (32)
//! 8-11:  fourcc (e.g. "VP80")
//! 12-13: width
//! 14-15: height
//! 16-19: framerate denominator
//! 20-23: framerate numerator
//! 24-27: frame count
//! 28-31: unused
//! ```
//! followed by per-frame records of {length:u32, pts:u64, bytes}.
//! All integers little-endian.

use crate::error::{FormatError, Result};

pub const IVF_FOURCC_VP8: [u8; 4] = *b"VP80";

const HEADER_LEN: usize = 32;
const FRAME_HEADER_LEN: usize = 12;

/// In-memory IVF file, parsed eagerly with a frame offset index.
pub struct IvfReader {
    data: Vec<u8>,
    fourcc: [u8; 4],
    width: u16,
    height: u16,
    framerate_numerator: u32,
    framerate_denominator: u32,
    /// (offset, length) of each frame payload.
    frames: Vec<(usize, usize)>,
}

impl IvfReader {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(FormatError::invalid("IVF", "file shorter than header"));
        }
        if &data[0..4] != b"DKIF" {
            return Err(FormatError::invalid("IVF", "missing DKIF signature"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != 0 {
            return Err(FormatError::unsupported("IVF", format!("version {version}")));
        }
        let header_size = u16::from_le_bytes([data[6], data[7]]) as usize;
        if header_size != HEADER_LEN {
            return Err(FormatError::invalid(
                "IVF",
                format!("unexpected header length {header_size}"),
            ));
        }

        let fourcc = [data[8], data[9], data[10], data[11]];
        let width = u16::from_le_bytes([data[12], data[13]]);
        let height = u16::from_le_bytes([data[14], data[15]]);
        let framerate_denominator = u32::from_le_bytes([data[16], data[17], data[18], data[19]]);
        let framerate_numerator = u32::from_le_bytes([data[20], data[21], data[22], data[23]]);
        let declared_count = u32::from_le_bytes([data[24], data[25], data[26], data[27]]) as usize;

        let mut frames = Vec::with_capacity(declared_count);
        let mut cursor = HEADER_LEN;
        while cursor + FRAME_HEADER_LEN <= data.len() {
            let length =
                u32::from_le_bytes([data[cursor], data[cursor + 1], data[cursor + 2], data[cursor + 3]])
                    as usize;
            let payload_start = cursor + FRAME_HEADER_LEN;
            if payload_start + length > data.len() {
                return Err(FormatError::invalid("IVF", "truncated frame record"));
            }
            frames.push((payload_start, length));
            cursor = payload_start + length;
        }

        if frames.len() != declared_count {
            tracing::debug!(
                declared = declared_count,
                actual = frames.len(),
                "IVF frame count disagrees with header"
            );
        }

        Ok(Self {
            data,
            fourcc,
            width,
            height,
            framerate_numerator,
            framerate_denominator,
            frames,
        })
    }

    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::new(std::fs::read(path)?)
    }

    pub fn fourcc(&self) -> [u8; 4] {
        self.fourcc
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn framerate(&self) -> (u32, u32) {
        (self.framerate_numerator, self.framerate_denominator)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self, index: usize) -> Result<&[u8]> {
        let (offset, length) = *self
            .frames
            .get(index)
            .ok_or(FormatError::FrameOutOfRange {
                index,
                count: self.frames.len(),
            })?;
        Ok(&self.data[offset..offset + length])
    }
}

/// IVF writer accumulating into a buffer.
pub struct IvfWriter {
    output: Vec<u8>,
    frame_count: u32,
}

impl IvfWriter {
    pub fn new(width: u16, height: u16, framerate_num: u32, framerate_den: u32) -> Self {
        let mut writer = Self {
            output: Vec::new(),
            frame_count: 0,
        };
        writer.output.extend_from_slice(b"DKIF");
        writer.output.extend_from_slice(&0u16.to_le_bytes()); // version
        writer.output.extend_from_slice(&(HEADER_LEN as u16).to_le_bytes());
        writer.output.extend_from_slice(&IVF_FOURCC_VP8);
        writer.output.extend_from_slice(&width.to_le_bytes());
        writer.output.extend_from_slice(&height.to_le_bytes());
        writer.output.extend_from_slice(&framerate_den.to_le_bytes());
        writer.output.extend_from_slice(&framerate_num.to_le_bytes());
        writer.output.extend_from_slice(&0u32.to_le_bytes()); // frame count, patched in finalize
        writer.output.extend_from_slice(&[0u8; 4]);
        writer
    }

    pub fn write_frame(&mut self, frame: &[u8], pts: u64) -> Result<()> {
        if frame.is_empty() {
            return Err(FormatError::invalid("IVF", "cannot write empty frame"));
        }
        self.output.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        self.output.extend_from_slice(&pts.to_le_bytes());
        self.output.extend_from_slice(frame);
        self.frame_count += 1;
        Ok(())
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Patch the frame count into the header and return the file bytes.
    pub fn finalize(mut self) -> Vec<u8> {
        self.output[24..28].copy_from_slice(&self.frame_count.to_le_bytes());
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let writer = IvfWriter::new(1280, 720, 30, 1);
        let bytes = writer.finalize();
        assert_eq!(&bytes[0..4], b"DKIF");
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 32);
        assert_eq!(&bytes[8..12], b"VP80");
        assert_eq!(u16::from_le_bytes([bytes[12], bytes[13]]), 1280);
        assert_eq!(u16::from_le_bytes([bytes[14], bytes[15]]), 720);
        assert_eq!(bytes.len(), 32);
    }

    #[test]
    fn empty_frame_rejected() {
        let mut writer = IvfWriter::new(64, 48, 30, 1);
        assert!(writer.write_frame(&[], 0).is_err());
    }

    #[test]
    fn write_read_round_trip_is_byte_equal() {
        let mut writer = IvfWriter::new(320, 240, 24, 1);
        writer.write_frame(&[1, 2, 3, 4, 5], 0).unwrap();
        writer.write_frame(&[9; 100], 1).unwrap();
        let original = writer.finalize();

        let reader = IvfReader::new(original.clone()).unwrap();
        assert_eq!(reader.width(), 320);
        assert_eq!(reader.height(), 240);
        assert_eq!(reader.frame_count(), 2);
        assert_eq!(reader.frame(0).unwrap(), &[1, 2, 3, 4, 5]);
        assert_eq!(reader.frame(1).unwrap(), &[9; 100]);

        // re-serialize: must be byte-equal to the original file
        let mut rewriter = IvfWriter::new(reader.width(), reader.height(), 24, 1);
        for i in 0..reader.frame_count() {
            rewriter.write_frame(reader.frame(i).unwrap(), i as u64).unwrap();
        }
        assert_eq!(rewriter.finalize(), original);
    }

    #[test]
    fn truncated_record_rejected() {
        let mut writer = IvfWriter::new(64, 48, 30, 1);
        writer.write_frame(&[7; 50], 0).unwrap();
        let mut bytes = writer.finalize();
        bytes.truncate(bytes.len() - 10);
        assert!(IvfReader::new(bytes).is_err());
    }

    #[test]
    fn frame_index_out_of_range() {
        let writer = IvfWriter::new(64, 48, 30, 1);
        let reader = IvfReader::new(writer.finalize()).unwrap();
        assert!(reader.frame(0).is_err());
    }
}
