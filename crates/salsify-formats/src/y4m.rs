//! YUV4MPEG2 streaming reader and writer.
//!
//! The reader is the file-backed implementation of [`FrameInput`]: it yields
//! rasters of fixed dimensions until EOF. Only 4:2:0 chroma ("C420" family)
//! is accepted, matching the codec's single profile.

use std::io::{BufRead, BufReader, Read, Write};

use salsify_core::{Raster, RasterHandle, RasterPool};
use tracing::debug;

use crate::error::{FormatError, Result};

/// A source of rasters with fixed dimensions. The sender's controller
/// depends on this capability, not on any concrete input. Camera and JPEG
/// variants are external collaborators; the Y4M reader lives here.
pub trait FrameInput {
    fn display_width(&self) -> u16;
    fn display_height(&self) -> u16;

    /// The next frame, or `None` on end of input.
    fn next_frame(&mut self, pool: &RasterPool) -> Result<Option<RasterHandle>>;
}

/// Streaming YUV4MPEG2 reader.
pub struct Y4mReader<R> {
    input: BufReader<R>,
    width: u16,
    height: u16,
    framerate_numerator: u32,
    framerate_denominator: u32,
}

impl<R: Read> Y4mReader<R> {
    pub fn new(input: R) -> Result<Self> {
        let mut input = BufReader::new(input);
        let mut header = String::new();
        input.read_line(&mut header)?;
        let header = header.trim_end_matches('\n');

        let mut tags = header.split(' ');
        if tags.next() != Some("YUV4MPEG2") {
            return Err(FormatError::invalid("Y4M", "missing YUV4MPEG2 magic"));
        }

        let mut width = None;
        let mut height = None;
        let mut framerate = (30, 1);

        for tag in tags {
            if tag.is_empty() {
                continue;
            }
            let (kind, value) = tag.split_at(1);
            match kind {
                "W" => {
                    width = Some(value.parse::<u16>().map_err(|_| {
                        FormatError::invalid("Y4M", format!("bad width tag {value:?}"))
                    })?)
                }
                "H" => {
                    height = Some(value.parse::<u16>().map_err(|_| {
                        FormatError::invalid("Y4M", format!("bad height tag {value:?}"))
                    })?)
                }
                "F" => {
                    let (num, den) = value.split_once(':').ok_or_else(|| {
                        FormatError::invalid("Y4M", format!("bad framerate tag {value:?}"))
                    })?;
                    framerate = (
                        num.parse().map_err(|_| {
                            FormatError::invalid("Y4M", format!("bad framerate tag {value:?}"))
                        })?,
                        den.parse().map_err(|_| {
                            FormatError::invalid("Y4M", format!("bad framerate tag {value:?}"))
                        })?,
                    );
                }
                "C" => {
                    if !value.starts_with("420") {
                        return Err(FormatError::unsupported("Y4M", format!("chroma {value}")));
                    }
                }
                // interlacing and aspect tags carry no information we use
                "I" | "A" | "X" => {}
                _ => debug!(tag, "ignoring unknown Y4M header tag"),
            }
        }

        let width = width.ok_or_else(|| FormatError::invalid("Y4M", "missing W tag"))?;
        let height = height.ok_or_else(|| FormatError::invalid("Y4M", "missing H tag"))?;
        if width == 0 || height == 0 {
            return Err(FormatError::invalid("Y4M", "zero dimension"));
        }

        Ok(Self {
            input,
            width,
            height,
            framerate_numerator: framerate.0,
            framerate_denominator: framerate.1,
        })
    }

    pub fn framerate(&self) -> (u32, u32) {
        (self.framerate_numerator, self.framerate_denominator)
    }

    fn read_frame_marker(&mut self) -> Result<bool> {
        let mut line = String::new();
        let read = self.input.read_line(&mut line)?;
        if read == 0 {
            return Ok(false); // clean EOF between frames
        }
        let line = line.trim_end_matches('\n');
        if line != "FRAME" && !line.starts_with("FRAME ") {
            return Err(FormatError::invalid(
                "Y4M",
                format!("expected FRAME marker, got {line:?}"),
            ));
        }
        Ok(true)
    }
}

impl<R: Read> FrameInput for Y4mReader<R> {
    fn display_width(&self) -> u16 {
        self.width
    }

    fn display_height(&self) -> u16 {
        self.height
    }

    fn next_frame(&mut self, pool: &RasterPool) -> Result<Option<RasterHandle>> {
        if !self.read_frame_marker()? {
            return Ok(None);
        }

        let luma = self.width as usize * self.height as usize;
        let chroma =
            (self.width as usize).div_ceil(2) * (self.height as usize).div_ceil(2);

        let mut y = vec![0u8; luma];
        let mut u = vec![0u8; chroma];
        let mut v = vec![0u8; chroma];
        self.input.read_exact(&mut y)?;
        self.input.read_exact(&mut u)?;
        self.input.read_exact(&mut v)?;

        let mut handle = pool
            .take_sized(self.width, self.height)
            .map_err(|e| FormatError::invalid("Y4M", e.to_string()))?;
        handle
            .load_i420(&y, &u, &v)
            .map_err(|e| FormatError::invalid("Y4M", e.to_string()))?;
        Ok(Some(handle))
    }
}

/// YUV4MPEG2 writer; the receiver-side test sink.
pub struct Y4mWriter<W> {
    output: W,
    wrote_header: bool,
    width: u16,
    height: u16,
    framerate_numerator: u32,
    framerate_denominator: u32,
}

impl<W: Write> Y4mWriter<W> {
    pub fn new(output: W, width: u16, height: u16, framerate: (u32, u32)) -> Self {
        Self {
            output,
            wrote_header: false,
            width,
            height,
            framerate_numerator: framerate.0,
            framerate_denominator: framerate.1,
        }
    }

    pub fn write_raster(&mut self, raster: &Raster) -> Result<()> {
        if !self.wrote_header {
            writeln!(
                self.output,
                "YUV4MPEG2 W{} H{} F{}:{} Ip A1:1 C420",
                self.width, self.height, self.framerate_numerator, self.framerate_denominator
            )?;
            self.wrote_header = true;
        }
        writeln!(self.output, "FRAME")?;
        self.output.write_all(&raster.y.to_packed())?;
        self.output.write_all(&raster.u.to_packed())?;
        self.output.write_all(&raster.v.to_packed())?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.output.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_y4m(frames: usize) -> Vec<u8> {
        let mut data = b"YUV4MPEG2 W4 H4 F25:1 Ip A1:1 C420jpeg\n".to_vec();
        for i in 0..frames {
            data.extend_from_slice(b"FRAME\n");
            data.extend(std::iter::repeat(i as u8).take(16)); // Y
            data.extend(std::iter::repeat(100).take(4)); // U
            data.extend(std::iter::repeat(200).take(4)); // V
        }
        data
    }

    #[test]
    fn parses_header_tags() {
        let data = sample_y4m(0);
        let reader = Y4mReader::new(&data[..]).unwrap();
        assert_eq!(reader.display_width(), 4);
        assert_eq!(reader.display_height(), 4);
        assert_eq!(reader.framerate(), (25, 1));
    }

    #[test]
    fn reads_frames_until_eof() {
        let data = sample_y4m(2);
        let mut reader = Y4mReader::new(&data[..]).unwrap();
        let pool = RasterPool::new(4, 4);

        let first = reader.next_frame(&pool).unwrap().unwrap();
        assert_eq!(first.y.at(0, 0), 0);
        assert_eq!(first.u.at(0, 0), 100);

        let second = reader.next_frame(&pool).unwrap().unwrap();
        assert_eq!(second.y.at(3, 3), 1);

        assert!(reader.next_frame(&pool).unwrap().is_none());
    }

    #[test]
    fn rejects_non_420_chroma() {
        let data = b"YUV4MPEG2 W4 H4 F25:1 C444\n".to_vec();
        assert!(Y4mReader::new(&data[..]).is_err());
    }

    #[test]
    fn writer_reader_round_trip() {
        let pool = RasterPool::new(4, 4);
        let mut raster = pool.take().unwrap();
        raster.load_i420(&[50; 16], &[60; 4], &[70; 4]).unwrap();

        let mut buffer = Vec::new();
        {
            let mut writer = Y4mWriter::new(&mut buffer, 4, 4, (25, 1));
            writer.write_raster(&raster).unwrap();
        }

        let mut reader = Y4mReader::new(&buffer[..]).unwrap();
        let back = reader.next_frame(&pool).unwrap().unwrap();
        assert_eq!(back.y.to_packed(), vec![50; 16]);
        assert_eq!(back.v.to_packed(), vec![70; 4]);
    }
}
