//! salsify-codec: a VP8-compatible codec built for state-exposing
//! transport.
//!
//! The decoder is an explicit state machine: (probability tables,
//! segmentation, filter adjustments, dimensions) plus the LAST/GOLDEN/ALT
//! reference triple, identified on the wire by a 32-bit minihash. The
//! encoder is a decode simulation over the same reconstruction code, so a
//! frame's declared (source, target) state pair is exact.
//!
//! Profile: 4:2:0 chroma, bicubic or bilinear sub-pixel filters, three
//! reference frames. Unsupported VP8 features fail the session rather than
//! decode incorrectly.

pub mod bool_coder;
pub mod chunk;
pub mod consts;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod frame_header;
pub mod loopfilter;
pub mod macroblock;
pub mod mv;
pub mod predict;
pub mod probability;
pub mod quantizer;
pub mod reconstruct;
pub mod references;
pub mod state;
pub mod tokens;
pub mod transform;

pub use decoder::Decoder;
pub use encoder::{Encoder, EncoderQuality, DEFAULT_QUANTIZER};
pub use error::{CodecError, Result};
pub use frame::Frame;
pub use frame_header::{FrameHeader, QuantIndices};
pub use mv::MotionVector;
pub use references::{ReferenceSet, SharedRaster};
pub use state::DecoderState;
