//! salsify-formats: container I/O.
//!
//! File-based inputs and outputs around the core: the IVF container used by
//! tests and tools, and the YUV4MPEG2 stream format the sender reads and the
//! receiver's test sink writes. The network path never touches these.

pub mod error;
pub mod ivf;
pub mod y4m;

pub use error::{FormatError, Result};
pub use ivf::{IvfReader, IvfWriter, IVF_FOURCC_VP8};
pub use y4m::{FrameInput, Y4mReader, Y4mWriter};
