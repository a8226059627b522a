//! salsify-core: raster model, raster pool and content hashing.
//!
//! The leaf crate of the workspace. Everything here is codec-agnostic: fixed
//! 4:2:0 sample planes with macroblock-aligned padding, a free-list raster
//! pool, and the stable hashing that backs the wire-visible minihash.

pub mod error;
pub mod hash;
pub mod pool;
pub mod raster;

pub use error::{CoreError, Result};
pub use hash::{minihash, StableHasher};
pub use pool::{RasterHandle, RasterPool};
pub use raster::{Plane, Raster, MACROBLOCK_SIZE};
