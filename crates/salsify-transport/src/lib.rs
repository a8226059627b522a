//! salsify-transport: loss-tolerant frame transport over UDP.
//!
//! Frames fragment into datagrams that carry the (source, target) decoder
//! minihash pair; the receiver reassembles in order, flushes partial frames
//! when the sender moves on, and acks every packet with its current state
//! and the list of complete states it holds. The transport itself keeps no
//! state across process restarts.

pub mod capacity;
pub mod delay;
pub mod error;
pub mod packet;
pub mod pacer;
pub mod reassembly;

pub use capacity::{CapacityEstimator, MAX_DELAY_US};
pub use delay::{AverageEncodingTime, AverageInterPacketDelay};
pub use error::{Result, TransportError};
pub use packet::{fragment_frame, Ack, Fragment, MAXIMUM_PAYLOAD};
pub use pacer::{inter_send_delay_us, Pacer};
pub use reassembly::{FragmentedFrame, ReassembledFrame, Reassembler, ReassemblyEvent};
