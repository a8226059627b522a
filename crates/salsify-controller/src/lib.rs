//! salsify-controller: the sender's per-frame control loop and the state
//! caches on both sides.
//!
//! The controller owns the policy half of the system: which decoder state
//! to encode from, which speculative candidate to transmit against the
//! capacity estimate, when to skip, and how to recover when the receiver
//! drifts out of the cache.

pub mod controller;
pub mod conventional;
pub mod error;
pub mod jobs;
pub mod state_cache;

pub use controller::{
    OperationMode, SelectedFrame, SenderController, CONSERVATIVE_WINDOW, FAIL_SMALL_DELTA,
    IMPROVE_DELTA, MAX_SKIPPED,
};
pub use conventional::ConventionalController;
pub use error::{ControllerError, Result};
pub use jobs::{EncodeJob, EncodeOutput, EncodePool, JOB_SLOTS};
pub use state_cache::{DecoderStateCache, EncoderStateCache};
