//! The speculative encode pool: a bounded two-slot job queue on worker
//! threads. Jobs run on independent clones of the source encoder and never
//! share mutable state; a job in flight cannot be cancelled, only ignored.

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use salsify_codec::Encoder;
use salsify_codec::references::SharedRaster;
use tracing::warn;

use crate::error::{ControllerError, Result};

pub const JOB_SLOTS: usize = 2;

/// One speculative encode request.
pub struct EncodeJob {
    pub name: &'static str,
    pub encoder: Encoder,
    pub raster: SharedRaster,
    pub y_ac_qi: u8,
}

/// A finished encode, ready for selection.
pub struct EncodeOutput {
    pub name: &'static str,
    pub encoder: Encoder,
    pub frame: Vec<u8>,
    pub source_minihash: u32,
    pub y_ac_qi: u8,
    pub encode_time: Duration,
}

fn run_job(mut job: EncodeJob) -> Result<EncodeOutput> {
    let source_minihash = job.encoder.minihash();
    let started = Instant::now();
    let frame = job.encoder.encode_with_quantizer(&job.raster, job.y_ac_qi)?;
    Ok(EncodeOutput {
        name: job.name,
        encoder: job.encoder,
        frame,
        source_minihash,
        y_ac_qi: job.y_ac_qi,
        encode_time: started.elapsed(),
    })
}

/// Fixed worker pool with one thread per job slot.
pub struct EncodePool {
    job_tx: Sender<EncodeJob>,
    result_rx: Receiver<Result<EncodeOutput>>,
    in_flight: usize,
}

impl EncodePool {
    pub fn new() -> Self {
        let (job_tx, job_rx) = bounded::<EncodeJob>(JOB_SLOTS);
        let (result_tx, result_rx) = bounded::<Result<EncodeOutput>>(JOB_SLOTS);

        for slot in 0..JOB_SLOTS {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            thread::Builder::new()
                .name(format!("encode-{slot}"))
                .spawn(move || {
                    for job in job_rx.iter() {
                        if result_tx.send(run_job(job)).is_err() {
                            break;
                        }
                    }
                })
                .expect("spawn encode worker");
        }

        Self {
            job_tx,
            result_rx,
            in_flight: 0,
        }
    }

    pub fn busy(&self) -> bool {
        self.in_flight > 0
    }

    /// Submit one batch of jobs (at most one per slot).
    pub fn submit(&mut self, jobs: Vec<EncodeJob>) -> Result<()> {
        debug_assert!(jobs.len() <= JOB_SLOTS);
        for job in jobs {
            self.job_tx
                .send(job)
                .map_err(|_| ControllerError::Pool("encode workers gone".into()))?;
            self.in_flight += 1;
        }
        Ok(())
    }

    /// Block up to `timeout` for the current batch to start completing,
    /// then gather all of it. `Ok(None)` on timeout (or when nothing is
    /// running).
    pub fn wait_batch(&mut self, timeout: std::time::Duration) -> Result<Option<Vec<EncodeOutput>>> {
        match self.result_rx.recv_timeout(timeout) {
            Ok(first) => {
                self.in_flight -= 1;
                let mut outputs = Vec::with_capacity(JOB_SLOTS);
                match first {
                    Ok(output) => outputs.push(output),
                    Err(error) => warn!(%error, "speculative encode failed"),
                }
                outputs.extend(self.collect_batch());
                Ok(Some(outputs))
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Ok(None),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(ControllerError::Pool("encode workers gone".into()))
            }
        }
    }

    /// Collect all outputs of the current batch, blocking until each
    /// in-flight job reports. Failed jobs are dropped with a warning, as a
    /// failed speculative encode only costs its candidate.
    pub fn collect_batch(&mut self) -> Vec<EncodeOutput> {
        let mut outputs = Vec::with_capacity(self.in_flight);
        while self.in_flight > 0 {
            match self.result_rx.recv() {
                Ok(Ok(output)) => outputs.push(output),
                Ok(Err(error)) => warn!(%error, "speculative encode failed"),
                Err(_) => break,
            }
            self.in_flight -= 1;
        }
        outputs
    }
}

impl Default for EncodePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use salsify_codec::EncoderQuality;
    use salsify_core::RasterPool;
    use std::sync::Arc;

    #[test]
    fn both_slots_run_and_report() {
        let pool = RasterPool::new(32, 32);
        let encoder = Encoder::new(32, 32, false, EncoderQuality::Realtime, &pool).unwrap();
        let raster: SharedRaster = Arc::new(pool.take().unwrap());

        let mut encode_pool = EncodePool::new();
        encode_pool
            .submit(vec![
                EncodeJob {
                    name: "improve",
                    encoder: encoder.clone(),
                    raster: raster.clone(),
                    y_ac_qi: 40,
                },
                EncodeJob {
                    name: "fail-small",
                    encoder,
                    raster,
                    y_ac_qi: 90,
                },
            ])
            .unwrap();

        let outputs = encode_pool.collect_batch();
        assert_eq!(outputs.len(), 2);
        assert!(!encode_pool.busy());

        let improve = outputs.iter().find(|o| o.name == "improve").unwrap();
        let fail_small = outputs.iter().find(|o| o.name == "fail-small").unwrap();
        // the coarser quantizer cannot produce a bigger frame
        assert!(fail_small.frame.len() <= improve.frame.len());
        // both started from the same source state
        assert_eq!(improve.source_minihash, fail_small.source_minihash);
    }
}
