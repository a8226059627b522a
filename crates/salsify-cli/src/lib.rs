//! Shared plumbing for the salsify command-line tools.

use std::time::Instant;

use tracing_subscriber::EnvFilter;

/// Initialize tracing from `-v` counts, honoring `RUST_LOG` when set.
pub fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Microseconds since an epoch instant; the process-local clock for EWMA
/// bookkeeping.
pub fn micros_since(epoch: Instant) -> u64 {
    epoch.elapsed().as_micros() as u64
}

/// Resident-set size in kilobytes, from procfs. `None` off Linux or when
/// the file is unreadable.
pub fn memory_usage_kb() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_kb = 4; // page size on every target we run on
    Some(resident_pages * page_kb)
}
