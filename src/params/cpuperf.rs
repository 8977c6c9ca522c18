//! Throughput benchmark of the scrypt core.
//!
//! Throughput is reported in salsa20/8 core invocations per second, the same
//! unit the CPU constraint `4 * N * r * p <= ops` is expressed in.

use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{Error, Result};

/// Default length of the measurement window.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(500);

// scrypt with N = 128, r = p = 1 runs 4 * N * r * p salsa20/8 cores.
const BENCH_LOG_N: u8 = 7;
const CORES_PER_ROUND: u64 = 512;

// Cheapest possible call, used while waiting for the clock to tick.
const WARMUP_LOG_N: u8 = 4;

/// Single-threaded scrypt throughput benchmark.
#[derive(Debug, Clone, Copy)]
pub struct CpuPerf {
    window: Duration,
}

impl Default for CpuPerf {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
        }
    }
}

impl CpuPerf {
    pub fn with_window(window: Duration) -> Self {
        Self { window }
    }

    /// Runs the benchmark and returns salsa20/8 cores per second.
    ///
    /// Blocks the calling thread for roughly the configured window.
    pub fn ops_per_second(&self) -> Result<f64> {
        let warmup = core_params(WARMUP_LOG_N)?;
        let bench = core_params(BENCH_LOG_N)?;
        let mut out = [0u8; 32];

        // Start measuring on a clock tick boundary.
        let origin = Instant::now();
        let start = loop {
            run_core(&warmup, &mut out)?;
            let now = Instant::now();
            if now != origin {
                break now;
            }
        };

        let mut cores: u64 = 0;
        let elapsed = loop {
            run_core(&bench, &mut out)?;
            cores += CORES_PER_ROUND;
            let elapsed = start.elapsed();
            if elapsed >= self.window {
                break elapsed;
            }
        };

        let ops = cores as f64 / elapsed.as_secs_f64();
        trace!(cores, ?elapsed, ops, "measured scrypt core throughput");
        Ok(ops)
    }
}

/// Measures salsa20/8 core throughput with the default window.
pub fn estimate_ops_per_second() -> Result<f64> {
    CpuPerf::default().ops_per_second()
}

fn core_params(log_n: u8) -> Result<scrypt::Params> {
    scrypt::Params::new(log_n, 1, 1, scrypt::Params::RECOMMENDED_LEN)
        .map_err(|e| Error::InvalidCostParameters(e.to_string()))
}

fn run_core(params: &scrypt::Params, out: &mut [u8]) -> Result<()> {
    scrypt::scrypt(&[], &[], params, out).map_err(|_| Error::Derivation)
}
