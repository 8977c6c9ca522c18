//! scrypt cost parameters and their automatic selection.
//!
//! Selection follows two constraints on `N = 2^log_n`:
//!
//! ```text
//! memory:  128 * N * r     <= memory budget (bytes)
//! CPU:     4 * N * r * p   <= ops budget (salsa20/8 cores)
//! ```
//!
//! `r` is fixed at 8. Whichever constraint is tighter picks `N`; the CPU
//! budget left over in the memory-bound case goes into `p`.

pub mod cpuperf;
pub mod memlimit;

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Block size factor used for every newly selected parameter set.
pub const BLOCK_SIZE: u32 = 8;

/// Minimum ops budget: 2^15 salsa20/8 cores.
pub const MIN_OPS_BUDGET: f64 = 32768.0;

const MAX_LOG_N: u8 = 63;
const MAX_RP: u64 = 0x3fff_ffff;

/// The scrypt cost parameters `(log2 N, r, p)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CostParameters {
    log_n: u8,
    r: u32,
    p: u32,
}

impl CostParameters {
    /// Creates a parameter set, rejecting values scrypt cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCostParameters`] if `log_n` is outside `[1, 63]`,
    /// `r` or `p` is zero, or `r * p >= 2^30`.
    pub fn new(log_n: u8, r: u32, p: u32) -> Result<Self> {
        let params = Self { log_n, r, p };
        params.validate()?;
        Ok(params)
    }

    pub fn log_n(&self) -> u8 {
        self.log_n
    }

    /// The memory cost factor `N = 2^log_n`.
    pub fn n(&self) -> u64 {
        1 << self.log_n
    }

    pub fn r(&self) -> u32 {
        self.r
    }

    pub fn p(&self) -> u32 {
        self.p
    }

    /// Bytes of scratch memory scrypt needs for these parameters.
    pub fn memory_required(&self) -> u64 {
        128u64.saturating_mul(self.n()).saturating_mul(u64::from(self.r))
    }

    /// Number of salsa20/8 cores a derivation runs.
    pub fn ops_required(&self) -> f64 {
        4.0 * self.n() as f64 * f64::from(self.r) * f64::from(self.p)
    }

    fn validate(&self) -> Result<()> {
        if !(1..=MAX_LOG_N).contains(&self.log_n) {
            return Err(Error::InvalidCostParameters(format!(
                "log2(N) is {} but must be in [1, {MAX_LOG_N}]",
                self.log_n
            )));
        }
        if self.r == 0 || self.p == 0 {
            return Err(Error::InvalidCostParameters(
                "r and p must be positive".to_string(),
            ));
        }
        if u64::from(self.r) * u64::from(self.p) > MAX_RP {
            return Err(Error::InvalidCostParameters(format!(
                "r * p must be smaller than 2^30 (r = {}, p = {})",
                self.r, self.p
            )));
        }
        Ok(())
    }
}

/// Resource limits a caller is willing to spend on key derivation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostPolicy {
    /// Upper bound in bytes; zero means no explicit cap.
    pub max_memory: u64,
    /// Fraction of platform memory to use, in `(0, 0.5]`.
    pub max_memory_fraction: f64,
    /// Wall-clock seconds a derivation may take.
    pub max_time: f64,
}

impl Default for CostPolicy {
    fn default() -> Self {
        Self {
            max_memory: 0,
            max_memory_fraction: 0.5,
            max_time: 5.0,
        }
    }
}

impl CostPolicy {
    /// Limits used when opening existing data; more generous than for encryption.
    pub fn for_decryption() -> Self {
        Self {
            max_time: 300.0,
            ..Self::default()
        }
    }
}

/// Memory and CPU budgets resolved from a [`CostPolicy`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budget {
    memory: u64,
    ops: f64,
}

impl Budget {
    /// Builds a budget from a memory budget in bytes, a measured throughput
    /// and a time limit. The ops budget never drops below [`MIN_OPS_BUDGET`].
    pub fn new(memory: u64, ops_per_second: f64, max_time: f64) -> Self {
        Self {
            memory,
            ops: (ops_per_second * max_time).max(MIN_OPS_BUDGET),
        }
    }

    /// Queries available memory and benchmarks the CPU.
    ///
    /// # Errors
    ///
    /// Fails if the platform memory cannot be determined or the benchmark
    /// cannot run.
    pub fn measure(policy: &CostPolicy) -> Result<Self> {
        let memory = memlimit::memory_budget(policy.max_memory, policy.max_memory_fraction)?;
        let ops_per_second = cpuperf::estimate_ops_per_second()?;
        let budget = Self::new(memory, ops_per_second, policy.max_time);
        debug!(memory, ops = budget.ops, "resolved cost budget");
        Ok(budget)
    }

    pub fn memory(&self) -> u64 {
        self.memory
    }

    pub fn ops(&self) -> f64 {
        self.ops
    }

    /// Picks the strongest parameters that fit in this budget.
    pub fn select(&self) -> CostParameters {
        let r = BLOCK_SIZE;
        let memory = self.memory as f64;

        let params = if self.ops < memory / 32.0 {
            let max_n = self.ops / (f64::from(r) * 4.0);
            CostParameters {
                log_n: largest_log_n(max_n),
                r,
                p: 1,
            }
        } else {
            let max_n = memory / (f64::from(r) * 128.0);
            let log_n = largest_log_n(max_n);
            let max_rp = (self.ops / 4.0 / (1u64 << log_n) as f64).min(MAX_RP as f64);
            CostParameters {
                log_n,
                r,
                p: ((max_rp as u32) / r).max(1),
            }
        };

        debug!(
            log_n = params.log_n,
            r = params.r,
            p = params.p,
            memory = self.memory,
            ops = self.ops,
            "selected scrypt parameters"
        );
        params
    }

    /// Checks that `params` can run within this budget.
    ///
    /// # Errors
    ///
    /// [`Error::ExcessiveMemory`] or [`Error::ExcessiveTime`] when a
    /// constraint is violated.
    pub fn check(&self, params: &CostParameters) -> Result<()> {
        params.validate()?;
        let n = params.n();
        if (self.memory / n) / u64::from(params.r) < 128 {
            return Err(Error::ExcessiveMemory);
        }
        if (self.ops / n as f64) / (f64::from(params.r) * f64::from(params.p)) < 4.0 {
            return Err(Error::ExcessiveTime);
        }
        Ok(())
    }

    /// `true` if `params` fits in this budget.
    pub fn allows(&self, params: &CostParameters) -> bool {
        self.check(params).is_ok()
    }
}

// Largest power of two strictly less than 2 * max_n, as log2, clamped to [1, 63].
fn largest_log_n(max_n: f64) -> u8 {
    let mut log_n = 1;
    while log_n < MAX_LOG_N {
        if (1u64 << log_n) as f64 > max_n / 2.0 {
            break;
        }
        log_n += 1;
    }
    log_n
}

/// Chooses parameters for a memory budget, throughput and time limit.
pub fn select_parameters(memory_budget: u64, ops_per_second: f64, max_time: f64) -> CostParameters {
    Budget::new(memory_budget, ops_per_second, max_time).select()
}

/// `true` if `params` satisfy both cost constraints for the given budgets.
pub fn validate_parameters(params: &CostParameters, memory_budget: u64, ops_budget: f64) -> bool {
    Budget {
        memory: memory_budget,
        ops: ops_budget,
    }
    .allows(params)
}

/// Measures the host and picks parameters for `policy`.
///
/// # Errors
///
/// Fails if the memory limit cannot be determined or the benchmark fails.
pub fn pick_parameters(policy: &CostPolicy) -> Result<CostParameters> {
    Ok(Budget::measure(policy)?.select())
}
