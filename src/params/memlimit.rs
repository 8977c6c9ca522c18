//! Memory budget for key derivation.
//!
//! The budget is a fraction of the smallest memory limit the platform
//! reports: physical RAM, the cgroup limit on Linux and the process
//! resource limits on Unix.

use sysinfo::System;
use tracing::debug;

use crate::error::{Error, Result};

/// The budget never drops below 1 MiB.
pub const MIN_MEMORY_BUDGET: u64 = 1024 * 1024;

/// Fraction used when the requested one is zero, negative or above one half.
pub const DEFAULT_MEMORY_FRACTION: f64 = 0.5;

/// Returns the smallest memory limit reported by the platform, in bytes.
///
/// # Errors
///
/// Returns [`Error::MemoryQuery`] if no limit can be determined.
pub fn memory_limit() -> Result<u64> {
    let mut sys = System::new();
    sys.refresh_memory();

    let signals = [
        Some(sys.total_memory()),
        sys.cgroup_limits().map(|limits| limits.total_memory),
        rlimits::smallest(),
    ];

    let limit = signals
        .into_iter()
        .flatten()
        .filter(|&bytes| bytes > 0)
        .min()
        .ok_or(Error::MemoryQuery)?;

    debug!(limit, "queried platform memory limit");
    Ok(limit)
}

/// Applies the fraction and cap policy to a platform memory limit.
///
/// `max_memory` of zero means "no cap".
pub fn budget_from_limit(limit: u64, max_memory: u64, max_memory_fraction: f64) -> u64 {
    let fraction = if max_memory_fraction <= 0.0 || max_memory_fraction > 0.5 {
        DEFAULT_MEMORY_FRACTION
    } else {
        max_memory_fraction
    };

    let mut usable = (fraction * limit as f64) as u64;
    if max_memory > 0 && usable > max_memory {
        usable = max_memory;
    }
    usable.max(MIN_MEMORY_BUDGET)
}

/// Queries the platform and computes the usable memory budget in bytes.
///
/// # Errors
///
/// Returns [`Error::MemoryQuery`] if no platform memory signal is available.
pub fn memory_budget(max_memory: u64, max_memory_fraction: f64) -> Result<u64> {
    let limit = memory_limit()?;
    let budget = budget_from_limit(limit, max_memory, max_memory_fraction);
    debug!(budget, max_memory, max_memory_fraction, "computed memory budget");
    Ok(budget)
}

#[cfg(unix)]
mod rlimits {
    /// Smallest finite soft limit among address space, data segment and RSS.
    pub(super) fn smallest() -> Option<u64> {
        [
            libc::RLIMIT_AS as libc::c_int,
            libc::RLIMIT_DATA as libc::c_int,
            libc::RLIMIT_RSS as libc::c_int,
        ]
        .into_iter()
        .filter_map(soft_limit)
        .min()
    }

    fn soft_limit(resource: libc::c_int) -> Option<u64> {
        let mut rl = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: `rl` is a valid, writable rlimit struct for the duration of the call.
        let rc = unsafe { libc::getrlimit(resource as _, &mut rl) };
        if rc != 0 || rl.rlim_cur == libc::RLIM_INFINITY {
            return None;
        }
        u64::try_from(rl.rlim_cur).ok()
    }
}

#[cfg(not(unix))]
mod rlimits {
    pub(super) fn smallest() -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn fraction_is_applied() {
        assert_eq!(budget_from_limit(8 * GIB, 0, 0.25), 2 * GIB);
    }

    #[test]
    fn zero_or_large_fraction_defaults_to_half() {
        assert_eq!(budget_from_limit(8 * GIB, 0, 0.0), 4 * GIB);
        assert_eq!(budget_from_limit(8 * GIB, 0, 0.9), 4 * GIB);
        assert_eq!(budget_from_limit(8 * GIB, 0, -1.0), 4 * GIB);
    }

    #[test]
    fn cap_is_applied() {
        assert_eq!(budget_from_limit(8 * GIB, 16 * 1024 * 1024, 0.5), 16 * 1024 * 1024);
    }

    #[test]
    fn cap_above_budget_is_ignored() {
        assert_eq!(budget_from_limit(8 * GIB, 64 * GIB, 0.5), 4 * GIB);
    }

    #[test]
    fn budget_is_floored_at_one_mib() {
        assert_eq!(budget_from_limit(1024, 0, 0.5), MIN_MEMORY_BUDGET);
        assert_eq!(budget_from_limit(8 * GIB, 1, 0.5), MIN_MEMORY_BUDGET);
    }

    #[test]
    fn platform_reports_memory() {
        let limit = memory_limit().unwrap();
        assert!(limit > 0);
        assert!(memory_budget(0, 0.5).unwrap() >= MIN_MEMORY_BUDGET);
    }
}
