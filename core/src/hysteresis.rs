//! Change-gated reporting
//!
//! A reading is reported when it moved by at least the field threshold
//! and the minimum interval has elapsed, or unconditionally once the
//! maximum interval has elapsed (heartbeat). All comparisons happen on the
//! decoded fixed-point values, never on raw sensor codes.

use crate::sensor::{Reading, MAX_FIELDS};

/// Per-bus reporting policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReportPolicy {
    /// Minimum change per field, in the field's fixed-point units
    pub thresholds: [u16; MAX_FIELDS],
    /// Changes arriving sooner than this after the last report are held back
    pub min_interval_ms: u32,
    /// A report is forced once this much time passed without one
    pub max_interval_ms: u32,
}

impl ReportPolicy {
    pub const fn new(thresholds: [u16; MAX_FIELDS], min_interval_ms: u32, max_interval_ms: u32) -> Self {
        Self {
            thresholds,
            min_interval_ms,
            max_interval_ms,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.max_interval_ms > 0 && self.min_interval_ms <= self.max_interval_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Decision {
    Report,
    Suppress,
}

/// Whether a single field moved by at least `threshold` (inclusive)
pub fn crosses(old: i32, new: i32, threshold: u16) -> bool {
    old.abs_diff(new) >= u32::from(threshold)
}

/// Decide whether `new` must be reported
///
/// `old` is the last *reported* reading (`None` if nothing was reported
/// yet, which always reports). Multi-field readings are reported as a
/// whole when any field crosses its own threshold.
pub fn decide(old: Option<&Reading>, new: &Reading, policy: &ReportPolicy, elapsed_ms: u64) -> Decision {
    let Some(old) = old else {
        return Decision::Report;
    };
    if elapsed_ms >= u64::from(policy.max_interval_ms) {
        return Decision::Report;
    }
    if elapsed_ms < u64::from(policy.min_interval_ms) {
        return Decision::Suppress;
    }
    if old.len() != new.len() {
        return Decision::Report;
    }
    let changed = old
        .values()
        .iter()
        .zip(new.values())
        .zip(policy.thresholds.iter())
        .any(|((&o, &n), &t)| crosses(o, n, t));
    if changed {
        Decision::Report
    } else {
        Decision::Suppress
    }
}
