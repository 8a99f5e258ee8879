//! Roast phase segmentation.
//!
//! Splits the roast between CHARGE and DROP into
//! - drying: CHARGE to DRY_END
//! - Maillard: DRY_END to FC_START
//! - development: FC_START to DROP
//!
//! Missing DRY_END or FC_START are tolerated (their phases shrink to zero
//! and development absorbs the time). A DROP marked before FC_START is a
//! profile inconsistency and flags the result invalid rather than guessing.

use rf_core::{EventKind, EventMarks};
use serde::{Deserialize, Serialize};

/// Phase durations and shares of one roast. Recomputed on every call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub total_time_s: f64,
    pub drying_time_s: f64,
    pub maillard_time_s: f64,
    pub development_time_s: f64,
    pub drying_percent: f64,
    pub maillard_percent: f64,
    pub development_percent: f64,
    pub invalid: bool,
}

impl PhaseResult {
    /// Neutral result for a series that cannot be segmented.
    pub fn invalid() -> Self {
        Self {
            total_time_s: 0.0,
            drying_time_s: 0.0,
            maillard_time_s: 0.0,
            development_time_s: 0.0,
            drying_percent: 0.0,
            maillard_percent: 0.0,
            development_percent: 100.0,
            invalid: true,
        }
    }

    fn from_durations(total: f64, drying: f64, maillard: f64, development: f64) -> Self {
        let percent = |d: f64| d / total * 100.0;
        Self {
            total_time_s: total,
            drying_time_s: drying,
            maillard_time_s: maillard,
            development_time_s: development,
            drying_percent: percent(drying),
            maillard_percent: percent(maillard),
            development_percent: percent(development),
            invalid: false,
        }
    }
}

impl Default for PhaseResult {
    fn default() -> Self {
        Self::invalid()
    }
}

/// Segment a roast series into phases.
///
/// Only the common prefix of `timex` and `temp` is considered; marks outside
/// it are treated as unset.
pub fn segment_phases(timex: &[f64], temp: &[f64], marks: &EventMarks) -> PhaseResult {
    let len = timex.len().min(temp.len());
    if len == 0 {
        return PhaseResult::invalid();
    }
    let start = marks.get_in_bounds(EventKind::Charge, len).unwrap_or(0);
    let start_time = timex[start];
    let dry_end = marks.get_in_bounds(EventKind::DryEnd, len);
    let fc_start = marks.get_in_bounds(EventKind::FcStart, len);
    let drop = marks.get_in_bounds(EventKind::Drop, len);

    let end = drop.unwrap_or(len - 1);
    let total = timex[end] - start_time;
    if !(total.is_finite() && total > 0.0) {
        return PhaseResult::invalid();
    }
    if let (Some(drop), Some(fc_start)) = (drop, fc_start) {
        if drop < fc_start {
            return PhaseResult::invalid();
        }
    }

    let since_start = |index: usize| (timex[index] - start_time).max(0.0);
    let fcs = fc_start.map_or(0.0, since_start).min(total);
    let development = match (fc_start, drop) {
        (Some(_), Some(drop)) => since_start(drop) - fcs,
        _ => total - fcs,
    }
    .max(0.0);
    // DRY_END can't reach into development; this keeps the three phases
    // summing to the total when marks are out of order.
    let drying = dry_end
        .map_or(0.0, since_start)
        .min(total - development)
        .max(0.0);
    let maillard = (total - drying - development).max(0.0);

    PhaseResult::from_durations(total, drying, maillard, development)
}
