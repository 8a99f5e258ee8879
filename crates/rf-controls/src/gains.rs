//! Gain scheduling.
//!
//! Gains can follow the operating point: each of Kp, Ki and Kd is either the
//! constant reference gain or interpolated across up to three
//! `(breakpoint, gains)` points, linearly over the first two or
//! quadratically over all three. Interpolated values are clamped to the range
//! spanned by the points used, so extrapolation can never produce a gain
//! larger or smaller than any configured one. Degenerate breakpoints fall
//! back to the reference gain.

use serde::{Deserialize, Serialize};

/// Breakpoints closer than this are treated as coincident.
const BREAKPOINT_EPS: f64 = 1e-9;

/// One set of PID gains.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Gains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Gains {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }

    pub fn is_finite(&self) -> bool {
        self.kp.is_finite() && self.ki.is_finite() && self.kd.is_finite()
    }
}

/// Interpolation used by a [`GainSchedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    /// Reference gains only.
    #[default]
    Off,
    /// Straight line through points 0 and 1.
    Linear,
    /// Parabola through points 0, 1 and 2.
    Quadratic,
}

/// Process value the schedule is indexed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleInput {
    #[default]
    Target,
    Measurement,
}

/// Reference operating point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GainPoint {
    pub breakpoint: f64,
    #[serde(flatten)]
    pub gains: Gains,
}

impl GainPoint {
    pub fn new(breakpoint: f64, kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            breakpoint,
            gains: Gains::new(kp, ki, kd),
        }
    }
}

/// Gain schedule configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainSchedule {
    pub mode: ScheduleMode,
    pub input: ScheduleInput,
    pub points: [GainPoint; 3],
    pub schedule_kp: bool,
    pub schedule_ki: bool,
    pub schedule_kd: bool,
}

impl Default for GainSchedule {
    fn default() -> Self {
        Self {
            mode: ScheduleMode::Off,
            input: ScheduleInput::Target,
            points: [GainPoint::default(); 3],
            schedule_kp: true,
            schedule_ki: true,
            schedule_kd: true,
        }
    }
}

impl GainSchedule {
    pub fn linear(input: ScheduleInput, p0: GainPoint, p1: GainPoint) -> Self {
        Self {
            mode: ScheduleMode::Linear,
            input,
            points: [p0, p1, GainPoint::default()],
            ..Self::default()
        }
    }

    pub fn quadratic(input: ScheduleInput, p0: GainPoint, p1: GainPoint, p2: GainPoint) -> Self {
        Self {
            mode: ScheduleMode::Quadratic,
            input,
            points: [p0, p1, p2],
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.mode != ScheduleMode::Off
    }

    fn active_points(&self) -> &[GainPoint] {
        match self.mode {
            ScheduleMode::Off => &self.points[..0],
            ScheduleMode::Linear => &self.points[..2],
            ScheduleMode::Quadratic => &self.points[..],
        }
    }

    /// True when the breakpoints in use cannot define an interpolant.
    pub fn is_degenerate(&self) -> bool {
        let points = self.active_points();
        for (i, a) in points.iter().enumerate() {
            if !a.breakpoint.is_finite() || !a.gains.is_finite() {
                return true;
            }
            for b in &points[i + 1..] {
                if (a.breakpoint - b.breakpoint).abs() < BREAKPOINT_EPS {
                    return true;
                }
            }
        }
        false
    }

    /// Gains for the current operating point.
    pub fn gains(&self, reference: Gains, target: f64, measurement: f64) -> Gains {
        if !self.is_enabled() || self.is_degenerate() {
            return reference;
        }
        let x = match self.input {
            ScheduleInput::Target => target,
            ScheduleInput::Measurement => measurement,
        };
        if !x.is_finite() {
            return reference;
        }
        let points = self.active_points();
        let pick = |enabled: bool, fallback: f64, select: fn(&Gains) -> f64| {
            if !enabled {
                return fallback;
            }
            let ys: Vec<(f64, f64)> = points
                .iter()
                .map(|p| (p.breakpoint, select(&p.gains)))
                .collect();
            let value = interpolate(&ys, x);
            if value.is_finite() { value } else { fallback }
        };
        Gains {
            kp: pick(self.schedule_kp, reference.kp, |g| g.kp),
            ki: pick(self.schedule_ki, reference.ki, |g| g.ki),
            kd: pick(self.schedule_kd, reference.kd, |g| g.kd),
        }
    }
}

/// Lagrange interpolation through `points`, clamped to their value range.
fn interpolate(points: &[(f64, f64)], x: f64) -> f64 {
    let mut value = 0.0;
    for (i, &(xi, yi)) in points.iter().enumerate() {
        let mut basis = 1.0;
        for (j, &(xj, _)) in points.iter().enumerate() {
            if i != j {
                basis *= (x - xj) / (xi - xj);
            }
        }
        value += yi * basis;
    }
    let lo = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let hi = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    value.clamp(lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REF: Gains = Gains {
        kp: 2.0,
        ki: 0.03,
        kd: 0.0,
    };

    #[test]
    fn off_returns_reference() {
        let schedule = GainSchedule::default();
        assert_eq!(schedule.gains(REF, 150.0, 140.0), REF);
    }

    #[test]
    fn linear_midpoint() {
        let schedule = GainSchedule::linear(
            ScheduleInput::Target,
            GainPoint::new(100.0, 1.0, 0.01, 0.0),
            GainPoint::new(200.0, 3.0, 0.03, 2.0),
        );
        let g = schedule.gains(REF, 150.0, 0.0);
        assert!((g.kp - 2.0).abs() < 1e-12);
        assert!((g.ki - 0.02).abs() < 1e-12);
        assert!((g.kd - 1.0).abs() < 1e-12);
    }

    #[test]
    fn linear_extrapolation_is_clamped() {
        let schedule = GainSchedule::linear(
            ScheduleInput::Measurement,
            GainPoint::new(100.0, 1.0, 0.01, 0.0),
            GainPoint::new(200.0, 3.0, 0.03, 2.0),
        );
        let high = schedule.gains(REF, 0.0, 500.0);
        assert_eq!(high.kp, 3.0);
        let low = schedule.gains(REF, 0.0, -50.0);
        assert_eq!(low.kp, 1.0);
    }

    #[test]
    fn quadratic_hits_points() {
        let schedule = GainSchedule::quadratic(
            ScheduleInput::Target,
            GainPoint::new(100.0, 1.0, 0.0, 0.0),
            GainPoint::new(150.0, 4.0, 0.0, 0.0),
            GainPoint::new(200.0, 2.0, 0.0, 0.0),
        );
        for (x, kp) in [(100.0, 1.0), (150.0, 4.0), (200.0, 2.0)] {
            let g = schedule.gains(REF, x, 0.0);
            assert!((g.kp - kp).abs() < 1e-9, "kp at {x}");
        }
        // the parabola peaks slightly above 4.0 near 155
        let g = schedule.gains(REF, 155.0, 0.0);
        assert_eq!(g.kp, 4.0);
    }

    #[test]
    fn degenerate_breakpoints_fall_back() {
        let schedule = GainSchedule::linear(
            ScheduleInput::Target,
            GainPoint::new(100.0, 1.0, 0.01, 0.0),
            GainPoint::new(100.0, 3.0, 0.03, 2.0),
        );
        assert!(schedule.is_degenerate());
        assert_eq!(schedule.gains(REF, 150.0, 0.0), REF);
    }

    #[test]
    fn unscheduled_terms_keep_reference() {
        let mut schedule = GainSchedule::linear(
            ScheduleInput::Target,
            GainPoint::new(100.0, 1.0, 0.01, 5.0),
            GainPoint::new(200.0, 3.0, 0.03, 5.0),
        );
        schedule.schedule_kd = false;
        schedule.schedule_ki = false;
        let g = schedule.gains(REF, 150.0, 0.0);
        assert_eq!(g.ki, REF.ki);
        assert_eq!(g.kd, REF.kd);
        assert!((g.kp - 2.0).abs() < 1e-12);
    }
}
