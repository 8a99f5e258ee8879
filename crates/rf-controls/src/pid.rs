//! Synchronized PID controller for heater/burner output.
//!
//! The controller runs in sampled mode: the sampling thread calls
//! [`PidController::update`] once per tick with the latest reading, while
//! other threads may change the target, switch the controller on or off or
//! read its terms. Every public method locks the same internal mutex; the
//! lock is held for the arithmetic and for the final duty dispatch only.
//!
//! Control law per tick:
//! - `P = Kp * (beta * target - pv)` (setpoint weighting)
//! - `I += Ki * (target - pv) * dt`, skipped while the output is saturated
//!   in the direction the error pushes, and right after an integral reset
//! - `D = Kd * d(gamma * target - pv)/dt`, low-pass filtered, clamped and
//!   damped on measurement spikes or large setpoint changes
//! - output `P + I + D`, optionally smoothed, clamped to `[out_min, out_max]`,
//!   with back-calculation bleeding the integral when the clamp engaged
//!
//! While inactive the target follows the measurement, so switching on
//! starts from zero error.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rf_core::Reading;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::duty::{ControlSink, DutyDispatcher};
use crate::error::{ControlError, ControlResult};
use crate::filter::{FilterConfig, LowPassFilter};
use crate::gains::{GainSchedule, Gains};

/// Measurements kept for spike detection.
const HISTORY_LEN: usize = 5;

/// PID controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidConfig {
    /// Reference proportional gain.
    pub kp: f64,
    /// Reference integral gain (per second).
    pub ki: f64,
    /// Reference derivative gain (seconds).
    pub kd: f64,
    /// Gain schedule applied on top of the reference gains.
    pub gain_schedule: GainSchedule,

    pub out_min: f64,
    pub out_max: f64,
    pub duty_min: f64,
    pub duty_max: f64,
    /// Smallest duty change that is dispatched immediately.
    pub duty_steps: f64,
    /// Ticks after which the duty is re-dispatched even if unchanged.
    pub force_duty: u32,

    /// Setpoint weight `beta` of the proportional term.
    pub setpoint_weight: f64,
    /// Setpoint weight `gamma` of the derivative term (0 = pure derivative on measurement).
    pub derivative_weight: f64,

    /// Ticks closer than this (seconds) are ignored.
    pub min_dt: f64,

    pub integral_windup_prevention: bool,
    /// Integral limits as a multiple of the output limits.
    pub integral_limit_factor: f64,
    /// Fraction of the clamped-away output removed from the integral.
    pub back_calculation_factor: f64,

    pub integral_reset_on_setpoint_change: bool,
    /// Target jump (degrees) that counts as a significant setpoint change.
    pub significant_change_limit: f64,
    /// Jump above which the integral is zeroed instead of halved.
    pub setpoint_change_threshold: f64,
    /// Multiplier applied to D on a significant setpoint change.
    pub setpoint_change_damping: f64,

    /// Absolute limit on the derivative term.
    pub derivative_limit: f64,
    /// Derivative low-pass cutoff in Hz, `None` for an unfiltered derivative.
    pub derivative_filter_cutoff_hz: Option<f64>,
    /// Output low-pass cutoff in Hz, `None` for no output smoothing.
    pub output_filter_cutoff_hz: Option<f64>,

    /// Step change larger than this multiple of the recent mean change is a spike.
    pub discontinuity_ratio: f64,
    /// Step change must also exceed this (degrees) to count as a spike.
    pub discontinuity_min_change: f64,
    /// Multiplier applied to D when a spike is detected.
    pub discontinuity_damping: f64,

    /// Rate at which `update` is called, used to tune the filters.
    pub sampling_rate_hz: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 2.0,
            ki: 0.03,
            kd: 0.0,
            gain_schedule: GainSchedule::default(),
            out_min: 0.0,
            out_max: 100.0,
            duty_min: 0.0,
            duty_max: 100.0,
            duty_steps: 1.0,
            force_duty: 3,
            setpoint_weight: 1.0,
            derivative_weight: 0.0,
            min_dt: 0.05,
            integral_windup_prevention: true,
            integral_limit_factor: 1.0,
            back_calculation_factor: 0.5,
            integral_reset_on_setpoint_change: true,
            significant_change_limit: 5.0,
            setpoint_change_threshold: 25.0,
            setpoint_change_damping: 0.5,
            derivative_limit: 100.0,
            derivative_filter_cutoff_hz: Some(0.1),
            output_filter_cutoff_hz: None,
            discontinuity_ratio: 2.5,
            discontinuity_min_change: 1.0,
            discontinuity_damping: 0.2,
            sampling_rate_hz: 0.5,
        }
    }
}

impl PidConfig {
    pub fn gains(&self) -> Gains {
        Gains::new(self.kp, self.ki, self.kd)
    }

    pub fn validate(&self) -> ControlResult<()> {
        if !self.gains().is_finite() {
            return Err(ControlError::InvalidArg {
                what: "gains must be finite",
            });
        }
        let finite = [
            self.out_min,
            self.out_max,
            self.duty_min,
            self.duty_max,
            self.setpoint_weight,
            self.derivative_weight,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(ControlError::InvalidArg {
                what: "limits and setpoint weights must be finite",
            });
        }
        if self.out_min >= self.out_max {
            return Err(ControlError::InvalidArg {
                what: "out_min must be less than out_max",
            });
        }
        if self.duty_min > self.duty_max {
            return Err(ControlError::InvalidArg {
                what: "duty_min must not exceed duty_max",
            });
        }
        let non_negative = [
            self.duty_steps,
            self.integral_limit_factor,
            self.back_calculation_factor,
            self.significant_change_limit,
            self.setpoint_change_threshold,
            self.setpoint_change_damping,
            self.discontinuity_ratio,
            self.discontinuity_min_change,
            self.discontinuity_damping,
        ];
        if non_negative.iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(ControlError::InvalidArg {
                what: "steps, factors and thresholds must be non-negative",
            });
        }
        if !(self.min_dt.is_finite() && self.min_dt > 0.0) {
            return Err(ControlError::InvalidArg {
                what: "min_dt must be positive",
            });
        }
        if !(self.derivative_limit.is_finite() && self.derivative_limit > 0.0) {
            return Err(ControlError::InvalidArg {
                what: "derivative_limit must be positive",
            });
        }
        if !(self.sampling_rate_hz.is_finite() && self.sampling_rate_hz > 0.0) {
            return Err(ControlError::InvalidArg {
                what: "sampling_rate_hz must be positive",
            });
        }
        for cutoff in [self.derivative_filter_cutoff_hz, self.output_filter_cutoff_hz]
            .into_iter()
            .flatten()
        {
            FilterConfig::new(self.sampling_rate_hz, cutoff)?;
        }
        if self.gain_schedule.is_degenerate() {
            warn!("gain schedule breakpoints are degenerate, reference gains will be used");
        }
        Ok(())
    }

    fn filter(&self, cutoff_hz: Option<f64>) -> ControlResult<Option<LowPassFilter>> {
        cutoff_hz
            .map(|cutoff| LowPassFilter::new(FilterConfig::new(self.sampling_rate_hz, cutoff)?))
            .transpose()
    }

    fn dispatcher(&self) -> DutyDispatcher {
        DutyDispatcher::new(self.duty_min, self.duty_max, self.duty_steps, self.force_duty)
    }
}

/// Read-only view of the controller for display and logging.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PidTerms {
    pub active: bool,
    pub target: f64,
    /// Error `target - pv` of the last computed tick.
    pub error: f64,
    pub pterm: f64,
    pub iterm: f64,
    pub dterm: f64,
    /// Last computed (clamped) output.
    pub output: Option<f64>,
    /// Last duty handed to the sink since `on()`.
    pub dispatched: Option<f64>,
}

/// Mutable controller state; only touched under the controller lock.
#[derive(Debug, Clone, Default)]
struct PidState {
    active: bool,
    target: f64,
    last_target: f64,
    pterm: f64,
    iterm: f64,
    dterm: f64,
    last_error: f64,
    last_input: Option<f64>,
    last_time: Option<f64>,
    last_output: Option<f64>,
    history: VecDeque<f64>,
}

impl PidState {
    /// Clear everything derived from past measurements; keep the target and
    /// the active flag.
    fn clear_history(&mut self) {
        *self = Self {
            active: self.active,
            target: self.target,
            last_target: self.target,
            ..Self::default()
        };
    }

    fn push_history(&mut self, pv: f64) {
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(pv);
    }

    /// Whether `pv` is a step out of line with the recent measurements.
    fn is_discontinuity(&self, pv: f64, ratio: f64, min_change: f64) -> bool {
        let Some(&last) = self.history.back() else {
            return false;
        };
        if self.history.len() < 2 {
            return false;
        }
        let steps = self.history.len() - 1;
        let total: f64 = self
            .history
            .iter()
            .zip(self.history.iter().skip(1))
            .map(|(a, b)| (b - a).abs())
            .sum();
        let average = total / steps as f64;
        let change = (pv - last).abs();
        change > ratio * average && change > min_change
    }
}

struct PidInner {
    config: PidConfig,
    state: PidState,
    derivative_filter: Option<LowPassFilter>,
    output_filter: Option<LowPassFilter>,
    dispatcher: DutyDispatcher,
    sink: Option<Box<dyn ControlSink>>,
}

impl PidInner {
    fn step(&mut self, measurement: Reading, now: f64) -> Option<f64> {
        let Self {
            config: cfg,
            state: st,
            derivative_filter,
            output_filter,
            dispatcher,
            sink,
        } = self;

        let Some(pv) = measurement.value() else {
            debug!(?measurement, "ignoring unusable measurement");
            return None;
        };
        if !now.is_finite() {
            return None;
        }
        if !st.active {
            st.target = pv;
        }

        let (Some(last_time), Some(last_input)) = (st.last_time, st.last_input) else {
            st.last_time = Some(now);
            st.last_input = Some(pv);
            st.last_error = st.target - pv;
            st.last_target = st.target;
            st.push_history(pv);
            return None;
        };
        let dt = now - last_time;
        if dt < cfg.min_dt {
            return None;
        }

        let target = st.target;
        let prev_target = st.last_target;
        let gains = cfg.gain_schedule.gains(cfg.gains(), target, pv);
        let error = target - pv;

        let target_jump = target - prev_target;
        let setpoint_changed = target_jump.abs() > cfg.significant_change_limit;
        let mut integral_reset = false;
        if setpoint_changed && cfg.integral_reset_on_setpoint_change {
            if target_jump.abs() > cfg.setpoint_change_threshold {
                st.iterm = 0.0;
            } else {
                st.iterm *= 0.5;
            }
            integral_reset = true;
            debug!(
                from = prev_target,
                to = target,
                iterm = st.iterm,
                "significant setpoint change, integral reset"
            );
        }

        st.pterm = gains.kp * (cfg.setpoint_weight * target - pv);

        // Integral bounds widen by the steady-state offset the beta weighting
        // leaves in P, otherwise the integral could never cancel it.
        let beta_offset = (gains.kp * (1.0 - cfg.setpoint_weight) * target).abs();
        let i_min = cfg.out_min * cfg.integral_limit_factor - beta_offset;
        let i_max = cfg.out_max * cfg.integral_limit_factor + beta_offset;

        if !integral_reset {
            let saturated_high = error > 0.0 && st.last_output.is_some_and(|o| o >= cfg.out_max);
            let saturated_low = error < 0.0 && st.last_output.is_some_and(|o| o <= cfg.out_min);
            if !(cfg.integral_windup_prevention && (saturated_high || saturated_low)) {
                st.iterm += gains.ki * error * dt;
            }
        }
        if cfg.integral_windup_prevention {
            st.iterm = st.iterm.clamp(i_min.min(i_max), i_max.max(i_min));
        }

        let weighted_error = cfg.derivative_weight * target - pv;
        let last_weighted_error = cfg.derivative_weight * prev_target - last_input;
        let raw_d = gains.kd * (weighted_error - last_weighted_error) / dt;
        let mut dterm = match derivative_filter.as_mut() {
            Some(filter) => filter.process(raw_d),
            None => raw_d,
        };
        dterm = dterm.clamp(-cfg.derivative_limit, cfg.derivative_limit);
        if st.is_discontinuity(pv, cfg.discontinuity_ratio, cfg.discontinuity_min_change) {
            debug!(pv, last_input, "measurement discontinuity, damping derivative");
            dterm *= cfg.discontinuity_damping;
        }
        if setpoint_changed {
            dterm *= cfg.setpoint_change_damping;
        }
        st.dterm = dterm;

        let raw = st.pterm + st.iterm + st.dterm;
        let smoothed = match output_filter.as_mut() {
            Some(filter) => filter.process(raw),
            None => raw,
        };
        if !smoothed.is_finite() {
            warn!(pv, target, "non-finite controller output, tick skipped");
            return None;
        }
        let output = smoothed.clamp(cfg.out_min, cfg.out_max);
        if cfg.integral_windup_prevention && output != smoothed {
            st.iterm -= cfg.back_calculation_factor * (smoothed - output);
            st.iterm = st.iterm.clamp(i_min.min(i_max), i_max.max(i_min));
        }

        st.last_time = Some(now);
        st.last_input = Some(pv);
        st.last_error = error;
        st.last_target = target;
        st.last_output = Some(output);
        st.push_history(pv);

        if let Some(duty) = dispatcher.offer(output, st.active) {
            dispatch(sink, duty);
        }
        Some(output)
    }

    fn rebuild_filters(&mut self) -> ControlResult<()> {
        self.derivative_filter = self.config.filter(self.config.derivative_filter_cutoff_hz)?;
        self.output_filter = self.config.filter(self.config.output_filter_cutoff_hz)?;
        Ok(())
    }

    fn terms(&self) -> PidTerms {
        PidTerms {
            active: self.state.active,
            target: self.state.target,
            error: self.state.last_error,
            pterm: self.state.pterm,
            iterm: self.state.iterm,
            dterm: self.state.dterm,
            output: self.state.last_output,
            dispatched: self.dispatcher.last_dispatched(),
        }
    }
}

/// Hand `duty` to the sink. Failures and panics stay here.
fn dispatch(sink: &mut Option<Box<dyn ControlSink>>, duty: f64) {
    let Some(sink) = sink.as_mut() else {
        return;
    };
    match panic::catch_unwind(AssertUnwindSafe(|| sink.apply(duty))) {
        Ok(Ok(())) => debug!(duty, "duty dispatched"),
        Ok(Err(err)) => warn!(duty, error = %err, "control sink rejected duty"),
        Err(_) => error!(duty, "control sink panicked"),
    }
}

/// Thread-safe PID controller.
pub struct PidController {
    inner: Mutex<PidInner>,
}

impl std::fmt::Debug for PidController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PidController")
            .field("terms", &self.terms())
            .finish_non_exhaustive()
    }
}

impl PidController {
    /// Create an inactive controller with no sink attached.
    pub fn new(config: PidConfig) -> ControlResult<Self> {
        config.validate()?;
        let mut inner = PidInner {
            dispatcher: config.dispatcher(),
            config,
            state: PidState::default(),
            derivative_filter: None,
            output_filter: None,
            sink: None,
        };
        inner.rebuild_filters()?;
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Attach the actuator that receives dispatched duty values.
    pub fn with_sink(self, sink: impl ControlSink + 'static) -> Self {
        self.set_sink(sink);
        self
    }

    pub fn set_sink(&self, sink: impl ControlSink + 'static) {
        self.lock().sink = Some(Box::new(sink));
    }

    pub fn clear_sink(&self) {
        self.lock().sink = None;
    }

    fn lock(&self) -> MutexGuard<'_, PidInner> {
        // A panic while holding the lock cannot leave the plain state struct
        // half-written in a way later ticks can't recover from.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one control step. Returns the clamped output when one was
    /// computed; `None` for ignored ticks (invalid reading, seeding tick,
    /// `dt` below `min_dt`).
    pub fn update(&self, measurement: Reading, now: f64) -> Option<f64> {
        self.lock().step(measurement, now)
    }

    /// Switch on. The next computed output is dispatched unconditionally.
    pub fn on(&self) {
        let mut inner = self.lock();
        inner.state.active = true;
        inner.dispatcher.forget_last();
        info!(target = inner.state.target, "PID on");
    }

    pub fn off(&self) {
        let mut inner = self.lock();
        inner.state.active = false;
        info!("PID off");
    }

    pub fn is_active(&self) -> bool {
        self.lock().state.active
    }

    /// Clear terms, measurement history and filter state. The next update
    /// only seeds the controller.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state.clear_history();
        if let Some(filter) = inner.derivative_filter.as_mut() {
            filter.reset();
        }
        if let Some(filter) = inner.output_filter.as_mut() {
            filter.reset();
        }
        inner.dispatcher.forget_last();
    }

    pub fn set_target(&self, target: f64) {
        if !target.is_finite() {
            warn!(target, "ignoring non-finite target");
            return;
        }
        self.lock().state.target = target;
    }

    pub fn target(&self) -> f64 {
        self.lock().state.target
    }

    pub fn terms(&self) -> PidTerms {
        self.lock().terms()
    }

    pub fn config(&self) -> PidConfig {
        self.lock().config.clone()
    }

    /// Replace the tuning. Controller state is kept; filters restart.
    pub fn configure(&self, config: PidConfig) -> ControlResult<()> {
        config.validate()?;
        let mut inner = self.lock();
        inner
            .dispatcher
            .set_limits(config.duty_min, config.duty_max, config.duty_steps, config.force_duty);
        inner.config = config;
        inner.rebuild_filters()
    }

    /// Retune the smoothing filters for a new call rate.
    pub fn set_sampling_rate(&self, sampling_rate_hz: f64) -> ControlResult<()> {
        if !(sampling_rate_hz.is_finite() && sampling_rate_hz > 0.0) {
            return Err(ControlError::InvalidArg {
                what: "sampling_rate_hz must be positive",
            });
        }
        let mut inner = self.lock();
        if let Some(filter) = inner.derivative_filter.as_mut() {
            filter.set_sampling_rate(sampling_rate_hz)?;
        }
        if let Some(filter) = inner.output_filter.as_mut() {
            filter.set_sampling_rate(sampling_rate_hz)?;
        }
        inner.config.sampling_rate_hz = sampling_rate_hz;
        Ok(())
    }
}
