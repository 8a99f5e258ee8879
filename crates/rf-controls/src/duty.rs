//! Duty dispatch: rate-limited delivery of controller output to an actuator.
//!
//! A roaster heater or gas valve should not be re-commanded on every tick
//! for a sub-step change. The dispatcher forwards an output only when
//! - nothing has been dispatched since the last `on()`/reset, or
//! - it moved by at least `duty_steps` from the last dispatched value, or
//! - `force_duty` ticks have passed since the last dispatch.

use crate::error::ControlResult;

/// Receiver of duty values (heater, burner, fan).
///
/// Implementations should queue the value and return quickly; they are
/// called from the sampling thread.
pub trait ControlSink: Send {
    fn apply(&mut self, duty: f64) -> ControlResult<()>;
}

impl<F> ControlSink for F
where
    F: FnMut(f64) -> ControlResult<()> + Send,
{
    fn apply(&mut self, duty: f64) -> ControlResult<()> {
        self(duty)
    }
}

/// Coalescing state for duty dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DutyDispatcher {
    pub duty_min: f64,
    pub duty_max: f64,
    pub duty_steps: f64,
    pub force_duty: u32,
    last_dispatched: Option<f64>,
    ticks_since_dispatch: u32,
}

impl DutyDispatcher {
    pub fn new(duty_min: f64, duty_max: f64, duty_steps: f64, force_duty: u32) -> Self {
        Self {
            duty_min,
            duty_max,
            duty_steps,
            force_duty,
            last_dispatched: None,
            ticks_since_dispatch: 0,
        }
    }

    pub fn clamp(&self, output: f64) -> f64 {
        output.clamp(self.duty_min, self.duty_max)
    }

    pub fn last_dispatched(&self) -> Option<f64> {
        self.last_dispatched
    }

    /// Offer one tick's output. Returns the duty to send, if any.
    ///
    /// Nothing is returned while `active` is false, but the tick still
    /// counts toward `force_duty`.
    pub fn offer(&mut self, output: f64, active: bool) -> Option<f64> {
        let duty = self.clamp(output);
        let due = match self.last_dispatched {
            None => true,
            Some(last) => {
                self.ticks_since_dispatch >= self.force_duty
                    || (duty - last).abs() >= self.duty_steps
            }
        };
        let dispatched = if due && active {
            self.last_dispatched = Some(duty);
            self.ticks_since_dispatch = 0;
            Some(duty)
        } else {
            None
        };
        self.ticks_since_dispatch = self.ticks_since_dispatch.saturating_add(1);
        dispatched
    }

    /// Forget the last dispatched value so the next offer goes out.
    pub fn forget_last(&mut self) {
        self.last_dispatched = None;
        self.ticks_since_dispatch = 0;
    }

    pub fn set_limits(&mut self, duty_min: f64, duty_max: f64, duty_steps: f64, force_duty: u32) {
        self.duty_min = duty_min;
        self.duty_max = duty_max;
        self.duty_steps = duty_steps;
        self.force_duty = force_duty;
    }
}
