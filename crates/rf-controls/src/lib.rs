//! Heater/burner control primitives for roastflow.
//!
//! This crate holds everything between a temperature reading and the duty
//! value handed to the actuator:
//! - a first-order low-pass filter used for derivative and output smoothing
//! - gain scheduling across up to three operating points
//! - the synchronized PID controller with anti-windup
//! - rate-limited duty dispatch to a [`ControlSink`]
//! - ramp/soak setpoint programs
//! - sampling interval configuration shared with the scheduler
//!
//! # Design Principles
//!
//! - **Explicit configuration**: every component is built from a config
//!   struct, there is no process-wide settings store
//! - **Thread-safe controller**: [`PidController`] serializes every call on
//!   one internal mutex and never exposes the lock
//! - **Tolerant of bad input**: invalid readings are skipped, sink failures
//!   are logged, neither is propagated into the sampling loop

pub mod duty;
pub mod error;
pub mod filter;
pub mod gains;
pub mod pid;
pub mod ramp_soak;
pub mod sampled;

pub use duty::{ControlSink, DutyDispatcher};
pub use error::{ControlError, ControlResult};
pub use filter::{FilterConfig, LowPassFilter};
pub use gains::{GainPoint, GainSchedule, Gains, ScheduleInput, ScheduleMode};
pub use pid::{PidConfig, PidController, PidTerms};
pub use ramp_soak::{RampSoakProgram, RampSoakSegment};
pub use sampled::SampleConfig;
