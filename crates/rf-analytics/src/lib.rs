//! Roast curve analytics for roastflow.
//!
//! Everything here consumes the (time, temperature) series and the event
//! marks of a roast:
//! - rate of rise, as a batch pass or a streaming calculator that agree on
//!   identical input
//! - phase segmentation into drying, Maillard and development
//! - alarm evaluation with guard alarms and trigger-once semantics
//!
//! Phase segmentation and alarm conditions are pure functions of a series
//! snapshot and can be called from any thread. The streaming RoR calculator
//! is single-writer.

pub mod alarms;
pub mod error;
pub mod phases;
pub mod ror;

pub use alarms::{Alarm, AlarmAction, AlarmCondition, AlarmContext, AlarmEvent, AlarmList};
pub use error::{AnalyticsError, AnalyticsResult};
pub use phases::{PhaseResult, segment_phases};
pub use ror::{RorCalculator, RorConfig, SECONDS_PER_MINUTE, ror_between};
