//! rf-core: shared foundation for roastflow.
//!
//! Contains:
//! - numeric (Real + the invalid-reading sentinel)
//! - reading (tri-state measurement value)
//! - events (roast event kinds and the per-roast event marks)
//! - units (uom temperature types + display unit conversion)
//! - timing (latency accumulation for periodic work)
//! - error (shared error types)

pub mod error;
pub mod events;
pub mod numeric;
pub mod reading;
pub mod timing;
pub mod units;

// Re-exports: nice ergonomics for downstream crates
pub use error::{CoreError, CoreResult};
pub use events::{EventKind, EventMarks};
pub use numeric::*;
pub use reading::{Reading, Sample};
pub use timing::{LatencyStats, LatencyTracker};
pub use units::*;
