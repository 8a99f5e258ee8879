//! Roast session service layer for roastflow.
//!
//! Wires the control and analytics crates into a running roast: a periodic
//! sampling scheduler pulls one reading per tick from a device adapter and
//! pushes it through rate of rise, the PID controller, phase segmentation and
//! alarm evaluation, publishing one consistent report per tick. Both the CLI
//! and any other frontend go through this crate.

pub mod config;
pub mod device;
pub mod error;
pub mod profile;
pub mod scheduler;
pub mod session;

// Re-export key types for convenience
pub use config::{AutoMarkConfig, RoastConfig, RorSettings, load_config, parse_config};
pub use device::{RoasterHeater, RoasterModelConfig, RoasterProbe, SimulatedRoaster, TemperatureSource};
pub use error::{AppError, AppResult};
pub use profile::{EventPoint, ProfileAnalysis, RoastProfile, analyze_profile, load_profile, save_profile};
pub use scheduler::{CancelToken, SamplingScheduler, StopOutcome, Tick};
pub use session::{RoastSession, TickReport};
