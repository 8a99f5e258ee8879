//! Recorded roast profiles and their offline analysis.
//!
//! A profile is the series a session recorded (`timex`, `temp`) plus the raw
//! event indices, stored as JSON. Gaps in `temp` use the invalid sentinel.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use rf_analytics::{PhaseResult, RorConfig, segment_phases};
use rf_core::{EventKind, EventMarks, TemperatureUnit, is_valid_temperature};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

fn unset_events() -> [i32; EventKind::COUNT] {
    [-1; EventKind::COUNT]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoastProfile {
    #[serde(default)]
    pub unit: TemperatureUnit,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
    pub timex: Vec<f64>,
    pub temp: Vec<f64>,
    /// Series index per event slot, -1 when unset.
    #[serde(default = "unset_events")]
    pub events: [i32; EventKind::COUNT],
}

impl RoastProfile {
    pub fn new(unit: TemperatureUnit, timex: Vec<f64>, temp: Vec<f64>, marks: &EventMarks) -> Self {
        Self {
            unit,
            recorded_at: None,
            timex,
            temp,
            events: marks.to_raw(),
        }
    }

    pub fn with_recorded_at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(recorded_at);
        self
    }

    pub fn marks(&self) -> EventMarks {
        EventMarks::from_raw(self.events)
    }

    pub fn len(&self) -> usize {
        self.timex.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timex.is_empty()
    }

    /// Both series must be the same length with finite, non-decreasing times.
    pub fn validate(&self) -> AppResult<()> {
        if self.timex.len() != self.temp.len() {
            return Err(AppError::InvalidInput(format!(
                "timex has {} samples but temp has {}",
                self.timex.len(),
                self.temp.len()
            )));
        }
        if let Some(i) = self.timex.iter().position(|t| !t.is_finite()) {
            return Err(AppError::InvalidInput(format!(
                "timex[{}] is not finite",
                i
            )));
        }
        if let Some(i) = self.timex.windows(2).position(|w| w[1] < w[0]) {
            return Err(AppError::InvalidInput(format!(
                "timex decreases at index {}",
                i + 1
            )));
        }
        Ok(())
    }
}

/// Where one marked event falls on the series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EventPoint {
    pub event: EventKind,
    pub index: usize,
    pub time_s: f64,
    pub temperature: f64,
}

/// Rate of rise and phases of a recorded profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileAnalysis {
    pub unit: TemperatureUnit,
    pub window: usize,
    /// Degrees per minute, one value per sample.
    pub ror: Vec<f64>,
    pub max_ror: Option<f64>,
    pub phases: PhaseResult,
    pub events: Vec<EventPoint>,
}

impl ProfileAnalysis {
    /// The same analysis reported in `unit`. RoR values convert as
    /// temperature differences, event temperatures as absolute ones.
    pub fn in_unit(&self, unit: TemperatureUnit) -> Self {
        let from = self.unit;
        let events = self
            .events
            .iter()
            .map(|point| EventPoint {
                temperature: if is_valid_temperature(point.temperature) {
                    unit.convert_from(from, point.temperature)
                } else {
                    point.temperature
                },
                ..*point
            })
            .collect();
        Self {
            unit,
            window: self.window,
            ror: self.ror.iter().map(|&r| unit.convert_rate_from(from, r)).collect(),
            max_ror: self.max_ror.map(|r| unit.convert_rate_from(from, r)),
            phases: self.phases,
            events,
        }
    }
}

pub fn analyze_profile(profile: &RoastProfile, ror: &RorConfig) -> AppResult<ProfileAnalysis> {
    profile.validate()?;
    let rates = ror.batch(&profile.timex, &profile.temp)?;
    let marks = profile.marks();
    let len = profile.len();

    let events = marks
        .iter()
        .filter(|&(_, index)| index < len)
        .map(|(event, index)| EventPoint {
            event,
            index,
            time_s: profile.timex[index],
            temperature: profile.temp[index],
        })
        .collect();

    let max_ror = rates
        .iter()
        .skip(ror.window())
        .copied()
        .filter(|r| r.is_finite())
        .reduce(f64::max);

    Ok(ProfileAnalysis {
        unit: profile.unit,
        window: ror.window(),
        phases: segment_phases(&profile.timex, &profile.temp, &marks),
        ror: rates,
        max_ror,
        events,
    })
}

pub fn load_profile(path: &Path) -> AppResult<RoastProfile> {
    let content = std::fs::read_to_string(path).map_err(|e| AppError::ProfileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let profile: RoastProfile =
        serde_json::from_str(&content).map_err(|e| AppError::ProfileParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    profile.validate()?;
    Ok(profile)
}

pub fn save_profile(path: &Path, profile: &RoastProfile) -> AppResult<()> {
    let write_error = |source: std::io::Error| AppError::ProfileWrite {
        path: path.to_path_buf(),
        source,
    };
    let file = std::fs::File::create(path).map_err(write_error)?;
    let mut writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, profile)
        .map_err(|e| write_error(std::io::Error::from(e)))?;
    writer.flush().map_err(write_error)?;
    Ok(())
}
