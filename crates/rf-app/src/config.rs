//! Roast configuration: loading, validation and derivation of the runtime
//! objects each subsystem is built from.

use std::path::Path;

use rf_analytics::{Alarm, AlarmList, RorConfig};
use rf_controls::{FilterConfig, PidConfig, RampSoakProgram, RampSoakSegment, SampleConfig};
use rf_core::TemperatureUnit;
use serde::{Deserialize, Serialize};

use crate::device::RoasterModelConfig;
use crate::error::{AppError, AppResult};

/// Rate-of-rise settings. `smoothing_cutoff_hz` enables the Butterworth
/// pre-filter, run at the sampling frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RorSettings {
    pub window: usize,
    pub smoothing_cutoff_hz: Option<f64>,
}

impl Default for RorSettings {
    fn default() -> Self {
        Self {
            window: 5,
            smoothing_cutoff_hz: None,
        }
    }
}

/// Temperature thresholds that mark events without operator input.
///
/// DRY_END and FC_START fire only after CHARGE; DROP only after FC_START.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoMarkConfig {
    pub charge_on_first_sample: bool,
    pub dry_end_temp: Option<f64>,
    pub fc_start_temp: Option<f64>,
    pub drop_temp: Option<f64>,
}

impl AutoMarkConfig {
    pub fn is_enabled(&self) -> bool {
        self.charge_on_first_sample
            || self.dry_end_temp.is_some()
            || self.fc_start_temp.is_some()
            || self.drop_temp.is_some()
    }
}

/// Everything a roast session needs, in the session's display unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoastConfig {
    pub unit: TemperatureUnit,
    pub sampling: SampleConfig,
    pub pid: PidConfig,
    pub ror: RorSettings,
    pub alarms: Vec<Alarm>,
    pub ramp_soak: Vec<RampSoakSegment>,
    pub auto_mark: AutoMarkConfig,
    /// How long `stop` waits for an in-flight tick before cancelling it.
    pub stop_timeout_ms: u64,
    pub simulator: RoasterModelConfig,
}

impl Default for RoastConfig {
    fn default() -> Self {
        Self {
            unit: TemperatureUnit::Celsius,
            sampling: SampleConfig::default(),
            pid: PidConfig::default(),
            ror: RorSettings::default(),
            alarms: Vec::new(),
            ramp_soak: Vec::new(),
            auto_mark: AutoMarkConfig::default(),
            stop_timeout_ms: 2000,
            simulator: RoasterModelConfig::default(),
        }
    }
}

impl RoastConfig {
    /// Check every section and the cross-section constraints.
    pub fn validate(&self) -> AppResult<()> {
        self.pid_config().validate()?;
        self.ror_config()?;
        self.alarm_list()?;
        self.program()?;
        self.simulator.validate()?;

        if self.stop_timeout_ms == 0 {
            return Err(AppError::Validation(
                "stop_timeout_ms must be positive".to_string(),
            ));
        }

        let thresholds = [
            ("dry_end_temp", self.auto_mark.dry_end_temp),
            ("fc_start_temp", self.auto_mark.fc_start_temp),
            ("drop_temp", self.auto_mark.drop_temp),
        ];
        for (name, value) in thresholds {
            if value.is_some_and(|v| !v.is_finite()) {
                return Err(AppError::Validation(format!(
                    "auto_mark.{} must be finite",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Sampling settings with the interval floored to the supported minimum.
    pub fn sampling(&self) -> SampleConfig {
        self.sampling.normalized()
    }

    /// PID settings with the filter sampling rate tied to the tick rate.
    pub fn pid_config(&self) -> PidConfig {
        PidConfig {
            sampling_rate_hz: self.sampling().frequency(),
            ..self.pid.clone()
        }
    }

    pub fn ror_config(&self) -> AppResult<RorConfig> {
        let config = RorConfig::new(self.ror.window)?;
        match self.ror.smoothing_cutoff_hz {
            Some(cutoff) => {
                let filter = FilterConfig::new(self.sampling().frequency(), cutoff)?;
                Ok(config.with_smoothing(filter)?)
            }
            None => Ok(config),
        }
    }

    pub fn alarm_list(&self) -> AppResult<AlarmList> {
        Ok(AlarmList::new(self.alarms.clone())?)
    }

    pub fn program(&self) -> AppResult<RampSoakProgram> {
        Ok(RampSoakProgram::new(self.ramp_soak.clone())?)
    }
}

/// Parse a configuration document. `extension` selects the format.
pub fn parse_config(content: &str, extension: &str, path: &Path) -> AppResult<RoastConfig> {
    let config: RoastConfig = match extension {
        "yaml" | "yml" => serde_yaml::from_str(content).map_err(|e| AppError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?,
        "json" => serde_json::from_str(content).map_err(|e| AppError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?,
        other => return Err(AppError::UnsupportedFormat(other.to_string())),
    };
    config.validate()?;
    Ok(config)
}

/// Load and validate a YAML or JSON configuration file.
pub fn load_config(path: &Path) -> AppResult<RoastConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AppError::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    parse_config(&content, &extension, path)
}
