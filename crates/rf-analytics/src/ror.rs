//! Rate of rise (degrees per minute) over a sliding window of samples.
//!
//! `RoR[i] = (temp[i] - temp[i-w]) / (timex[i] - timex[i-w]) * 60`
//!
//! Indices before the window is filled, non-increasing time steps and
//! unusable temperatures all produce `0.0`, never NaN or infinity.
//!
//! The batch pass and the streaming calculator are both obtained from one
//! [`RorConfig`], so optional pre-smoothing is either applied to both or to
//! neither.

use std::collections::VecDeque;

use rf_controls::{FilterConfig, LowPassFilter};
use rf_core::is_valid_temperature;
use serde::{Deserialize, Serialize};

use crate::error::{AnalyticsError, AnalyticsResult};

pub const SECONDS_PER_MINUTE: f64 = 60.0;

/// Rate of rise between two samples, `0.0` when undefined.
pub fn ror_between(t0: f64, temp0: f64, t1: f64, temp1: f64) -> f64 {
    if !(is_valid_temperature(temp0) && is_valid_temperature(temp1)) {
        return 0.0;
    }
    let dt = t1 - t0;
    if !(dt.is_finite() && dt > 0.0) {
        return 0.0;
    }
    let ror = (temp1 - temp0) / dt * SECONDS_PER_MINUTE;
    if ror.is_finite() { ror } else { 0.0 }
}

/// Rate-of-rise settings shared by the batch and streaming modes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RorConfig {
    /// Distance in samples between the two endpoints, at least 1.
    window: usize,
    /// Low-pass applied to temperatures before differencing.
    #[serde(default)]
    smoothing: Option<FilterConfig>,
}

impl RorConfig {
    pub fn new(window: usize) -> AnalyticsResult<Self> {
        let config = Self {
            window,
            smoothing: None,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_smoothing(mut self, filter: FilterConfig) -> AnalyticsResult<Self> {
        filter.validate()?;
        self.smoothing = Some(filter);
        Ok(self)
    }

    /// The same settings with the pre-smoother tuned for `sampling_rate_hz`.
    /// The cutoff in Hz is kept.
    pub fn with_sampling_rate(mut self, sampling_rate_hz: f64) -> AnalyticsResult<Self> {
        if let Some(filter) = self.smoothing {
            self.smoothing = Some(FilterConfig::new(sampling_rate_hz, filter.cutoff_hz)?);
        }
        Ok(self)
    }

    pub fn validate(&self) -> AnalyticsResult<()> {
        if self.window == 0 {
            return Err(AnalyticsError::InvalidArg {
                what: "rate-of-rise window must be at least 1",
            });
        }
        if let Some(filter) = &self.smoothing {
            filter.validate()?;
        }
        Ok(())
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn smoothing(&self) -> Option<FilterConfig> {
        self.smoothing
    }

    fn smoother(&self) -> AnalyticsResult<Option<Smoother>> {
        self.smoothing
            .map(|config| Ok(Smoother(LowPassFilter::new(config)?)))
            .transpose()
    }

    /// Rate of rise for every index of a stored series.
    ///
    /// Only the common prefix of `timex` and `temp` is used.
    pub fn batch(&self, timex: &[f64], temp: &[f64]) -> AnalyticsResult<Vec<f64>> {
        self.validate()?;
        let len = timex.len().min(temp.len());
        let temp: Vec<f64> = match self.smoother()? {
            Some(mut smoother) => temp[..len].iter().map(|&v| smoother.apply(v)).collect(),
            None => temp[..len].to_vec(),
        };
        let w = self.window;
        Ok((0..len)
            .map(|i| {
                if i < w {
                    0.0
                } else {
                    ror_between(timex[i - w], temp[i - w], timex[i], temp[i])
                }
            })
            .collect())
    }

    /// Fresh streaming calculator with these settings.
    pub fn streaming(&self) -> AnalyticsResult<RorCalculator> {
        self.validate()?;
        Ok(RorCalculator {
            window: self.window,
            buffer: VecDeque::with_capacity(self.window + 1),
            smoother: self.smoother()?,
        })
    }
}

/// Filter wrapper that lets unusable readings pass through untouched, so a
/// gap neither poisons the filter state nor gets smoothed into a real value.
#[derive(Debug, Clone)]
struct Smoother(LowPassFilter);

impl Smoother {
    fn apply(&mut self, temp: f64) -> f64 {
        if is_valid_temperature(temp) {
            self.0.process(temp)
        } else {
            temp
        }
    }

    fn reset(&mut self) {
        self.0.reset();
    }

    fn set_sampling_rate(&mut self, sampling_rate_hz: f64) -> AnalyticsResult<()> {
        Ok(self.0.set_sampling_rate(sampling_rate_hz)?)
    }
}

/// Incremental rate-of-rise over a ring buffer of `window + 1` samples.
#[derive(Debug, Clone)]
pub struct RorCalculator {
    window: usize,
    buffer: VecDeque<(f64, f64)>,
    smoother: Option<Smoother>,
}

impl RorCalculator {
    /// Push one sample and return the current rate of rise.
    pub fn add_sample(&mut self, time_s: f64, temp: f64) -> f64 {
        let temp = match self.smoother.as_mut() {
            Some(smoother) => smoother.apply(temp),
            None => temp,
        };
        if self.buffer.len() == self.window + 1 {
            self.buffer.pop_front();
        }
        self.buffer.push_back((time_s, temp));
        if !self.is_full() {
            return 0.0;
        }
        match (self.buffer.front(), self.buffer.back()) {
            (Some(&(t0, y0)), Some(&(t1, y1))) => ror_between(t0, y0, t1, y1),
            _ => 0.0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() == self.window + 1
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Retune the pre-smoother for a new sampling rate. Its state restarts
    /// from the next sample; the window keeps the samples already taken.
    pub fn set_sampling_rate(&mut self, sampling_rate_hz: f64) -> AnalyticsResult<()> {
        match self.smoother.as_mut() {
            Some(smoother) => smoother.set_sampling_rate(sampling_rate_hz),
            None => Ok(()),
        }
    }

    /// Pre-smoother settings, if smoothing is enabled.
    pub fn smoothing(&self) -> Option<FilterConfig> {
        self.smoother.as_ref().map(|smoother| smoother.0.config())
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        if let Some(smoother) = self.smoother.as_mut() {
            smoother.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worked_example() {
        let config = RorConfig::new(2).unwrap();
        let ror = config
            .batch(&[0.0, 60.0, 120.0], &[0.0, 20.0, 40.0])
            .unwrap();
        assert_eq!(ror, vec![0.0, 0.0, 20.0]);
    }

    #[test]
    fn streaming_waits_for_full_buffer() {
        let mut calc = RorConfig::new(2).unwrap().streaming().unwrap();
        assert_eq!(calc.add_sample(0.0, 0.0), 0.0);
        assert_eq!(calc.add_sample(60.0, 20.0), 0.0);
        assert!(!calc.is_full());
        assert_eq!(calc.add_sample(120.0, 40.0), 20.0);
        assert!(calc.is_full());
    }

    #[test]
    fn zero_window_rejected() {
        assert!(RorConfig::new(0).is_err());
    }

    #[test]
    fn undefined_pairs_are_zero() {
        assert_eq!(ror_between(10.0, 100.0, 10.0, 120.0), 0.0);
        assert_eq!(ror_between(20.0, 100.0, 10.0, 120.0), 0.0);
        assert_eq!(ror_between(0.0, -1.0, 10.0, 120.0), 0.0);
        assert_eq!(ror_between(0.0, 100.0, 10.0, f64::NAN), 0.0);
    }

    #[test]
    fn reset_empties_buffer() {
        let mut calc = RorConfig::new(1).unwrap().streaming().unwrap();
        calc.add_sample(0.0, 100.0);
        assert_eq!(calc.add_sample(2.0, 102.0), 60.0);
        calc.reset();
        assert_eq!(calc.add_sample(4.0, 104.0), 0.0);
    }

    #[test]
    fn mismatched_lengths_use_common_prefix() {
        let config = RorConfig::new(1).unwrap();
        let ror = config.batch(&[0.0, 60.0, 120.0], &[0.0, 10.0]).unwrap();
        assert_eq!(ror.len(), 2);
        assert!((ror[1] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn smoothing_is_applied_in_both_modes() {
        let filter = FilterConfig::new(1.0, 0.1).unwrap();
        let config = RorConfig::new(2).unwrap().with_smoothing(filter).unwrap();
        let timex = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let temp = [100.0, 101.0, 108.0, 103.0, 104.0, 105.0];
        let batch = config.batch(&timex, &temp).unwrap();
        let raw = RorConfig::new(2).unwrap().batch(&timex, &temp).unwrap();
        assert_ne!(batch, raw);

        let mut calc = config.streaming().unwrap();
        for (i, (&t, &y)) in timex.iter().zip(temp.iter()).enumerate() {
            assert!((calc.add_sample(t, y) - batch[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn sampling_rate_change_retunes_smoother() {
        let filter = FilterConfig::new(0.5, 0.05).unwrap();
        let config = RorConfig::new(1).unwrap().with_smoothing(filter).unwrap();
        let mut calc = config.streaming().unwrap();
        calc.add_sample(0.0, 100.0);
        calc.add_sample(2.0, 110.0);

        calc.set_sampling_rate(10.0).unwrap();
        let smoothing = calc.smoothing().unwrap();
        assert_eq!(smoothing.sampling_rate_hz, 10.0);
        assert_eq!(smoothing.cutoff_hz, 0.05);
        // The old state is dropped, so a steady input reseeds the filter
        // and shows no rise.
        calc.add_sample(2.1, 200.0);
        assert!(calc.add_sample(2.2, 200.0).abs() < 1e-6);

        let retuned = config.with_sampling_rate(10.0).unwrap();
        assert_eq!(retuned.smoothing(), Some(smoothing));
        assert_eq!(RorConfig::new(1).unwrap().with_sampling_rate(10.0).unwrap().smoothing(), None);
    }
}
