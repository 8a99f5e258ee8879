//! A running roast.
//!
//! [`RoastSession`] owns the sampling scheduler and everything a tick
//! touches. Each tick runs, under the session lock, as:
//!
//! 1. apply event marks requested since the last tick
//! 2. read the probe and append the sample (gaps as the invalid sentinel)
//! 3. streaming rate of rise
//! 4. ramp/soak setpoint, then the PID update and duty dispatch
//! 5. phase segmentation and alarm evaluation against the marks snapshot
//! 6. auto-mark detection, applied at the start of the next tick
//! 7. publish the [`TickReport`]
//!
//! Readers take the same lock, so they see either the previous tick's
//! state or this one's, never a mix.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rf_analytics::{
    AlarmContext, AlarmEvent, AlarmList, PhaseResult, RorCalculator, RorConfig, segment_phases,
};
use rf_controls::{ControlSink, PidController, PidTerms, RampSoakProgram, SampleConfig};
use rf_core::{EventKind, EventMarks, LatencyStats, Reading, Sample, TemperatureUnit};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{AutoMarkConfig, RoastConfig};
use crate::device::TemperatureSource;
use crate::error::{AppError, AppResult};
use crate::profile::RoastProfile;
use crate::scheduler::{SamplingScheduler, StopOutcome, Tick};

/// Everything one tick produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub index: u64,
    pub sample: Sample,
    /// Degrees per minute.
    pub ror: f64,
    pub pid: PidTerms,
    pub phases: PhaseResult,
    pub alarms: Vec<AlarmEvent>,
    /// Marks this tick was evaluated against.
    pub marks: EventMarks,
    /// `stop` was requested mid-tick and control output was skipped.
    pub cancelled: bool,
}

struct SessionCore {
    unit: TemperatureUnit,
    source: Box<dyn TemperatureSource>,
    pid: Arc<PidController>,
    ror_config: RorConfig,
    ror: RorCalculator,
    alarms: AlarmList,
    program: RampSoakProgram,
    /// Session time and setpoint at which the program started.
    program_origin: Option<(f64, f64)>,
    auto_mark: AutoMarkConfig,
    timex: Vec<f64>,
    temp: Vec<f64>,
    ror_series: Vec<f64>,
    marks: EventMarks,
    pending: Vec<EventKind>,
    latest: Option<TickReport>,
    alarm_tx: Option<Sender<AlarmEvent>>,
    started_at: Option<DateTime<Utc>>,
}

impl SessionCore {
    fn clear(&mut self) -> AppResult<()> {
        self.timex.clear();
        self.temp.clear();
        self.ror_series.clear();
        self.marks.clear();
        self.pending.clear();
        self.latest = None;
        self.program_origin = None;
        self.ror = self.ror_config.streaming()?;
        self.alarms.reset_all();
        Ok(())
    }

    fn is_marked_or_pending(&self, kind: EventKind) -> bool {
        self.marks.is_set(kind) || self.pending.contains(&kind)
    }

    /// Marks land on the last recorded sample. Requests made before the
    /// first sample wait for it.
    fn apply_pending_marks(&mut self) {
        let len = self.timex.len();
        if len == 0 {
            return;
        }
        for kind in std::mem::take(&mut self.pending) {
            match self.marks.mark(kind, len - 1, len) {
                Ok(()) => info!(event = %kind, index = len - 1, "event marked"),
                Err(e) => warn!(event = %kind, "ignoring mark: {}", e),
            }
        }
    }

    fn request_mark(&mut self, kind: EventKind) -> AppResult<()> {
        if self.is_marked_or_pending(kind) {
            return Err(AppError::Event(format!("{} is already marked", kind)));
        }
        self.pending.push(kind);
        Ok(())
    }

    /// The program starts from the current measurement, or the current
    /// target when the reading is unusable.
    fn follow_program(&mut self, time_s: f64, reading: Reading) {
        if self.program.is_empty() {
            return;
        }
        if !self.pid.is_active() {
            self.program_origin = None;
            return;
        }
        let start_temp = reading.value().unwrap_or_else(|| self.pid.target());
        let (origin, start_temp) = *self.program_origin.get_or_insert((time_s, start_temp));
        if let Some(setpoint) = self.program.setpoint_at(time_s - origin, start_temp) {
            self.pid.set_target(setpoint);
        }
    }

    fn detect_auto_marks(&mut self, reading: Reading) {
        let Some(temp) = reading.value() else {
            return;
        };
        let config = self.auto_mark;
        if config.charge_on_first_sample && !self.is_marked_or_pending(EventKind::Charge) {
            self.pending.push(EventKind::Charge);
            return;
        }
        if !self.marks.is_set(EventKind::Charge) {
            return;
        }
        let candidates = [
            (EventKind::DryEnd, config.dry_end_temp, EventKind::Charge),
            (EventKind::FcStart, config.fc_start_temp, EventKind::Charge),
            (EventKind::Drop, config.drop_temp, EventKind::FcStart),
        ];
        for (kind, threshold, after) in candidates {
            let Some(threshold) = threshold else {
                continue;
            };
            if temp >= threshold && self.marks.is_set(after) && !self.is_marked_or_pending(kind) {
                debug!(event = %kind, temp, threshold, "auto-mark detected");
                self.pending.push(kind);
            }
        }
    }

    fn on_tick(&mut self, tick: &Tick) {
        self.apply_pending_marks();
        let marks = self.marks;

        let time_s = tick.elapsed_s();
        let reading = self.source.read(time_s);
        let temp = reading.to_series_value();
        self.timex.push(time_s);
        self.temp.push(temp);

        let ror = self.ror.add_sample(time_s, temp);
        self.ror_series.push(ror);

        let cancelled = tick.is_cancelled();
        if cancelled {
            debug!(tick = tick.index, "stop requested, skipping control output");
        } else {
            self.follow_program(time_s, reading);
            self.pid.update(reading, time_s);
        }

        let phases = segment_phases(&self.timex, &self.temp, &marks);
        let ctx = AlarmContext::new(temp, time_s).with_marks(&marks, &self.timex);
        let alarms = self.alarms.evaluate(&ctx);
        if let Some(tx) = &self.alarm_tx {
            // A dropped receiver just means nobody is listening anymore
            let delivered = alarms.iter().all(|event| tx.send(event.clone()).is_ok());
            if !delivered {
                self.alarm_tx = None;
            }
        }

        self.detect_auto_marks(reading);

        self.latest = Some(TickReport {
            index: tick.index,
            sample: Sample::new(time_s, reading),
            ror,
            pid: self.pid.terms(),
            phases,
            alarms,
            marks,
            cancelled,
        });
    }

    fn profile(&self) -> RoastProfile {
        let profile = RoastProfile::new(self.unit, self.timex.clone(), self.temp.clone(), &self.marks);
        match self.started_at {
            Some(at) => profile.with_recorded_at(at),
            None => profile,
        }
    }
}

/// One roast: probe, controller, analytics and the sampling thread.
pub struct RoastSession {
    core: Arc<Mutex<SessionCore>>,
    pid: Arc<PidController>,
    scheduler: SamplingScheduler,
    /// Held across the running check, the reset and the scheduler start.
    starting: Mutex<()>,
}

impl std::fmt::Debug for RoastSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoastSession")
            .field("scheduler", &self.scheduler)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl RoastSession {
    pub fn new(config: &RoastConfig, source: impl TemperatureSource + 'static) -> AppResult<Self> {
        config.validate()?;
        let pid = Arc::new(PidController::new(config.pid_config())?);
        let ror_config = config.ror_config()?;
        let core = SessionCore {
            unit: config.unit,
            source: Box::new(source),
            pid: Arc::clone(&pid),
            ror: ror_config.streaming()?,
            ror_config,
            alarms: config.alarm_list()?,
            program: config.program()?,
            program_origin: None,
            auto_mark: config.auto_mark,
            timex: Vec::new(),
            temp: Vec::new(),
            ror_series: Vec::new(),
            marks: EventMarks::new(),
            pending: Vec::new(),
            latest: None,
            alarm_tx: None,
            started_at: None,
        };
        Ok(Self {
            core: Arc::new(Mutex::new(core)),
            pid,
            scheduler: SamplingScheduler::new(
                config.sampling(),
                Duration::from_millis(config.stop_timeout_ms),
            ),
            starting: Mutex::new(()),
        })
    }

    /// Route PID duty to `sink`.
    pub fn with_sink(self, sink: impl ControlSink + 'static) -> Self {
        self.pid.set_sink(sink);
        self
    }

    fn lock(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shared handle for switching the controller and changing its target.
    pub fn pid(&self) -> &Arc<PidController> {
        &self.pid
    }

    /// Begin a new roast: clear the series, re-arm alarms, reset the
    /// controller and start sampling. Returns `false` if already running.
    pub fn start(&self) -> AppResult<bool> {
        let _starting = self.starting.lock().unwrap_or_else(PoisonError::into_inner);
        if self.scheduler.is_running() {
            return Ok(false);
        }
        {
            let mut core = self.lock();
            core.clear()?;
            core.started_at = Some(Utc::now());
        }
        self.pid.reset();

        let core = Arc::clone(&self.core);
        let started = self.scheduler.start(move |tick| {
            let mut core = core.lock().unwrap_or_else(PoisonError::into_inner);
            core.on_tick(tick);
        })?;
        if started {
            info!(interval = ?self.scheduler.interval(), "roast session started");
        }
        Ok(started)
    }

    /// Stop sampling. No duty is dispatched by this session after it returns.
    pub fn stop(&self) -> StopOutcome {
        let outcome = self.scheduler.stop();
        if outcome != StopOutcome::NotRunning {
            info!(?outcome, "roast session stopped");
        }
        outcome
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Run one tick on the calling thread, for replay and tests.
    pub fn run_tick(&self, tick: &Tick) {
        self.lock().on_tick(tick);
    }

    /// Request an event mark at the next recorded sample.
    pub fn mark_event(&self, kind: EventKind) -> AppResult<()> {
        self.lock().request_mark(kind)
    }

    /// Change the sampling interval. The PID filters and the RoR
    /// pre-smoother are retuned to match, and the smoother restarts.
    pub fn set_sampling(&self, sampling: SampleConfig) -> AppResult<()> {
        let sampling = sampling.normalized();
        let rate = sampling.frequency();
        {
            let mut core = self.lock();
            let ror_config = core.ror_config.with_sampling_rate(rate)?;
            core.ror.set_sampling_rate(rate)?;
            core.ror_config = ror_config;
        }
        self.pid.set_sampling_rate(rate)?;
        self.scheduler.set_interval(sampling);
        Ok(())
    }

    /// Receive every alarm event fired from now on. Replaces any earlier
    /// subscriber.
    pub fn subscribe_alarms(&self) -> Receiver<AlarmEvent> {
        let (tx, rx) = mpsc::channel();
        self.lock().alarm_tx = Some(tx);
        rx
    }

    pub fn latest(&self) -> Option<TickReport> {
        self.lock().latest.clone()
    }

    pub fn marks(&self) -> EventMarks {
        self.lock().marks
    }

    /// Snapshot of (time, temperature, rate of rise) recorded so far.
    pub fn series(&self) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let core = self.lock();
        (core.timex.clone(), core.temp.clone(), core.ror_series.clone())
    }

    pub fn profile(&self) -> RoastProfile {
        self.lock().profile()
    }

    pub fn stats(&self) -> LatencyStats {
        self.scheduler.stats()
    }
}

impl Drop for RoastSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_analytics::{Alarm, AlarmCondition};
    use rf_controls::RampSoakSegment;

    fn ramp_source() -> impl TemperatureSource {
        // 1 degree per second from 100
        |t: f64| Reading::from_raw(100.0 + t)
    }

    fn tick(index: u64) -> Tick {
        Tick::new(index, Duration::from_secs(index * 2), Duration::from_secs(2))
    }

    fn run(session: &RoastSession, ticks: std::ops::Range<u64>) {
        for i in ticks {
            session.run_tick(&tick(i));
        }
    }

    #[test]
    fn tick_records_series_and_ror() {
        let config = RoastConfig {
            ror: crate::config::RorSettings {
                window: 2,
                smoothing_cutoff_hz: None,
            },
            ..RoastConfig::default()
        };
        let session = RoastSession::new(&config, ramp_source()).unwrap();
        run(&session, 0..4);

        let (timex, temp, ror) = session.series();
        assert_eq!(timex, vec![0.0, 2.0, 4.0, 6.0]);
        assert_eq!(temp, vec![100.0, 102.0, 104.0, 106.0]);
        assert_eq!(ror, vec![0.0, 0.0, 60.0, 60.0]);

        let report = session.latest().unwrap();
        assert_eq!(report.index, 3);
        assert_eq!(report.sample.temperature, Reading::Valid(106.0));
        assert_eq!(report.ror, 60.0);
    }

    #[test]
    fn marks_apply_on_next_tick() {
        let session = RoastSession::new(&RoastConfig::default(), ramp_source()).unwrap();
        // Requested before any sample: waits for the first one
        session.mark_event(EventKind::Charge).unwrap();
        run(&session, 0..1);
        assert!(!session.marks().is_set(EventKind::Charge));
        run(&session, 1..2);
        assert_eq!(session.marks().get(EventKind::Charge), Some(0));

        session.mark_event(EventKind::DryEnd).unwrap();
        assert!(session.mark_event(EventKind::DryEnd).is_err());
        run(&session, 2..3);
        assert_eq!(session.marks().get(EventKind::DryEnd), Some(1));
        assert!(session.mark_event(EventKind::Charge).is_err());
    }

    #[test]
    fn invalid_reading_is_a_gap() {
        let mut calls = 0;
        let source = move |t: f64| {
            calls += 1;
            if calls == 2 { Reading::Invalid } else { Reading::from_raw(150.0 + t) }
        };
        let session = RoastSession::new(&RoastConfig::default(), source).unwrap();
        run(&session, 0..3);
        let (_, temp, _) = session.series();
        assert_eq!(temp, vec![150.0, -1.0, 154.0]);
        assert_eq!(session.latest().unwrap().sample.temperature, Reading::Valid(154.0));
    }

    #[test]
    fn alarms_fire_once_and_are_published() {
        let config = RoastConfig {
            alarms: vec![Alarm::new(AlarmCondition::AboveTemp, 104.0)],
            ..RoastConfig::default()
        };
        let session = RoastSession::new(&config, ramp_source()).unwrap();
        let alarms = session.subscribe_alarms();
        run(&session, 0..5);

        let fired: Vec<AlarmEvent> = alarms.try_iter().collect();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].alarm_index, 0);
        assert_eq!(fired[0].time_s, 4.0);
    }

    #[test]
    fn auto_marks_follow_thresholds() {
        let config = RoastConfig {
            auto_mark: AutoMarkConfig {
                charge_on_first_sample: true,
                dry_end_temp: Some(110.0),
                fc_start_temp: Some(120.0),
                drop_temp: Some(130.0),
            },
            ..RoastConfig::default()
        };
        let session = RoastSession::new(&config, ramp_source()).unwrap();
        run(&session, 0..20);

        let marks = session.marks();
        assert_eq!(marks.get(EventKind::Charge), Some(0));
        // 110 is reached at index 5 and marked on the following tick
        assert_eq!(marks.get(EventKind::DryEnd), Some(5));
        assert_eq!(marks.get(EventKind::FcStart), Some(10));
        assert_eq!(marks.get(EventKind::Drop), Some(15));
        assert!(!session.latest().unwrap().phases.invalid);
    }

    #[test]
    fn ramp_soak_drives_the_target() {
        let config = RoastConfig {
            ramp_soak: vec![RampSoakSegment::new(10, 10, 200.0)],
            ..RoastConfig::default()
        };
        let session = RoastSession::new(&config, ramp_source()).unwrap();
        run(&session, 0..1);
        // Inactive: target follows the measurement, program idle
        assert_eq!(session.pid().target(), 100.0);

        session.pid().on();
        run(&session, 1..2);
        // Program starts from the measurement at t = 2
        assert_eq!(session.pid().target(), 102.0);
        run(&session, 2..4);
        // t = 6: 4 s into a 10 s ramp from 102 to 200
        assert!((session.pid().target() - 141.2).abs() < 1e-9);
        run(&session, 4..8);
        assert_eq!(session.pid().target(), 200.0);
    }

    #[test]
    fn cancelled_tick_skips_control() {
        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&dispatched);
        let session = RoastSession::new(&RoastConfig::default(), ramp_source())
            .unwrap()
            .with_sink(move |duty: f64| -> rf_controls::ControlResult<()> {
                log.lock().unwrap().push(duty);
                Ok(())
            });
        session.pid().set_target(200.0);
        session.pid().on();
        run(&session, 0..3);
        let before = dispatched.lock().unwrap().len();
        assert!(before > 0);

        let cancel = crate::scheduler::CancelToken::new();
        cancel.cancel();
        session.run_tick(&tick(3).with_cancel(cancel));
        assert_eq!(dispatched.lock().unwrap().len(), before);
        let report = session.latest().unwrap();
        assert!(report.cancelled);
        assert_eq!(session.series().0.len(), 4);
    }

    #[test]
    fn profile_snapshot_carries_marks() {
        let session = RoastSession::new(&RoastConfig::default(), ramp_source()).unwrap();
        run(&session, 0..2);
        session.mark_event(EventKind::Charge).unwrap();
        run(&session, 2..4);
        let profile = session.profile();
        assert_eq!(profile.len(), 4);
        assert_eq!(profile.marks().get(EventKind::Charge), Some(1));
        assert_eq!(profile.unit, TemperatureUnit::Celsius);
    }

    #[test]
    fn sampling_change_retunes_ror_smoothing() {
        let config = RoastConfig {
            ror: crate::config::RorSettings {
                window: 1,
                smoothing_cutoff_hz: Some(0.05),
            },
            ..RoastConfig::default()
        };
        let session = RoastSession::new(&config, ramp_source()).unwrap();
        run(&session, 0..3);

        session.set_sampling(SampleConfig::new(100)).unwrap();
        assert_eq!(session.pid().config().sampling_rate_hz, 10.0);
        {
            let core = session.lock();
            assert_eq!(core.ror.smoothing().unwrap().sampling_rate_hz, 10.0);
            assert_eq!(core.ror_config.smoothing().unwrap().sampling_rate_hz, 10.0);
            assert_eq!(core.ror_config.smoothing().unwrap().cutoff_hz, 0.05);
        }

        // A restarted roast rebuilds the calculator at the new rate
        session.start().unwrap();
        session.stop();
        let core = session.lock();
        assert_eq!(core.ror.smoothing().unwrap().sampling_rate_hz, 10.0);
    }

    #[test]
    fn concurrent_starts_begin_one_roast() {
        let config = RoastConfig {
            sampling: SampleConfig::new(100),
            ..RoastConfig::default()
        };
        let session = Arc::new(RoastSession::new(&config, ramp_source()).unwrap());
        let barrier = Arc::new(std::sync::Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let session = Arc::clone(&session);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    session.start().unwrap()
                })
            })
            .collect();
        let started = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&started| started)
            .count();
        assert_eq!(started, 1);

        // Losers never clear the running roast
        std::thread::sleep(Duration::from_millis(250));
        session.mark_event(EventKind::Charge).unwrap();
        std::thread::sleep(Duration::from_millis(250));
        session.stop();
        let (timex, _, _) = session.series();
        assert!(timex.windows(2).all(|w| w[1] > w[0]));
        assert!(session.marks().is_set(EventKind::Charge));
    }
}
