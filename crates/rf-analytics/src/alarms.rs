//! Roast alarms.
//!
//! An [`Alarm`] tests one condition against the live temperature and roast
//! time. An [`AlarmList`] owns the list-level policy: guard alarms, the
//! trigger-once latch and bulk re-arming at roast start. Firing produces an
//! [`AlarmEvent`]; carrying out the action is up to the caller.

use rf_core::{EventKind, EventMarks, is_valid_temperature};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AnalyticsError, AnalyticsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmCondition {
    /// Temperature at or above the threshold.
    AboveTemp,
    /// Temperature at or below the threshold.
    BelowTemp,
    /// Roast time at or past the threshold (seconds).
    AtTime,
    /// Time since the reference event at or past the threshold (seconds).
    AfterEvent,
}

/// What the owner should do when the alarm fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmAction {
    #[default]
    PopUp,
    /// Set the heater output to `action_value`.
    SetOutput,
    /// Set the PID target to `action_value`.
    SetTarget,
    /// Run the external program named by `action_value`.
    CallProgram,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    #[serde(default = "default_active")]
    pub active: bool,
    pub condition: AlarmCondition,
    pub threshold: f64,
    #[serde(default)]
    pub action: AlarmAction,
    #[serde(default)]
    pub action_value: String,
    /// Index of an alarm that must have fired before this one may.
    #[serde(default)]
    pub guard: Option<usize>,
    /// Event an `AfterEvent` alarm counts from.
    #[serde(default)]
    pub reference_event: Option<EventKind>,
    #[serde(skip)]
    triggered: bool,
}

fn default_active() -> bool {
    true
}

impl Alarm {
    pub fn new(condition: AlarmCondition, threshold: f64) -> Self {
        Self {
            active: true,
            condition,
            threshold,
            action: AlarmAction::default(),
            action_value: String::new(),
            guard: None,
            reference_event: None,
            triggered: false,
        }
    }

    pub fn with_action(mut self, action: AlarmAction, value: impl Into<String>) -> Self {
        self.action = action;
        self.action_value = value.into();
        self
    }

    /// Guard given in the raw encoding, where a negative index means none.
    pub fn with_guard_index(mut self, guard: i32) -> Self {
        self.guard = usize::try_from(guard).ok();
        self
    }

    pub fn after_event(mut self, event: EventKind) -> Self {
        self.reference_event = Some(event);
        self
    }

    /// Whether the condition holds now. Inactive or already triggered alarms
    /// never do, and an unusable temperature never satisfies a temperature
    /// condition.
    pub fn evaluate(&self, current_temp: f64, current_time_s: f64) -> bool {
        if !self.active || self.triggered {
            return false;
        }
        match self.condition {
            AlarmCondition::AboveTemp => {
                is_valid_temperature(current_temp) && current_temp >= self.threshold
            }
            AlarmCondition::BelowTemp => {
                is_valid_temperature(current_temp) && current_temp <= self.threshold
            }
            AlarmCondition::AtTime | AlarmCondition::AfterEvent => {
                current_time_s.is_finite() && current_time_s >= self.threshold
            }
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    pub fn mark_triggered(&mut self) {
        self.triggered = true;
    }

    /// Re-arm.
    pub fn reset(&mut self) {
        self.triggered = false;
    }
}

/// Reported when an alarm fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub alarm_index: usize,
    pub action: AlarmAction,
    pub action_value: String,
    pub time_s: f64,
}

/// Inputs for one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlarmContext {
    pub temperature: f64,
    pub time_s: f64,
    event_times: [Option<f64>; EventKind::COUNT],
}

impl AlarmContext {
    pub fn new(temperature: f64, time_s: f64) -> Self {
        Self {
            temperature,
            time_s,
            event_times: [None; EventKind::COUNT],
        }
    }

    /// Resolve event marks to times on `timex`.
    pub fn with_marks(mut self, marks: &EventMarks, timex: &[f64]) -> Self {
        for (kind, index) in marks.iter() {
            self.event_times[kind.slot()] = timex.get(index).copied();
        }
        self
    }

    pub fn event_time(&self, kind: EventKind) -> Option<f64> {
        self.event_times[kind.slot()]
    }

    /// Time base an alarm is evaluated against; `None` while its reference
    /// event has not happened.
    fn time_for(&self, alarm: &Alarm) -> Option<f64> {
        match (alarm.condition, alarm.reference_event) {
            (AlarmCondition::AfterEvent, Some(event)) => {
                self.event_time(event).map(|t| self.time_s - t)
            }
            _ => Some(self.time_s),
        }
    }
}

/// Ordered alarm list with guard and trigger-once policy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlarmList {
    alarms: Vec<Alarm>,
}

impl AlarmList {
    pub fn new(alarms: Vec<Alarm>) -> AnalyticsResult<Self> {
        let list = Self { alarms };
        list.validate()?;
        Ok(list)
    }

    /// Guards must point at another alarm in the list.
    pub fn validate(&self) -> AnalyticsResult<()> {
        let len = self.alarms.len();
        for (index, alarm) in self.alarms.iter().enumerate() {
            if let Some(guard) = alarm.guard {
                if guard >= len || guard == index {
                    return Err(AnalyticsError::InvalidGuard { index, guard, len });
                }
            }
            if !alarm.threshold.is_finite() {
                return Err(AnalyticsError::InvalidArg {
                    what: "alarm threshold must be finite",
                });
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Alarm> {
        self.alarms.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alarm> {
        self.alarms.iter()
    }

    fn guard_open(&self, alarm: &Alarm) -> bool {
        alarm
            .guard
            .is_none_or(|guard| self.alarms.get(guard).is_some_and(Alarm::is_triggered))
    }

    /// Evaluate every alarm in order, latch the ones that fire and report
    /// them. A guard fired earlier in the same pass opens its dependants.
    pub fn evaluate(&mut self, ctx: &AlarmContext) -> Vec<AlarmEvent> {
        let mut fired = Vec::new();
        for index in 0..self.alarms.len() {
            let alarm = &self.alarms[index];
            if !self.guard_open(alarm) {
                continue;
            }
            let Some(time_s) = ctx.time_for(alarm) else {
                continue;
            };
            if !alarm.evaluate(ctx.temperature, time_s) {
                continue;
            }
            let alarm = &mut self.alarms[index];
            alarm.mark_triggered();
            info!(
                alarm = index,
                action = ?alarm.action,
                time_s = ctx.time_s,
                "alarm fired"
            );
            fired.push(AlarmEvent {
                alarm_index: index,
                action: alarm.action,
                action_value: alarm.action_value.clone(),
                time_s: ctx.time_s,
            });
        }
        fired
    }

    /// Re-arm every alarm (roast start).
    pub fn reset_all(&mut self) {
        for alarm in &mut self.alarms {
            alarm.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn above_temp_fires_once() {
        let mut alarm = Alarm::new(AlarmCondition::AboveTemp, 200.0);
        assert!(!alarm.evaluate(199.9, 10.0));
        assert!(alarm.evaluate(200.0, 10.0));
        alarm.mark_triggered();
        assert!(!alarm.evaluate(205.0, 11.0));
        alarm.reset();
        assert!(alarm.evaluate(205.0, 12.0));
    }

    #[test]
    fn below_temp_and_time() {
        let below = Alarm::new(AlarmCondition::BelowTemp, 100.0);
        assert!(below.evaluate(100.0, 0.0));
        assert!(!below.evaluate(100.1, 0.0));
        let at = Alarm::new(AlarmCondition::AtTime, 300.0);
        assert!(!at.evaluate(0.0, 299.0));
        assert!(at.evaluate(0.0, 300.0));
    }

    #[test]
    fn invalid_temperature_never_fires() {
        let below = Alarm::new(AlarmCondition::BelowTemp, 100.0);
        assert!(!below.evaluate(-1.0, 0.0));
        assert!(!below.evaluate(f64::NAN, 0.0));
    }

    #[test]
    fn inactive_never_fires() {
        let mut alarm = Alarm::new(AlarmCondition::AtTime, 0.0);
        alarm.active = false;
        assert!(!alarm.evaluate(0.0, 10.0));
    }

    #[test]
    fn list_latches_and_resets() {
        let mut list = AlarmList::new(vec![Alarm::new(AlarmCondition::AboveTemp, 200.0)]).unwrap();
        assert!(list.evaluate(&AlarmContext::new(199.9, 1.0)).is_empty());
        assert_eq!(list.evaluate(&AlarmContext::new(200.0, 2.0)).len(), 1);
        assert!(list.evaluate(&AlarmContext::new(201.0, 3.0)).is_empty());
        list.reset_all();
        assert_eq!(list.evaluate(&AlarmContext::new(201.0, 4.0)).len(), 1);
    }

    #[test]
    fn guard_must_fire_first() {
        let mut list = AlarmList::new(vec![
            Alarm::new(AlarmCondition::AboveTemp, 150.0).with_guard_index(1),
            Alarm::new(AlarmCondition::AtTime, 60.0),
        ])
        .unwrap();
        // temperature condition holds but guard has not fired
        assert!(list.evaluate(&AlarmContext::new(160.0, 30.0)).is_empty());
        let fired = list.evaluate(&AlarmContext::new(160.0, 60.0));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].alarm_index, 1);
        // guard is open now
        let fired = list.evaluate(&AlarmContext::new(160.0, 62.0));
        assert_eq!(fired[0].alarm_index, 0);
    }

    #[test]
    fn guard_fired_earlier_in_pass_counts() {
        let mut list = AlarmList::new(vec![
            Alarm::new(AlarmCondition::AtTime, 10.0),
            Alarm::new(AlarmCondition::AboveTemp, 100.0).with_guard_index(0),
        ])
        .unwrap();
        let fired = list.evaluate(&AlarmContext::new(120.0, 10.0));
        assert_eq!(fired.len(), 2);
    }

    #[test]
    fn after_event_waits_for_mark() {
        let mut list = AlarmList::new(vec![
            Alarm::new(AlarmCondition::AfterEvent, 90.0)
                .after_event(EventKind::FcStart)
                .with_action(AlarmAction::SetOutput, "40"),
        ])
        .unwrap();
        let timex: Vec<f64> = (0..10).map(|i| f64::from(i) * 60.0).collect();
        let no_marks = EventMarks::new();
        let ctx = AlarmContext::new(200.0, 500.0).with_marks(&no_marks, &timex);
        assert!(list.evaluate(&ctx).is_empty());

        let marks = EventMarks::from_raw([0, -1, 7, -1, -1, -1, -1, -1]);
        let ctx = AlarmContext::new(200.0, 500.0).with_marks(&marks, &timex);
        assert!(list.evaluate(&ctx).is_empty());
        let ctx = AlarmContext::new(200.0, 510.0).with_marks(&marks, &timex);
        let fired = list.evaluate(&ctx);
        assert_eq!(fired[0].action, AlarmAction::SetOutput);
        assert_eq!(fired[0].action_value, "40");
    }

    #[test]
    fn bad_guard_rejected() {
        let self_guard = vec![Alarm::new(AlarmCondition::AtTime, 1.0).with_guard_index(0)];
        assert!(AlarmList::new(self_guard).is_err());
        let dangling = vec![Alarm::new(AlarmCondition::AtTime, 1.0).with_guard_index(4)];
        assert!(AlarmList::new(dangling).is_err());
        let none = vec![Alarm::new(AlarmCondition::AtTime, 1.0).with_guard_index(-1)];
        assert!(AlarmList::new(none).is_ok());
    }
}
