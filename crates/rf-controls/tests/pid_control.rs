//! Closed-loop and concurrency behaviour of the PID controller.

use std::sync::{Arc, Mutex};
use std::thread;

use proptest::prelude::*;
use rf_controls::{
    ControlResult, GainPoint, GainSchedule, PidConfig, PidController, ScheduleInput,
};
use rf_core::Reading;

/// First-order heater: `dT/dt = 0.05 * duty - 0.01 * (T - 20)`.
struct Plant {
    temp: f64,
}

impl Plant {
    fn step(&mut self, duty: f64, dt: f64) {
        self.temp += (0.05 * duty - 0.01 * (self.temp - 20.0)) * dt;
    }
}

#[test]
fn settles_on_target() {
    let duty = Arc::new(Mutex::new(0.0));
    let sink_duty = Arc::clone(&duty);
    let pid = PidController::new(PidConfig::default())
        .unwrap()
        .with_sink(move |d: f64| -> ControlResult<()> {
            *sink_duty.lock().unwrap() = d;
            Ok(())
        });
    pid.on();
    pid.set_target(150.0);

    let mut plant = Plant { temp: 20.0 };
    for tick in 0..3000 {
        pid.update(Reading::Valid(plant.temp), f64::from(tick));
        let d = *duty.lock().unwrap();
        plant.step(d, 1.0);
    }
    assert!((plant.temp - 150.0).abs() < 1.0, "temp {}", plant.temp);
}

#[test]
fn scheduled_gains_are_used() {
    let config = PidConfig {
        ki: 0.0,
        gain_schedule: GainSchedule::linear(
            ScheduleInput::Target,
            GainPoint::new(100.0, 1.0, 0.0, 0.0),
            GainPoint::new(200.0, 3.0, 0.0, 0.0),
        ),
        ..PidConfig::default()
    };
    let pid = PidController::new(config).unwrap();
    pid.on();
    pid.set_target(150.0);
    pid.update(Reading::Valid(140.0), 0.0);
    let out = pid.update(Reading::Valid(140.0), 1.0).unwrap();
    // Kp interpolates to 2.0 at target 150
    assert!((out - 20.0).abs() < 1e-9);
}

#[test]
fn concurrent_callers_do_not_corrupt_state() {
    let pid = Arc::new(PidController::new(PidConfig::default()).unwrap());
    pid.on();
    let writer = {
        let pid = Arc::clone(&pid);
        thread::spawn(move || {
            for i in 0..500 {
                pid.set_target(150.0 + f64::from(i % 10));
                if i % 50 == 0 {
                    pid.off();
                    pid.on();
                }
                let terms = pid.terms();
                assert!(terms.iterm.is_finite());
            }
        })
    };
    for tick in 0..500 {
        pid.update(Reading::Valid(140.0), f64::from(tick) * 0.1);
    }
    writer.join().unwrap();
    let terms = pid.terms();
    assert!(terms.pterm.is_finite() && terms.iterm.is_finite() && terms.dterm.is_finite());
}

proptest! {
    #[test]
    fn integral_stays_bounded_under_constant_error(
        kp in 0.0_f64..10.0,
        ki in 0.0_f64..10.0,
        beta in 0.5_f64..=1.0,
        target in 50.0_f64..300.0,
        pv in 20.0_f64..300.0,
    ) {
        let config = PidConfig {
            kp,
            ki,
            setpoint_weight: beta,
            ..PidConfig::default()
        };
        let limit_factor = config.integral_limit_factor;
        let pid = PidController::new(config).unwrap();
        pid.on();
        pid.set_target(target);
        let offset = (kp * (1.0 - beta) * target).abs();
        for tick in 0..300 {
            if let Some(out) = pid.update(Reading::Valid(pv), f64::from(tick)) {
                prop_assert!((0.0..=100.0).contains(&out));
            }
            let iterm = pid.terms().iterm;
            prop_assert!(iterm >= 0.0 * limit_factor - offset - 1e-9);
            prop_assert!(iterm <= 100.0 * limit_factor + offset + 1e-9);
        }
    }
}
