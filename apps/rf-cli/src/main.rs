use clap::{Parser, Subcommand, ValueEnum};
use rf_analytics::{AlarmAction, AlarmEvent, RorConfig};
use rf_app::{
    AppError, AppResult, RoastConfig, RoastSession, RoasterHeater, SimulatedRoaster, Tick,
    TickReport, analyze_profile, load_config, load_profile, save_profile,
};
use rf_controls::{ControlSink, FilterConfig};
use rf_core::TemperatureUnit;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Parser)]
#[command(name = "rf-cli")]
#[command(about = "RoastFlow CLI - Coffee roast control and analytics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a roast configuration file
    Validate {
        /// Path to the YAML or JSON config
        config_path: PathBuf,
    },
    /// Run a roast against the simulated roaster
    Simulate {
        /// Path to the YAML or JSON config
        config_path: PathBuf,
        /// Roast length in seconds
        #[arg(long, default_value_t = 600)]
        seconds: u64,
        /// Switch the PID on with this target
        #[arg(long)]
        target: Option<f64>,
        /// Sample on the wall clock instead of replaying ticks back to back
        #[arg(long)]
        realtime: bool,
        /// Save the recorded profile as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compute rate of rise and phases of a recorded profile
    Analyze {
        /// Path to the profile JSON file
        profile_path: PathBuf,
        /// RoR window in samples
        #[arg(long, default_value_t = 5)]
        window: usize,
        /// Butterworth pre-filter cutoff in Hz
        #[arg(long)]
        smoothing: Option<f64>,
        /// Report temperatures in this unit
        #[arg(long, value_enum)]
        unit: Option<UnitArg>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum UnitArg {
    C,
    F,
}

impl From<UnitArg> for TemperatureUnit {
    fn from(unit: UnitArg) -> Self {
        match unit {
            UnitArg::C => TemperatureUnit::Celsius,
            UnitArg::F => TemperatureUnit::Fahrenheit,
        }
    }
}

fn main() -> AppResult<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config_path } => cmd_validate(&config_path),
        Commands::Simulate {
            config_path,
            seconds,
            target,
            realtime,
            output,
        } => cmd_simulate(&config_path, seconds, target, realtime, output.as_deref()),
        Commands::Analyze {
            profile_path,
            window,
            smoothing,
            unit,
        } => cmd_analyze(&profile_path, window, smoothing, unit.map(Into::into)),
    }
}

fn cmd_validate(config_path: &Path) -> AppResult<()> {
    println!("Validating config: {}", config_path.display());
    let config = load_config(config_path)?;
    let program = config.program()?;
    println!("✓ Config is valid");
    println!("  Unit: {}", config.unit.symbol());
    println!("  Sampling interval: {} ms", config.sampling().interval_ms);
    println!(
        "  PID: kp={} ki={} kd={} (schedule {:?})",
        config.pid.kp, config.pid.ki, config.pid.kd, config.pid.gain_schedule.mode
    );
    println!("  RoR window: {} samples", config.ror.window);
    println!("  Alarms: {}", config.alarms.len());
    if !program.is_empty() {
        println!(
            "  Ramp/soak: {} segments, {:.0} s",
            program.segments().len(),
            program.total_duration_s()
        );
    }
    Ok(())
}

fn cmd_simulate(
    config_path: &Path,
    seconds: u64,
    target: Option<f64>,
    realtime: bool,
    output: Option<&Path>,
) -> AppResult<()> {
    let config = load_config(config_path)?;
    let roaster = SimulatedRoaster::new(config.simulator)?;
    let mut heater = roaster.heater();
    let session = RoastSession::new(&config, roaster.probe())?.with_sink(roaster.heater());
    let alarms = session.subscribe_alarms();

    match target {
        Some(target) => {
            session.pid().set_target(target);
            session.pid().on();
        }
        None if !config.ramp_soak.is_empty() => session.pid().on(),
        None => {}
    }

    println!(
        "Simulating {} s roast ({})",
        seconds,
        if realtime { "realtime" } else { "replay" }
    );
    let interval_ms = config.sampling().interval_ms;
    let print_every = (30_000 / interval_ms).max(1);

    if realtime {
        session.start()?;
        let deadline = Instant::now() + Duration::from_secs(seconds);
        let mut last_printed = None;
        while Instant::now() < deadline {
            thread::sleep(Duration::from_millis(interval_ms));
            handle_alarms(&alarms, &session, &mut heater);
            if let Some(report) = session.latest() {
                if report.index % print_every == 0 && last_printed != Some(report.index) {
                    print_report(&report, &config, roaster.duty());
                    last_printed = Some(report.index);
                }
            }
        }
        let outcome = session.stop();
        let stats = session.stats();
        println!(
            "  Stopped: {:?}, {} ticks, {} overruns, mean {:?}, max {:?}",
            outcome, stats.count, stats.overruns, stats.mean, stats.max
        );
    } else {
        let ticks = seconds * 1000 / interval_ms;
        for index in 0..=ticks {
            let tick = Tick::new(
                index,
                Duration::from_millis(index * interval_ms),
                Duration::from_millis(interval_ms),
            );
            session.run_tick(&tick);
            handle_alarms(&alarms, &session, &mut heater);
            if index % print_every == 0 {
                if let Some(report) = session.latest() {
                    print_report(&report, &config, roaster.duty());
                }
            }
        }
    }

    if let Some(report) = session.latest() {
        let phases = report.phases;
        println!("✓ Roast finished at {:.0} s", report.sample.time_s);
        if phases.invalid {
            println!("  Phases: unavailable (events out of order)");
        } else {
            println!(
                "  Phases: drying {:.1}%  maillard {:.1}%  development {:.1}%",
                phases.drying_percent, phases.maillard_percent, phases.development_percent
            );
        }
        for (event, index) in session.marks().iter() {
            println!("  {} at sample {}", event, index);
        }
    }

    if let Some(path) = output {
        save_profile(path, &session.profile())?;
        println!("  Profile saved to {}", path.display());
    }
    Ok(())
}

fn print_report(report: &TickReport, config: &RoastConfig, duty: f64) {
    let symbol = config.unit.symbol();
    let temp = report
        .sample
        .temperature
        .value()
        .map_or_else(|| "--".to_string(), |t| format!("{:.1}{}", t, symbol));
    println!(
        "  t={:>6.0}s  BT={:>9}  RoR={:>6.1}{}/min  target={:>6.1}  duty={:>5.1}%",
        report.sample.time_s, temp, report.ror, symbol, report.pid.target, duty
    );
}

/// Carry out alarm actions on behalf of the session.
fn handle_alarms(alarms: &Receiver<AlarmEvent>, session: &RoastSession, heater: &mut RoasterHeater) {
    for event in alarms.try_iter() {
        let value = event.action_value.trim();
        match event.action {
            AlarmAction::PopUp => {
                println!("  ALARM #{} at {:.0} s: {}", event.alarm_index, event.time_s, value);
            }
            AlarmAction::SetTarget => match value.parse::<f64>() {
                Ok(target) => session.pid().set_target(target),
                Err(_) => warn!(alarm = event.alarm_index, value, "alarm target is not a number"),
            },
            AlarmAction::SetOutput => match value.parse::<f64>() {
                Ok(duty) => {
                    session.pid().off();
                    if let Err(e) = heater.apply(duty) {
                        warn!(alarm = event.alarm_index, "heater rejected alarm output: {}", e);
                    }
                }
                Err(_) => warn!(alarm = event.alarm_index, value, "alarm output is not a number"),
            },
            AlarmAction::CallProgram => {
                warn!(alarm = event.alarm_index, program = value, "external programs are not run in simulation");
            }
        }
    }
}

fn cmd_analyze(
    profile_path: &Path,
    window: usize,
    smoothing: Option<f64>,
    unit: Option<TemperatureUnit>,
) -> AppResult<()> {
    let profile = load_profile(profile_path)?;

    let mut ror = RorConfig::new(window)?;
    if let Some(cutoff) = smoothing {
        let rate = sampling_rate(&profile.timex).ok_or_else(|| {
            AppError::InvalidInput("smoothing needs at least two samples over positive time".to_string())
        })?;
        ror = ror.with_smoothing(FilterConfig::new(rate, cutoff)?)?;
    }

    let mut analysis = analyze_profile(&profile, &ror)?;
    if let Some(unit) = unit {
        analysis = analysis.in_unit(unit);
    }
    let json = serde_json::to_string_pretty(&analysis)
        .map_err(|e| AppError::InvalidInput(format!("Failed to serialize analysis: {}", e)))?;
    println!("{}", json);
    Ok(())
}

/// Mean sampling rate of a recorded time axis.
fn sampling_rate(timex: &[f64]) -> Option<f64> {
    let (first, last) = (timex.first()?, timex.last()?);
    let span = last - first;
    if timex.len() < 2 || span <= 0.0 {
        return None;
    }
    Some((timex.len() - 1) as f64 / span)
}
