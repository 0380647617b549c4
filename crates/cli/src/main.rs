use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alarm::{JsonLinesSink, NotificationSink, Policy};
use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use control::{ControlSurface, Monitor, MonitorConfig, TickReport, UptimeClock};
use sensors::{BoardFault, Gateway, SimBoard};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Scenario {
    Normal,
    MainsOutage,
    UpsOutage,
    PressureRise,
    StuckGauge,
}

#[derive(Parser, Debug)]
#[command(
    name = "sentinel",
    version,
    about = "Detector power and pressure sentinel running against a simulated board"
)]
struct Args {
    /// JSON configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(value_enum, long, default_value = "normal")]
    scenario: Scenario,

    /// Total run time in seconds
    #[arg(long, default_value_t = 600.0)]
    seconds: f64,

    /// Notification policy: periodic or edge
    #[arg(long)]
    policy: Option<Policy>,

    /// Pressure alarm threshold (mbar)
    #[arg(long, allow_negative_numbers = true)]
    threshold: Option<f64>,

    /// Minimum spacing between alarm notifications (ms)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Loop period (ms)
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Start with notifications disabled
    #[arg(long)]
    disarmed: bool,

    /// RNG seed for deterministic runs
    #[arg(long, default_value_t = 12345)]
    seed: u64,

    /// Hold the loop period in wall-clock time and accept commands on stdin
    #[arg(long)]
    realtime: bool,

    /// Print one JSON row per tick
    #[arg(long)]
    trace: bool,

    /// Scheduled remote call in simulated time, e.g. `300:alarm=disarm`
    #[arg(long = "at", value_parser = parse_scheduled)]
    scheduled: Vec<ScheduledCall>,
}

#[derive(Clone, Debug)]
struct ScheduledCall {
    at_s: f64,
    function: String,
    argument: String,
}

fn parse_scheduled(s: &str) -> Result<ScheduledCall, String> {
    let (at, call) = s
        .split_once(':')
        .ok_or_else(|| format!("expected <seconds>:<function>[=<arg>], got '{s}'"))?;
    let at_s: f64 = at
        .parse()
        .map_err(|_| format!("bad time '{at}' in '{s}'"))?;
    let (function, argument) = call.split_once('=').unwrap_or((call, ""));
    Ok(ScheduledCall {
        at_s,
        function: function.to_string(),
        argument: argument.to_string(),
    })
}

#[derive(Serialize)]
struct TraceRow {
    t_s: f64,
    power: bool,
    ups: bool,
    pressure_mbar: f64,
    threshold_mbar: f64,
    armed: bool,
    alarm: bool,
    published: bool,
}

impl From<&TickReport> for TraceRow {
    fn from(r: &TickReport) -> Self {
        Self {
            t_s: r.snapshot.timestamp.as_secs_f64(),
            power: r.snapshot.power_ok,
            ups: r.snapshot.backup_power_ok,
            pressure_mbar: r.snapshot.pressure,
            threshold_mbar: r.config.threshold.pressure_limit,
            armed: r.config.armed,
            alarm: r.evaluation.current,
            published: r.published,
        }
    }
}

/// Answer to a remote call, shaped like the cloud API replies.
#[derive(Serialize)]
#[serde(untagged)]
enum Reply {
    Function {
        name: String,
        return_value: i32,
    },
    Variable {
        name: String,
        result: String,
    },
    Error {
        name: String,
        error: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sentinel=info,control=info,alarm=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cfg = load_config(&args)?;
    tracing::info!(
        policy = %cfg.policy,
        threshold_mbar = cfg.threshold_mbar,
        interval_ms = cfg.publish_interval_ms,
        tick_ms = cfg.tick_ms,
        armed = cfg.armed,
        "Starting sentinel"
    );

    let sink: Arc<dyn NotificationSink> = Arc::new(JsonLinesSink::new(io::stdout()));
    let mut board = SimBoard::new(args.seed);
    if matches!(args.scenario, Scenario::PressureRise) {
        board.fault = BoardFault::PressureRamp { per_s: 5.0 };
    }
    let mut monitor = Monitor::new(Gateway::new(board), &cfg, sink);

    if args.realtime {
        run_realtime(&args, &cfg, &mut monitor)
    } else {
        run_simulated(&args, &cfg, &mut monitor)
    }
}

fn load_config(args: &Args) -> Result<MonitorConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => MonitorConfig::default(),
    };

    if let Some(policy) = args.policy {
        cfg.policy = policy;
    }
    if let Some(threshold) = args.threshold {
        cfg.threshold_mbar = threshold;
    }
    if let Some(interval_ms) = args.interval_ms {
        cfg.publish_interval_ms = interval_ms;
    }
    if let Some(tick_ms) = args.tick_ms {
        cfg.tick_ms = tick_ms;
    }
    if args.disarmed {
        cfg.armed = false;
    }

    cfg.validate().context("invalid configuration")?;
    if !(args.seconds.is_finite() && args.seconds > 0.0) {
        bail!("--seconds must be a positive number");
    }
    Ok(cfg)
}

/// Board fault active at `t_s` for the chosen scenario.
fn scenario_fault(scenario: Scenario, t_s: f64, seconds: f64) -> BoardFault {
    let onset = seconds * 0.3;
    match scenario {
        Scenario::Normal => BoardFault::None,
        Scenario::MainsOutage if t_s >= onset && t_s < seconds * 0.6 => BoardFault::MainsOutage,
        Scenario::MainsOutage => BoardFault::None,
        Scenario::UpsOutage if t_s >= onset => BoardFault::UpsOutage,
        Scenario::UpsOutage => BoardFault::None,
        Scenario::PressureRise => BoardFault::PressureRamp { per_s: 5.0 },
        Scenario::StuckGauge if t_s >= onset => BoardFault::StuckAdc { counts: 4095 },
        Scenario::StuckGauge => BoardFault::None,
    }
}

fn emit_trace(report: &TickReport) -> Result<()> {
    let row = TraceRow::from(report);
    let mut out = io::stdout().lock();
    writeln!(out, "{}", serde_json::to_string(&row)?)?;
    Ok(())
}

fn run_simulated(
    args: &Args,
    cfg: &MonitorConfig,
    monitor: &mut Monitor<Gateway<SimBoard>>,
) -> Result<()> {
    let control = monitor.control();
    let dt = cfg.tick_period();
    let dt_s = dt.as_secs_f64();
    let steps = (args.seconds / dt_s).ceil() as u64;

    let mut pending = args.scheduled.clone();
    pending.sort_by(|a, b| a.at_s.total_cmp(&b.at_s));
    let mut pending = pending.into_iter().peekable();

    let mut published = 0u64;
    for k in 0..steps {
        let now = Duration::from_millis(cfg.tick_ms.saturating_mul(k));
        let t_s = now.as_secs_f64();

        while let Some(call) = pending.next_if(|c| c.at_s <= t_s) {
            reply(&control, &call.function, &call.argument)?;
        }

        monitor.gateway_mut().board_mut().fault = scenario_fault(args.scenario, t_s, args.seconds);

        let report = monitor.tick(now);
        if report.published {
            published += 1;
        }
        if args.trace {
            emit_trace(&report)?;
        }

        monitor.gateway_mut().board_mut().step(dt_s);
    }

    tracing::info!(ticks = steps, published, "Simulation finished");
    Ok(())
}

fn run_realtime(
    args: &Args,
    cfg: &MonitorConfig,
    monitor: &mut Monitor<Gateway<SimBoard>>,
) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    spawn_command_reader(monitor.control(), stop.clone());

    let clock = UptimeClock::new();
    let limit = Duration::from_secs_f64(args.seconds);
    let dt_s = cfg.tick_period().as_secs_f64();
    let mut trace_error = None;

    monitor.run(&clock, cfg.tick_period(), &stop, |gateway, report| {
        let t_s = report.snapshot.timestamp.as_secs_f64();
        gateway.board_mut().fault = scenario_fault(args.scenario, t_s, args.seconds);
        gateway.board_mut().step(dt_s);

        if args.trace {
            if let Err(e) = emit_trace(report) {
                trace_error = Some(e);
                stop.store(true, Ordering::Release);
            }
        }
        if report.snapshot.timestamp >= limit {
            stop.store(true, Ordering::Release);
        }
    });

    match trace_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Reads `<function> <argument>`, `get <variable>` or `quit` lines from
/// stdin. Replies go to stdout as JSON.
fn spawn_command_reader(control: ControlSurface, stop: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "Command input closed");
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "quit" {
                stop.store(true, Ordering::Release);
                break;
            }
            let (name, argument) = line.split_once(' ').unwrap_or((line, ""));
            if let Err(e) = reply(&control, name, argument.trim()) {
                tracing::warn!(error = %e, "Failed to write reply");
            }
        }
    });
}

fn reply(control: &ControlSurface, name: &str, argument: &str) -> Result<()> {
    let reply = if name == "get" {
        match control.variable(argument) {
            Ok(value) => Reply::Variable {
                name: argument.to_string(),
                result: value.to_string(),
            },
            Err(e) => Reply::Error {
                name: argument.to_string(),
                error: e.to_string(),
            },
        }
    } else {
        match control.call(name, argument) {
            Ok(return_value) => Reply::Function {
                name: name.to_string(),
                return_value,
            },
            Err(e) => {
                tracing::warn!(function = name, error = %e, "Remote call rejected");
                Reply::Function {
                    name: name.to_string(),
                    return_value: e.return_code(),
                }
            }
        }
    };

    let mut out = io::stdout().lock();
    writeln!(out, "{}", serde_json::to_string(&reply)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_call_parsing() {
        let c = parse_scheduled("300:alarm=disarm").expect("valid");
        assert_eq!(c.at_s, 300.0);
        assert_eq!(c.function, "alarm");
        assert_eq!(c.argument, "disarm");

        let c = parse_scheduled("12.5:test").expect("valid");
        assert_eq!(c.function, "test");
        assert_eq!(c.argument, "");

        assert!(parse_scheduled("alarm=arm").is_err());
        assert!(parse_scheduled("soon:alarm=arm").is_err());
    }

    #[test]
    fn mains_outage_window() {
        assert_eq!(scenario_fault(Scenario::MainsOutage, 10.0, 100.0), BoardFault::None);
        assert_eq!(
            scenario_fault(Scenario::MainsOutage, 30.0, 100.0),
            BoardFault::MainsOutage
        );
        assert_eq!(scenario_fault(Scenario::MainsOutage, 60.0, 100.0), BoardFault::None);
    }

    #[test]
    fn args_override_config() {
        let args = Args::parse_from([
            "sentinel",
            "--policy",
            "edge",
            "--threshold",
            "2600",
            "--disarmed",
        ]);
        let cfg = load_config(&args).expect("valid config");
        assert_eq!(cfg.policy, Policy::Edge);
        assert_eq!(cfg.threshold_mbar, 2600.0);
        assert!(!cfg.armed);
    }

    #[test]
    fn negative_threshold_flag_is_accepted() {
        let args = Args::try_parse_from(["sentinel", "--threshold", "-100"]).expect("parses");
        let cfg = load_config(&args).expect("valid config");
        assert_eq!(cfg.threshold_mbar, -100.0);
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let args = Args::parse_from(["sentinel", "--threshold", "0"]);
        assert!(load_config(&args).is_err());
    }
}
