//! The fixed-cadence main loop: sense, evaluate, schedule, maybe notify.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use alarm::{AlarmEvaluator, EventSettings, Evaluation, NotificationSink, PublishScheduler};
use sensors::{SensorGateway, SensorSnapshot};

use crate::config::{ConfigSnapshot, MonitorConfig, SharedConfig};
use crate::surface::{ControlSurface, Telemetry};

/// Time since power-up.
pub trait Clock {
    fn now(&self) -> Duration;
}

#[derive(Clone, Copy, Debug)]
pub struct UptimeClock {
    started: Instant,
}

impl Default for UptimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl UptimeClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Clock for UptimeClock {
    fn now(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Everything that happened during one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickReport {
    pub snapshot: SensorSnapshot,
    pub config: ConfigSnapshot,
    pub evaluation: Evaluation,
    pub published: bool,
}

pub struct Monitor<G> {
    gateway: G,
    evaluator: AlarmEvaluator,
    scheduler: PublishScheduler,
    config: Arc<SharedConfig>,
    telemetry: Arc<Telemetry>,
    sink: Arc<dyn NotificationSink>,
    events: EventSettings,
}

impl<G: SensorGateway> Monitor<G> {
    /// Builds the monitor and takes an initial power reading so the
    /// `power`/`upspower` variables are meaningful before the first tick.
    pub fn new(mut gateway: G, cfg: &MonitorConfig, sink: Arc<dyn NotificationSink>) -> Self {
        let telemetry = Arc::new(Telemetry::default());
        telemetry.set_power(gateway.read_power(), gateway.read_backup_power());

        Self {
            gateway,
            evaluator: AlarmEvaluator::new(),
            scheduler: PublishScheduler::new(cfg.policy, cfg.publish_interval()),
            config: Arc::new(SharedConfig::new(cfg.threshold(), cfg.armed)),
            telemetry,
            sink,
            events: cfg.event_settings(),
        }
    }

    pub fn control(&self) -> ControlSurface {
        ControlSurface::new(
            self.config.clone(),
            self.telemetry.clone(),
            self.sink.clone(),
            self.events.clone(),
        )
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    pub fn scheduler(&self) -> &PublishScheduler {
        &self.scheduler
    }

    /// Run one cycle at time `now`.
    pub fn tick(&mut self, now: Duration) -> TickReport {
        let snapshot = self.gateway.snapshot(now);
        let config = self.config.snapshot();

        self.telemetry.record(&snapshot, &config);

        let evaluation = self.evaluator.evaluate(snapshot, config.threshold);
        if evaluation.changed {
            tracing::info!(
                alarm = evaluation.current,
                power = snapshot.power_ok,
                ups = snapshot.backup_power_ok,
                pressure_mbar = snapshot.pressure,
                "Alarm condition changed"
            );
        }

        let published = self.scheduler.decide(evaluation, config.armed, now);
        if published {
            self.events.alarm(&snapshot).send_to(self.sink.as_ref());
        }

        tracing::trace!(
            now_ms = now.as_millis() as u64,
            alarm = evaluation.current,
            published,
            "Tick complete"
        );

        TickReport {
            snapshot,
            config,
            evaluation,
            published,
        }
    }

    /// Tick every `period` against `clock` until `stop` is set. Cycles never
    /// overlap; a cycle that overruns its period is followed immediately by
    /// the next one.
    pub fn run<C, F>(&mut self, clock: &C, period: Duration, stop: &AtomicBool, mut after_tick: F)
    where
        C: Clock,
        F: FnMut(&mut G, &TickReport),
    {
        while !stop.load(Ordering::Acquire) {
            let cycle_start = Instant::now();

            let report = self.tick(clock.now());
            after_tick(&mut self.gateway, &report);

            let elapsed = cycle_start.elapsed();
            if elapsed < period {
                std::thread::sleep(period - elapsed);
            } else {
                tracing::debug!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Tick overran its period"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alarm::{MemorySink, Policy};

    struct Scripted {
        power_ok: bool,
        backup_power_ok: bool,
        pressure: f64,
    }

    impl SensorGateway for Scripted {
        fn read_power(&mut self) -> bool {
            self.power_ok
        }

        fn read_backup_power(&mut self) -> bool {
            self.backup_power_ok
        }

        fn read_pressure(&mut self) -> f64 {
            self.pressure
        }
    }

    fn monitor(policy: Policy) -> (Monitor<Scripted>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let cfg = MonitorConfig {
            policy,
            ..Default::default()
        };
        let gw = Scripted {
            power_ok: true,
            backup_power_ok: true,
            pressure: 2000.0,
        };
        (Monitor::new(gw, &cfg, sink.clone()), sink)
    }

    #[test]
    fn initial_power_read_populates_telemetry() {
        let (m, _) = monitor(Policy::Periodic);
        let control = m.control();
        assert_eq!(control.power(), 1);
        assert_eq!(control.upspower(), 1);
    }

    #[test]
    fn edge_policy_publishes_onset_text() {
        let (mut m, sink) = monitor(Policy::Edge);
        assert!(!m.tick(Duration::from_secs(1)).published);

        m.gateway_mut().backup_power_ok = false;
        let report = m.tick(Duration::from_secs(2));
        assert!(report.published);
        assert!(report.evaluation.changed);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "Power OK, UPS DOWN, Pressure 2000.00 mbar");
    }

    #[test]
    fn threshold_command_applies_on_next_tick() {
        let (mut m, sink) = monitor(Policy::Edge);
        let control = m.control();
        m.tick(Duration::from_secs(1));

        control.set_threshold("1500").expect("valid threshold");
        let report = m.tick(Duration::from_secs(2));
        assert_eq!(report.config.threshold.pressure_limit, 1500.0);
        assert!(report.evaluation.current);
        assert!(report.published);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn disarmed_monitor_stays_silent() {
        let (mut m, sink) = monitor(Policy::Edge);
        m.control().set_arm("disarm").expect("disarm");
        m.gateway_mut().power_ok = false;
        for s in 0..600 {
            assert!(!m.tick(Duration::from_secs(s)).published);
        }
        assert!(sink.is_empty());
    }

    #[cfg(feature = "status")]
    #[test]
    fn status_tracks_last_tick() {
        let (mut m, _) = monitor(Policy::Periodic);
        let control = m.control();
        assert_eq!(control.status(), "setup");
        control.set_arm("disarm").expect("disarm");
        m.tick(Duration::from_secs(1));
        assert_eq!(
            control.status(),
            "power:1,ups:1,pressure:2000.00,pthresh:2500,armed:0"
        );
    }

    struct StepClock(std::cell::Cell<u64>);

    impl Clock for StepClock {
        fn now(&self) -> Duration {
            let ms = self.0.get();
            self.0.set(ms + 30_000);
            Duration::from_millis(ms)
        }
    }

    #[test]
    fn run_loops_until_stopped() {
        let (mut m, sink) = monitor(Policy::Periodic);
        let stop = AtomicBool::new(false);
        let clock = StepClock(std::cell::Cell::new(0));
        let mut ticks = 0;

        m.run(&clock, Duration::from_millis(1), &stop, |gw, _| {
            ticks += 1;
            gw.pressure = 3000.0;
            if ticks == 11 {
                stop.store(true, Ordering::Release);
            }
        });

        assert_eq!(ticks, 11);
        // Alarming from t=30s. Strictly more than 120s since the last publish
        // first holds at t=150s, then at t=300s.
        assert_eq!(sink.len(), 2);
    }

    struct Unplugged;

    impl std::io::Write for Unplugged {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("channel down"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::other("channel down"))
        }
    }

    #[test]
    fn failed_delivery_does_not_stop_the_loop() {
        let cfg = MonitorConfig {
            policy: Policy::Edge,
            ..Default::default()
        };
        let gw = Scripted {
            power_ok: false,
            backup_power_ok: true,
            pressure: 2000.0,
        };
        let sink: Arc<dyn NotificationSink> = Arc::new(alarm::JsonLinesSink::new(Unplugged));
        let mut m = Monitor::new(gw, &cfg, sink);

        let report = m.tick(Duration::from_secs(5));
        assert!(report.published);
        assert_eq!(m.scheduler().record().last_published_at, Duration::from_secs(5));

        // No retry on the next tick; the reminder waits for the interval.
        assert!(!m.tick(Duration::from_secs(6)).published);
        assert!(m.tick(Duration::from_secs(125)).published);
        assert_eq!(m.scheduler().record().last_published_at, Duration::from_secs(125));
    }
}
