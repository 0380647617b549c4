use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use alarm::{EventSettings, Policy, Scope, Threshold, DEFAULT_PRESSURE_LIMIT};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("threshold_mbar must be finite and non-zero, got {0}")]
    Threshold(f64),
    #[error("tick_ms must be greater than zero")]
    TickPeriod,
}

/// Start-up configuration. Nothing here is written back; a restart returns
/// to whatever the file and flags say.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub threshold_mbar: f64,
    pub armed: bool,
    pub policy: Policy,
    pub publish_interval_ms: u64,
    pub tick_ms: u64,
    pub event_name: String,
    pub ttl_seconds: u32,
    pub scope: Scope,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let events = EventSettings::default();
        Self {
            threshold_mbar: DEFAULT_PRESSURE_LIMIT,
            armed: true,
            policy: Policy::default(),
            publish_interval_ms: alarm::DEFAULT_PUBLISH_INTERVAL.as_millis() as u64,
            tick_ms: 1000,
            event_name: events.event_name,
            ttl_seconds: events.ttl_seconds,
            scope: events.scope,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.threshold_mbar.is_finite() || self.threshold_mbar == 0.0 {
            return Err(ConfigError::Threshold(self.threshold_mbar));
        }
        if self.tick_ms == 0 {
            return Err(ConfigError::TickPeriod);
        }
        Ok(())
    }

    pub fn threshold(&self) -> Threshold {
        Threshold {
            pressure_limit: self.threshold_mbar,
        }
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn event_settings(&self) -> EventSettings {
        EventSettings {
            event_name: self.event_name.clone(),
            ttl_seconds: self.ttl_seconds,
            scope: self.scope,
        }
    }
}

/// Values written by remote commands and read by the loop once per tick.
/// Each field is replaced on its own; no command touches two of them.
///
/// Only [`ControlSurface`](crate::ControlSurface) writes these, after
/// validating its input:
///
/// ```compile_fail
/// let shared = control::SharedConfig::default();
/// shared.set_threshold(alarm::Threshold { pressure_limit: f64::NAN });
/// ```
#[derive(Debug)]
pub struct SharedConfig {
    threshold_bits: AtomicU64,
    armed: AtomicBool,
    led: AtomicBool,
}

/// What the loop sees for one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConfigSnapshot {
    pub threshold: Threshold,
    pub armed: bool,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new(Threshold::default(), true)
    }
}

impl SharedConfig {
    pub fn new(threshold: Threshold, armed: bool) -> Self {
        Self {
            threshold_bits: AtomicU64::new(threshold.pressure_limit.to_bits()),
            armed: AtomicBool::new(armed),
            led: AtomicBool::new(false),
        }
    }

    pub fn threshold(&self) -> Threshold {
        Threshold {
            pressure_limit: f64::from_bits(self.threshold_bits.load(Ordering::Acquire)),
        }
    }

    pub(crate) fn set_threshold(&self, threshold: Threshold) {
        self.threshold_bits
            .store(threshold.pressure_limit.to_bits(), Ordering::Release);
    }

    pub fn armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub(crate) fn set_armed(&self, armed: bool) {
        self.armed.store(armed, Ordering::Release);
    }

    pub fn led(&self) -> bool {
        self.led.load(Ordering::Acquire)
    }

    pub(crate) fn set_led(&self, on: bool) {
        self.led.store(on, Ordering::Release);
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            threshold: self.threshold(),
            armed: self.armed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_device() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.threshold_mbar, 2500.0);
        assert!(cfg.armed);
        assert_eq!(cfg.policy, Policy::Periodic);
        assert_eq!(cfg.publish_interval(), Duration::from_secs(120));
        assert_eq!(cfg.event_name, "external_power");
        assert_eq!(cfg.ttl_seconds, 60);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: MonitorConfig =
            serde_json::from_str(r#"{"policy":"edge","threshold_mbar":2600}"#).expect("parse");
        assert_eq!(cfg.policy, Policy::Edge);
        assert_eq!(cfg.threshold_mbar, 2600.0);
        assert!(cfg.armed);
        assert_eq!(cfg.scope, Scope::Private);
    }

    #[test]
    fn validate_rejects_zero_threshold_and_tick() {
        let cfg = MonitorConfig {
            threshold_mbar: 0.0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::Threshold(0.0)));

        let cfg = MonitorConfig {
            tick_ms: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::TickPeriod));
    }

    #[test]
    fn shared_config_swaps_fields_independently() {
        let shared = SharedConfig::default();
        shared.set_threshold(Threshold {
            pressure_limit: 1800.5,
        });
        assert!(shared.armed());
        shared.set_armed(false);
        let snap = shared.snapshot();
        assert_eq!(snap.threshold.pressure_limit, 1800.5);
        assert!(!snap.armed);
        assert!(!shared.led());
    }
}
