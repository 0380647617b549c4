//! Remote control surface: named read-only variables and named functions.
//!
//! Function names (`led`, `alarm`, `test`, `threshold`) and variable names
//! (`power`, `upspower`, `pressure`, `status`) are part of the remote
//! protocol and must not change. Every function takes one string argument
//! and answers with one integer.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
#[cfg(feature = "status")]
use std::sync::Mutex;
use std::sync::Arc;

use alarm::{EventSettings, NotificationSink, Threshold};
use sensors::SensorSnapshot;

use crate::config::{ConfigSnapshot, SharedConfig};
#[cfg(feature = "status")]
use crate::status::{Status, SETUP_STATUS};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("invalid alarm command '{0}' (expected 'arm' or 'disarm')")]
    InvalidArmToken(String),
    #[error("invalid threshold '{0}'")]
    InvalidThreshold(String),
    #[error("invalid led command '{0}' (expected 'on' or 'off')")]
    InvalidActuatorToken(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
}

impl CommandError {
    /// Integer answered to a remote caller for this rejection.
    pub fn return_code(&self) -> i32 {
        match self {
            CommandError::InvalidThreshold(_) => 0,
            _ => -1,
        }
    }
}

/// Latest sensor values, published by the loop for remote reads.
#[derive(Debug)]
pub struct Telemetry {
    power: AtomicBool,
    upspower: AtomicBool,
    pressure_bits: AtomicU64,
    #[cfg(feature = "status")]
    status: Mutex<String>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            power: AtomicBool::new(false),
            upspower: AtomicBool::new(false),
            pressure_bits: AtomicU64::new(0.0f64.to_bits()),
            #[cfg(feature = "status")]
            status: Mutex::new(SETUP_STATUS.to_string()),
        }
    }
}

impl Telemetry {
    pub fn set_power(&self, power: bool, upspower: bool) {
        self.power.store(power, Ordering::Release);
        self.upspower.store(upspower, Ordering::Release);
    }

    /// Publish one tick's readings. `config` is the snapshot the tick
    /// evaluated with, so `status` agrees with that tick's decision.
    pub fn record(&self, snapshot: &SensorSnapshot, config: &ConfigSnapshot) {
        self.set_power(snapshot.power_ok, snapshot.backup_power_ok);
        self.pressure_bits
            .store(snapshot.pressure.to_bits(), Ordering::Release);

        #[cfg(feature = "status")]
        {
            let status = Status {
                power: snapshot.power_ok,
                ups: snapshot.backup_power_ok,
                pressure: snapshot.pressure,
                pthresh: config.threshold.pressure_limit as i32,
                armed: config.armed,
            };
            *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status.to_string();
        }
        #[cfg(not(feature = "status"))]
        let _ = config;
    }

    pub fn power(&self) -> bool {
        self.power.load(Ordering::Acquire)
    }

    pub fn upspower(&self) -> bool {
        self.upspower.load(Ordering::Acquire)
    }

    pub fn pressure(&self) -> f64 {
        f64::from_bits(self.pressure_bits.load(Ordering::Acquire))
    }

    #[cfg(feature = "status")]
    pub fn status(&self) -> String {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Value of a remote variable.
#[derive(Clone, Debug, PartialEq)]
pub enum Variable {
    Int(i32),
    Double(f64),
    Text(String),
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Int(v) => write!(f, "{v}"),
            Variable::Double(v) => write!(f, "{v}"),
            Variable::Text(v) => f.write_str(v),
        }
    }
}

/// Handle given to the remote command path. Cheap to clone; every clone
/// talks to the same monitor.
#[derive(Clone)]
pub struct ControlSurface {
    config: Arc<SharedConfig>,
    telemetry: Arc<Telemetry>,
    sink: Arc<dyn NotificationSink>,
    events: EventSettings,
}

impl ControlSurface {
    pub fn new(
        config: Arc<SharedConfig>,
        telemetry: Arc<Telemetry>,
        sink: Arc<dyn NotificationSink>,
        events: EventSettings,
    ) -> Self {
        Self {
            config,
            telemetry,
            sink,
            events,
        }
    }

    pub fn power(&self) -> i32 {
        i32::from(self.telemetry.power())
    }

    pub fn upspower(&self) -> i32 {
        i32::from(self.telemetry.upspower())
    }

    pub fn pressure(&self) -> f64 {
        self.telemetry.pressure()
    }

    #[cfg(feature = "status")]
    pub fn status(&self) -> String {
        self.telemetry.status()
    }

    pub fn variable(&self, name: &str) -> Result<Variable, CommandError> {
        match name {
            "power" => Ok(Variable::Int(self.power())),
            "upspower" => Ok(Variable::Int(self.upspower())),
            "pressure" => Ok(Variable::Double(self.pressure())),
            #[cfg(feature = "status")]
            "status" => Ok(Variable::Text(self.status())),
            other => Err(CommandError::UnknownVariable(other.to_string())),
        }
    }

    /// `"arm"` answers 1, `"disarm"` answers 0. Tokens are case-sensitive.
    pub fn set_arm(&self, command: &str) -> Result<i32, CommandError> {
        let armed = match command {
            "arm" => true,
            "disarm" => false,
            other => {
                tracing::warn!(command = other, "Rejected alarm command");
                return Err(CommandError::InvalidArmToken(other.to_string()));
            }
        };
        self.config.set_armed(armed);
        tracing::info!(armed, "Alarm arm state changed");
        Ok(i32::from(armed))
    }

    /// Accepts any finite non-zero number and answers it truncated to an
    /// integer. Negative values are accepted as-is; they leave the alarm
    /// condition permanently raised.
    pub fn set_threshold(&self, command: &str) -> Result<i32, CommandError> {
        let value = match command.trim().parse::<f64>() {
            Ok(v) if v.is_finite() && v != 0.0 => v,
            _ => {
                tracing::warn!(command, "Rejected pressure threshold");
                return Err(CommandError::InvalidThreshold(command.to_string()));
            }
        };

        if value < 0.0 {
            tracing::warn!(
                threshold_mbar = value,
                "Negative pressure threshold accepted; alarm will stay raised"
            );
        }
        self.config.set_threshold(Threshold {
            pressure_limit: value,
        });
        tracing::info!(threshold_mbar = value, "Pressure threshold changed");
        Ok(value as i32)
    }

    /// `"on"` answers 1, `"off"` answers 0.
    pub fn toggle_actuator(&self, command: &str) -> Result<i32, CommandError> {
        let on = match command {
            "on" => true,
            "off" => false,
            other => {
                tracing::warn!(command = other, "Rejected led command");
                return Err(CommandError::InvalidActuatorToken(other.to_string()));
            }
        };
        self.config.set_led(on);
        tracing::info!(on, "Led output changed");
        Ok(i32::from(on))
    }

    /// Sends one notification regardless of arm state, alarm condition or
    /// publish timer. Does not touch the scheduler.
    pub fn trigger_test_notification(&self) -> i32 {
        tracing::info!(event = %self.events.event_name, "Publishing test notification");
        self.events.test().send_to(self.sink.as_ref());
        1
    }

    /// Dispatch a remote function call by name.
    pub fn call(&self, function: &str, argument: &str) -> Result<i32, CommandError> {
        match function {
            "led" => self.toggle_actuator(argument),
            "alarm" => self.set_arm(argument),
            "test" => Ok(self.trigger_test_notification()),
            "threshold" => self.set_threshold(argument),
            other => Err(CommandError::UnknownFunction(other.to_string())),
        }
    }

    /// Like [`call`](Self::call) but answers the integer a remote caller sees.
    pub fn invoke(&self, function: &str, argument: &str) -> i32 {
        self.call(function, argument)
            .unwrap_or_else(|e| e.return_code())
    }

    /// Read-only outside this crate; changes go through the validated
    /// commands above.
    pub fn config(&self) -> &SharedConfig {
        &self.config
    }
}
