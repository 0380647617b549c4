//! Shared configuration, the remote control surface and the main loop.

mod config;
mod monitor;
#[cfg(feature = "status")]
mod status;
mod surface;

pub use config::{ConfigError, ConfigSnapshot, MonitorConfig, SharedConfig};
pub use monitor::{Clock, Monitor, TickReport, UptimeClock};
#[cfg(feature = "status")]
pub use status::{Status, StatusParseError, SETUP_STATUS};
pub use surface::{CommandError, ControlSurface, Telemetry, Variable};
