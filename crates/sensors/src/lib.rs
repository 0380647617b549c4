//! Sensor access for the detector sentinel.
//!
//! Three physical signals are sampled each tick: mains power (a PMIC status
//! bit), UPS power (a thresholded analog read) and detector pressure (a linear
//! transform of an analog read). The [`Board`] trait is the raw hardware
//! boundary; [`Gateway`] adds the calibration math on top of it.

use std::time::Duration;

mod sim;

pub use sim::{BoardFault, SimBoard};

/// Full scale of the 12-bit ADC.
pub const ADC_MAX_COUNTS: u16 = 4095;

/// 1.3 V on a 3.3 V reference: 4096 * 1.3 / 3.3.
pub const UPS_COUNTS_THRESHOLD: u16 = 1614;

/// PG_STAT bit of the PMIC system status register.
pub const PMIC_POWER_GOOD_MASK: u8 = 0x04;

const PRESSURE_SPAN_MBAR: f64 = 6263.0;
const PRESSURE_OFFSET_MBAR: f64 = 631.4;
const ADC_CHANNELS: f64 = 4096.0;

/// True when an external supply (USB or VIN) is present.
pub fn power_good(system_status: u8) -> bool {
    (system_status & PMIC_POWER_GOOD_MASK) != 0
}

/// No hysteresis: a single count over the threshold means present.
pub fn ups_present(counts: u16) -> bool {
    counts > UPS_COUNTS_THRESHOLD
}

/// Gauge output 0-10 VDC, divided down to 3.3 VDC. Not clamped.
pub fn pressure_from_counts(counts: u16) -> f64 {
    PRESSURE_SPAN_MBAR * f64::from(counts) / ADC_CHANNELS - PRESSURE_OFFSET_MBAR
}

/// Inverse of [`pressure_from_counts`], saturated to the ADC range.
pub fn counts_for_pressure(mbar: f64) -> u16 {
    let counts = ((mbar + PRESSURE_OFFSET_MBAR) * ADC_CHANNELS / PRESSURE_SPAN_MBAR).round();
    if counts.is_nan() {
        return 0;
    }
    counts.clamp(0.0, f64::from(ADC_MAX_COUNTS)) as u16
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnalogPin {
    /// A0
    PressureGauge,
    /// A3
    UpsPower,
}

/// Raw hardware reads. Reads never fail.
pub trait Board {
    fn pmic_system_status(&mut self) -> u8;
    fn analog_read(&mut self, pin: AnalogPin) -> u16;
}

/// One sample of all monitored signals. `timestamp` is time since power-up.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SensorSnapshot {
    pub power_ok: bool,
    pub backup_power_ok: bool,
    pub pressure: f64,
    pub timestamp: Duration,
}

pub trait SensorGateway {
    fn read_power(&mut self) -> bool;
    fn read_backup_power(&mut self) -> bool;
    fn read_pressure(&mut self) -> f64;

    /// Sample everything once, in the order the loop has always used:
    /// pressure, UPS, mains.
    fn snapshot(&mut self, timestamp: Duration) -> SensorSnapshot {
        let pressure = self.read_pressure();
        let backup_power_ok = self.read_backup_power();
        let power_ok = self.read_power();
        SensorSnapshot {
            power_ok,
            backup_power_ok,
            pressure,
            timestamp,
        }
    }
}

/// Calibrated view over a [`Board`].
#[derive(Clone, Debug)]
pub struct Gateway<B> {
    board: B,
}

impl<B: Board> Gateway<B> {
    pub fn new(board: B) -> Self {
        Self { board }
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }
}

impl<B: Board> SensorGateway for Gateway<B> {
    fn read_power(&mut self) -> bool {
        power_good(self.board.pmic_system_status())
    }

    fn read_backup_power(&mut self) -> bool {
        ups_present(self.board.analog_read(AnalogPin::UpsPower))
    }

    fn read_pressure(&mut self) -> f64 {
        pressure_from_counts(self.board.analog_read(AnalogPin::PressureGauge))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBoard {
        status: u8,
        pressure_counts: u16,
        ups_counts: u16,
    }

    impl Board for FixedBoard {
        fn pmic_system_status(&mut self) -> u8 {
            self.status
        }

        fn analog_read(&mut self, pin: AnalogPin) -> u16 {
            match pin {
                AnalogPin::PressureGauge => self.pressure_counts,
                AnalogPin::UpsPower => self.ups_counts,
            }
        }
    }

    #[test]
    fn power_good_reads_only_pg_stat_bit() {
        assert!(power_good(0x04));
        assert!(power_good(0xFF));
        assert!(!power_good(0x00));
        assert!(!power_good(0xFB));
    }

    #[test]
    fn ups_threshold_is_exclusive() {
        assert!(!ups_present(1614));
        assert!(ups_present(1615));
        assert!(!ups_present(0));
    }

    #[test]
    fn pressure_transform_endpoints() {
        assert!((pressure_from_counts(0) - -631.4).abs() < 1e-9);
        let full = 6263.0 * 4095.0 / 4096.0 - 631.4;
        assert!((pressure_from_counts(4095) - full).abs() < 1e-9);
    }

    #[test]
    fn counts_for_pressure_saturates() {
        assert_eq!(counts_for_pressure(-10_000.0), 0);
        assert_eq!(counts_for_pressure(1.0e9), ADC_MAX_COUNTS);
        let c = counts_for_pressure(2000.0);
        assert!((pressure_from_counts(c) - 2000.0).abs() < 1.0);
    }

    #[test]
    fn gateway_builds_snapshot_from_board() {
        let mut gw = Gateway::new(FixedBoard {
            status: 0x04,
            pressure_counts: 2048,
            ups_counts: 3000,
        });
        let snap = gw.snapshot(Duration::from_millis(1500));
        assert!(snap.power_ok);
        assert!(snap.backup_power_ok);
        assert!((snap.pressure - (6263.0 * 0.5 - 631.4)).abs() < 1e-9);
        assert_eq!(snap.timestamp, Duration::from_millis(1500));

        gw.board_mut().status = 0;
        gw.board_mut().ups_counts = 100;
        let snap = gw.snapshot(Duration::from_secs(2));
        assert!(!snap.power_ok);
        assert!(!snap.backup_power_ok);
    }
}
