use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::{counts_for_pressure, AnalogPin, Board, ADC_MAX_COUNTS, PMIC_POWER_GOOD_MASK};

const ADC_REF_VOLTS: f64 = 3.3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BoardFault {
    None,
    MainsOutage,
    UpsOutage,
    /// Pressure rises (or falls) linearly in mbar per second.
    PressureRamp { per_s: f64 },
    /// The pressure ADC channel returns a fixed count.
    StuckAdc { counts: u16 },
}

/// A simulated detector board: PMIC, UPS sense line and pressure gauge.
#[derive(Clone, Debug)]
pub struct SimBoard {
    pub mains: bool,
    pub ups_volts: f64,
    pub pressure_mbar: f64,
    /// Standard deviation of ADC noise, in counts.
    pub noise_counts: f64,
    pub fault: BoardFault,
    rng: StdRng,
}

impl SimBoard {
    pub fn new(seed: u64) -> Self {
        Self {
            mains: true,
            ups_volts: 2.6,
            pressure_mbar: 2000.0,
            noise_counts: 1.5,
            fault: BoardFault::None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Advance the physical state by `dt_s` seconds.
    pub fn step(&mut self, dt_s: f64) {
        if let BoardFault::PressureRamp { per_s } = self.fault {
            self.pressure_mbar += per_s * dt_s;
        }
    }

    fn noisy(&mut self, counts: f64) -> u16 {
        let mut v = counts;
        if self.noise_counts > 0.0 {
            if let Ok(normal) = Normal::new(0.0, self.noise_counts) {
                v += normal.sample(&mut self.rng);
            }
        }
        v.round().clamp(0.0, f64::from(ADC_MAX_COUNTS)) as u16
    }
}

impl Board for SimBoard {
    fn pmic_system_status(&mut self) -> u8 {
        let mains = self.mains && self.fault != BoardFault::MainsOutage;
        if mains {
            PMIC_POWER_GOOD_MASK
        } else {
            0
        }
    }

    fn analog_read(&mut self, pin: AnalogPin) -> u16 {
        match pin {
            AnalogPin::UpsPower => {
                let volts = if self.fault == BoardFault::UpsOutage {
                    0.0
                } else {
                    self.ups_volts
                };
                self.noisy(volts / ADC_REF_VOLTS * 4096.0)
            }
            AnalogPin::PressureGauge => match self.fault {
                BoardFault::StuckAdc { counts } => counts,
                _ => {
                    let counts = f64::from(counts_for_pressure(self.pressure_mbar));
                    self.noisy(counts)
                }
            },
        }
    }
}
