//! BH1750 ambient light sensor
//!
//! Several sensors share one I2C bus. The sensor whose ADDR pin is driven
//! high answers on [`ADDRESS`]; every other one is moved to 0x23.

use embedded_hal::i2c::I2c;

use super::Step;
use crate::error::ReadFailure;
use crate::sensor::{div_round, Reading};

/// Address of the selected sensor (ADDR high)
pub const ADDRESS: u8 = 0x5C;

const POWER_ON: u8 = 0x01;

/// Continuous measurement mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LightMode {
    /// 4 lx resolution
    Low,
    /// 1 lx resolution
    High,
    /// 0.5 lx resolution
    #[default]
    High2,
}

impl LightMode {
    pub const fn command(self) -> u8 {
        match self {
            LightMode::High => 0x10,
            LightMode::High2 => 0x11,
            LightMode::Low => 0x13,
        }
    }

    /// Maximum measurement time plus 50 % margin
    pub const fn measurement_ms(self) -> u64 {
        match self {
            LightMode::High | LightMode::High2 => 180,
            LightMode::Low => 24,
        }
    }

    /// Raw count to tenths of a lux (raw / 1.2, or raw / 2.4 in HIGH2)
    pub fn tenths(self, raw: u16) -> i32 {
        let den = match self {
            LightMode::High2 => 24,
            LightMode::High | LightMode::Low => 12,
        };
        div_round(i64::from(raw) * 100, den) as i32
    }

    pub fn to_u8(self) -> u8 {
        self.command()
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x10 => Some(LightMode::High),
            0x11 => Some(LightMode::High2),
            0x13 => Some(LightMode::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Measuring { since_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bh1750 {
    pin: u8,
    phase: Phase,
}

impl Bh1750 {
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            phase: Phase::Idle,
        }
    }

    /// ADDR select pin
    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
    }

    /// A sensor is present when it acknowledges the power-on command
    pub fn probe<I: I2c>(&mut self, i2c: &mut I) -> Result<(), ReadFailure> {
        i2c.write(ADDRESS, &[POWER_ON])
            .map_err(|_| ReadFailure::BusFault)
    }

    pub fn step<I: I2c>(&mut self, i2c: &mut I, now_ms: u64, mode: LightMode) -> Step {
        match self.phase {
            Phase::Idle => match i2c.write(ADDRESS, &[mode.command()]) {
                Ok(()) => {
                    self.phase = Phase::Measuring { since_ms: now_ms };
                    Step::Pending
                }
                Err(_) => Step::Failure(ReadFailure::BusFault),
            },
            Phase::Measuring { since_ms } => {
                if now_ms.saturating_sub(since_ms) < mode.measurement_ms() {
                    return Step::Pending;
                }
                self.phase = Phase::Idle;
                let mut buf = [0u8; 2];
                match i2c.read(ADDRESS, &mut buf) {
                    Ok(()) => Step::Success(Reading::single(mode.tenths(u16::from_be_bytes(buf)))),
                    Err(_) => Step::Failure(ReadFailure::BusFault),
                }
            }
        }
    }
}
