//! MAX31865 RTD-to-digital converter (Pt100 / Pt1000)

use embedded_hal::spi::{Operation, SpiDevice};

use super::Step;
use crate::error::ReadFailure;
use crate::sensor::{div_round, Reading};

const REG_CONFIG: u8 = 0x00;
const REG_RTD_MSB: u8 = 0x01;
const WRITE: u8 = 0x80;

const CFG_VBIAS: u8 = 0x80;
const CFG_ONE_SHOT: u8 = 0x20;
const CFG_3WIRE: u8 = 0x10;
const CFG_FAULT_CLEAR: u8 = 0x02;
const CFG_FILTER_50HZ: u8 = 0x01;

/// Input filter settle time after enabling the bias
const BIAS_SETTLE_MS: u64 = 10;

/// Callendar-Van Dusen coefficients scaled by 1e10
const SCALE: i128 = 10_000_000_000;
const CVD_A: i128 = 39_083_000;
const CVD_B: i128 = -5_775;

const TEMP_MIN: i32 = -2000;
const TEMP_MAX: i32 = 8500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MainsFilter {
    #[default]
    Hz50,
    Hz60,
}

impl MainsFilter {
    /// One-shot conversion time
    pub const fn conversion_ms(self) -> u64 {
        match self {
            MainsFilter::Hz50 => 65,
            MainsFilter::Hz60 => 55,
        }
    }
}

/// Probe and reference resistor setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RtdSettings {
    /// 2, 3 or 4 wire connection
    pub wires: u8,
    /// R0: 100 for Pt100, 1000 for Pt1000
    pub nominal_ohms: u16,
    pub reference_ohms: u16,
    pub filter: MainsFilter,
}

impl Default for RtdSettings {
    fn default() -> Self {
        Self {
            wires: 2,
            nominal_ohms: 1000,
            reference_ohms: 4300,
            filter: MainsFilter::Hz50,
        }
    }
}

impl RtdSettings {
    fn base_config(&self) -> u8 {
        let mut cfg = 0;
        if self.wires == 3 {
            cfg |= CFG_3WIRE;
        }
        if self.filter == MainsFilter::Hz50 {
            cfg |= CFG_FILTER_50HZ;
        }
        cfg
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Biasing { since_ms: u64 },
    Converting { since_ms: u64 },
    /// Fault bit seen on the last read; clear it before the next conversion
    Faulted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Max31865 {
    cs_pin: u8,
    phase: Phase,
}

impl Max31865 {
    pub fn new(cs_pin: u8) -> Self {
        Self {
            cs_pin,
            phase: Phase::Idle,
        }
    }

    pub fn cs_pin(&self) -> u8 {
        self.cs_pin
    }

    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
    }

    /// Write the configuration register and read it back
    pub fn probe<S: SpiDevice>(&mut self, spi: &mut S, settings: &RtdSettings) -> Result<(), ReadFailure> {
        let cfg = settings.base_config() | CFG_VBIAS;
        write_register(spi, REG_CONFIG, cfg)?;
        let mut back = [0u8; 1];
        read_registers(spi, REG_CONFIG, &mut back)?;
        if back[0] == cfg {
            Ok(())
        } else {
            Err(ReadFailure::BusFault)
        }
    }

    pub fn step<S: SpiDevice>(&mut self, spi: &mut S, now_ms: u64, settings: &RtdSettings) -> Step {
        let base = settings.base_config();
        let result = match self.phase {
            Phase::Idle => write_register(spi, REG_CONFIG, base | CFG_VBIAS)
                .map(|()| Phase::Biasing { since_ms: now_ms }),
            Phase::Faulted => write_register(spi, REG_CONFIG, base | CFG_VBIAS | CFG_FAULT_CLEAR)
                .map(|()| Phase::Biasing { since_ms: now_ms }),
            Phase::Biasing { since_ms } => {
                if now_ms.saturating_sub(since_ms) < BIAS_SETTLE_MS {
                    return Step::Pending;
                }
                write_register(spi, REG_CONFIG, base | CFG_VBIAS | CFG_ONE_SHOT)
                    .map(|()| Phase::Converting { since_ms: now_ms })
            }
            Phase::Converting { since_ms } => {
                if now_ms.saturating_sub(since_ms) < settings.filter.conversion_ms() {
                    return Step::Pending;
                }
                let mut buf = [0u8; 2];
                if let Err(e) = read_registers(spi, REG_RTD_MSB, &mut buf) {
                    self.phase = Phase::Idle;
                    return Step::Failure(e);
                }
                let raw = u16::from_be_bytes(buf);
                if raw & 0x0001 != 0 {
                    self.phase = Phase::Faulted;
                    return Step::Failure(ReadFailure::BusFault);
                }
                self.phase = Phase::Idle;
                return match temperature_tenths(raw >> 1, settings) {
                    Ok(t) => Step::Success(Reading::single(t)),
                    Err(e) => Step::Failure(e),
                };
            }
        };

        match result {
            Ok(next) => {
                self.phase = next;
                Step::Pending
            }
            Err(e) => {
                self.phase = Phase::Idle;
                Step::Failure(e)
            }
        }
    }
}

fn write_register<S: SpiDevice>(spi: &mut S, reg: u8, value: u8) -> Result<(), ReadFailure> {
    spi.write(&[WRITE | reg, value])
        .map_err(|_| ReadFailure::BusFault)
}

fn read_registers<S: SpiDevice>(spi: &mut S, reg: u8, buf: &mut [u8]) -> Result<(), ReadFailure> {
    spi.transaction(&mut [Operation::Write(&[reg]), Operation::Read(buf)])
        .map_err(|_| ReadFailure::BusFault)
}

/// Convert a 15-bit ratio code to tenths of a degree Celsius
///
/// Solves `R = R0 (1 + A t + B t^2)`; the C term for negative temperatures
/// is neglected.
pub fn temperature_tenths(raw: u16, settings: &RtdSettings) -> Result<i32, ReadFailure> {
    if raw == 0 || raw >= 0x7FFF {
        return Err(ReadFailure::OutOfRange);
    }
    if settings.nominal_ohms == 0 {
        return Err(ReadFailure::OutOfRange);
    }
    let ratio = i128::from(raw) * i128::from(settings.reference_ohms) * SCALE
        / (32768 * i128::from(settings.nominal_ohms));
    let disc = CVD_A * CVD_A + 4 * CVD_B * (ratio - SCALE);
    if disc < 0 {
        return Err(ReadFailure::OutOfRange);
    }
    let num = (isqrt(disc as u128) as i128 - CVD_A) * 10;
    let tenths = div_round(num as i64, (2 * CVD_B) as i64) as i32;
    if !(TEMP_MIN..=TEMP_MAX).contains(&tenths) {
        return Err(ReadFailure::OutOfRange);
    }
    Ok(tenths)
}

fn isqrt(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let mut x = n;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}
