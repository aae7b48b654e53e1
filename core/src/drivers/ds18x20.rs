//! DS18S20 / DS1822 / DS18B20 / DS1825 / DS28EA00 temperature sensors

use hal_abstractions::OneWireBus;

use super::onewire::select;
use super::Step;
use crate::crc::crc8;
use crate::error::ReadFailure;
use crate::sensor::{div_round, Reading, Rom};

const CONVERT_T: u8 = 0x44;
const READ_SCRATCHPAD: u8 = 0xBE;
const WRITE_SCRATCHPAD: u8 = 0x4E;

const FAMILY_DS18S20: u8 = 0x10;

/// Alarm registers written together with the configuration byte
const ALARM_HIGH: u8 = 0x4B;
const ALARM_LOW: u8 = 0x46;

/// Power-on register content (85.0 degC) in sixteenths / half degrees
const POWER_ON_RAW: i16 = 0x0550;
const POWER_ON_RAW_DS18S20: i16 = 0x00AA;

const MIN_SIXTEENTHS: i32 = -55 * 16;
const MAX_SIXTEENTHS: i32 = 125 * 16;

/// Worst-case conversion time for a resolution in bits
pub const fn conversion_ms(resolution: u8) -> u64 {
    match resolution {
        9 => 94,
        10 => 188,
        11 => 375,
        _ => 750,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Converting { since_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ds18x20 {
    pin: u8,
    rom: Rom,
    phase: Phase,
}

impl Ds18x20 {
    pub fn new(pin: u8, rom: Rom) -> Self {
        Self {
            pin,
            rom,
            phase: Phase::Idle,
        }
    }

    fn conversion_ms(&self, resolution: u8) -> u64 {
        if self.rom.family() == FAMILY_DS18S20 {
            conversion_ms(12)
        } else {
            conversion_ms(resolution)
        }
    }

    /// Presence check and resolution setup
    pub fn probe<B: OneWireBus + ?Sized>(&mut self, bus: &mut B, resolution: u8) -> Result<(), ReadFailure> {
        select(bus, self.pin, &self.rom)?;
        if self.rom.family() != FAMILY_DS18S20 {
            let config = ((resolution.clamp(9, 12) - 9) << 5) | 0x1F;
            bus.write_byte(self.pin, WRITE_SCRATCHPAD)?;
            bus.write_bytes(self.pin, &[ALARM_HIGH, ALARM_LOW, config])?;
        }
        Ok(())
    }

    pub fn step<B: OneWireBus + ?Sized>(&mut self, bus: &mut B, now_ms: u64, resolution: u8) -> Step {
        match self.phase {
            Phase::Idle => {
                let started = select(bus, self.pin, &self.rom)
                    .and_then(|()| bus.write_byte(self.pin, CONVERT_T).map_err(ReadFailure::from));
                match started {
                    Ok(()) => {
                        self.phase = Phase::Converting { since_ms: now_ms };
                        Step::Pending
                    }
                    Err(e) => Step::Failure(e),
                }
            }
            Phase::Converting { since_ms } => {
                if now_ms.saturating_sub(since_ms) < self.conversion_ms(resolution) {
                    return Step::Pending;
                }
                self.phase = Phase::Idle;
                match self.read(bus, resolution) {
                    Ok(tenths) => Step::Success(Reading::single(tenths)),
                    Err(e) => Step::Failure(e),
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
    }

    fn read<B: OneWireBus + ?Sized>(&mut self, bus: &mut B, resolution: u8) -> Result<i32, ReadFailure> {
        select(bus, self.pin, &self.rom)?;
        bus.write_byte(self.pin, READ_SCRATCHPAD)?;
        let mut scratchpad = [0u8; 9];
        bus.read_bytes(self.pin, &mut scratchpad)?;
        decode_scratchpad(self.rom.family(), &scratchpad, resolution)
    }
}

/// Decode a scratchpad into tenths of a degree Celsius
pub fn decode_scratchpad(family: u8, sp: &[u8; 9], resolution: u8) -> Result<i32, ReadFailure> {
    // floating line reads all ones, shorted line all zeros
    if sp.iter().all(|&b| b == 0x00) || sp.iter().all(|&b| b == 0xFF) {
        return Err(ReadFailure::BusFault);
    }
    if crc8(&sp[..8]) != sp[8] {
        return Err(ReadFailure::Crc);
    }

    let raw = i16::from_le_bytes([sp[0], sp[1]]);
    let sixteenths = if family == FAMILY_DS18S20 {
        if raw == POWER_ON_RAW_DS18S20 {
            return Err(ReadFailure::OutOfRange);
        }
        let count_remain = i32::from(sp[6]);
        let count_per_c = i32::from(sp[7]);
        if count_per_c == 0 {
            return Err(ReadFailure::Crc);
        }
        // T = (raw >> 1) - 0.25 + (COUNT_PER_C - COUNT_REMAIN) / COUNT_PER_C
        (i32::from(raw >> 1) * 16) - 4 + ((count_per_c - count_remain) * 16) / count_per_c
    } else {
        if raw == POWER_ON_RAW {
            return Err(ReadFailure::OutOfRange);
        }
        // undefined low bits at reduced resolution
        let mask: i16 = match resolution {
            9 => !0x07,
            10 => !0x03,
            11 => !0x01,
            _ => !0x00,
        };
        i32::from(raw & mask)
    };

    if !(MIN_SIXTEENTHS..=MAX_SIXTEENTHS).contains(&sixteenths) {
        return Err(ReadFailure::OutOfRange);
    }
    Ok(div_round(i64::from(sixteenths) * 10, 16) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ds18b20_scratchpad, scratchpad, MockDevice, MockOneWire};

    #[test]
    fn test_decode_ds18b20() {
        // 25.0625 degC
        assert_eq!(decode_scratchpad(0x28, &ds18b20_scratchpad(0x0191), 12), Ok(251));
        // -10.125 degC
        assert_eq!(decode_scratchpad(0x28, &ds18b20_scratchpad(-162), 12), Ok(-101));
        // 9 bit drops the low three bits
        assert_eq!(decode_scratchpad(0x28, &ds18b20_scratchpad(0x0191), 9), Ok(250));
    }

    #[test]
    fn test_decode_ds18s20_extended_resolution() {
        // 25.0 degC: raw 0x32, COUNT_REMAIN 12, COUNT_PER_C 16
        let sp = scratchpad([0x32, 0x00, 0x4B, 0x46, 0xFF, 0xFF, 0x0C, 0x10]);
        assert_eq!(decode_scratchpad(0x10, &sp, 12), Ok(250));
    }

    #[test]
    fn test_power_on_value_is_rejected() {
        assert_eq!(
            decode_scratchpad(0x28, &ds18b20_scratchpad(POWER_ON_RAW), 12),
            Err(ReadFailure::OutOfRange)
        );
    }

    #[test]
    fn test_out_of_range() {
        // 130 degC
        assert_eq!(
            decode_scratchpad(0x28, &ds18b20_scratchpad(130 * 16), 12),
            Err(ReadFailure::OutOfRange)
        );
    }

    #[test]
    fn test_crc_and_line_faults() {
        let mut sp = ds18b20_scratchpad(0x0191);
        sp[0] ^= 0x01;
        assert_eq!(decode_scratchpad(0x28, &sp, 12), Err(ReadFailure::Crc));
        assert_eq!(decode_scratchpad(0x28, &[0; 9], 12), Err(ReadFailure::BusFault));
        assert_eq!(decode_scratchpad(0x28, &[0xFF; 9], 12), Err(ReadFailure::BusFault));
    }

    #[test]
    fn test_step_waits_for_conversion() {
        let rom = Rom::from_parts(0x28, [1, 2, 3, 4, 5, 6]);
        let mut bus = MockOneWire::new(5);
        bus.attach(MockDevice::new(rom).with_scratchpad(ds18b20_scratchpad(0x0191)));

        let mut d = Ds18x20::new(5, rom);
        assert_eq!(d.step(&mut bus, 0, 12), Step::Pending);
        assert_eq!(bus.device(&rom).map(|dev| dev.conversions), Some(1));
        assert_eq!(d.step(&mut bus, 749, 12), Step::Pending);
        assert_eq!(d.step(&mut bus, 750, 12), Step::Success(Reading::single(251)));
    }

    #[test]
    fn test_probe_writes_resolution() {
        let rom = Rom::from_parts(0x28, [1, 2, 3, 4, 5, 6]);
        let mut bus = MockOneWire::new(5);
        bus.attach(MockDevice::new(rom));
        let mut d = Ds18x20::new(5, rom);
        assert_eq!(d.probe(&mut bus, 10), Ok(()));
        assert_eq!(bus.device(&rom).map(|dev| dev.scratchpad[4]), Some(0x3F));
    }

    #[test]
    fn test_missing_device_fails_without_waiting() {
        let rom = Rom::from_parts(0x28, [1, 2, 3, 4, 5, 6]);
        let mut bus = MockOneWire::new(5);
        let mut d = Ds18x20::new(5, rom);
        assert_eq!(d.step(&mut bus, 0, 12), Step::Failure(ReadFailure::BusFault));
    }
}
