//! DS2438 smart battery monitor (temperature, voltage, current)

use hal_abstractions::OneWireBus;

use super::onewire::select;
use super::Step;
use crate::crc::crc8;
use crate::error::ReadFailure;
use crate::sensor::{div_round, Reading, Rom};

const CONVERT_T: u8 = 0x44;
const CONVERT_V: u8 = 0xB4;
const RECALL_MEMORY: u8 = 0xB8;
const READ_SCRATCHPAD: u8 = 0xBE;
const PAGE_0: u8 = 0x00;

const CONVERT_T_MS: u64 = 10;
const CONVERT_V_MS: u64 = 10;

/// Current register LSB is 1 / (4096 * Rsens) A with Rsens = 0.05 ohm,
/// i.e. 100 / 204.8 hundredths of an ampere
const CURRENT_NUM: i64 = 500;
const CURRENT_DEN: i64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    ConvertingT { since_ms: u64 },
    ConvertingV { since_ms: u64 },
    Recalled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ds2438 {
    pin: u8,
    rom: Rom,
    phase: Phase,
}

impl Ds2438 {
    pub fn new(pin: u8, rom: Rom) -> Self {
        Self {
            pin,
            rom,
            phase: Phase::Idle,
        }
    }

    pub fn probe<B: OneWireBus + ?Sized>(&mut self, bus: &mut B) -> Result<(), ReadFailure> {
        select(bus, self.pin, &self.rom)
    }

    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
    }

    /// Temperature, voltage and current in one multi-step sequence
    pub fn step<B: OneWireBus + ?Sized>(&mut self, bus: &mut B, now_ms: u64) -> Step {
        let result = match self.phase {
            Phase::Idle => self
                .command(bus, &[CONVERT_T])
                .map(|()| Phase::ConvertingT { since_ms: now_ms }),
            Phase::ConvertingT { since_ms } => {
                if now_ms.saturating_sub(since_ms) < CONVERT_T_MS {
                    return Step::Pending;
                }
                self.command(bus, &[CONVERT_V])
                    .map(|()| Phase::ConvertingV { since_ms: now_ms })
            }
            Phase::ConvertingV { since_ms } => {
                if now_ms.saturating_sub(since_ms) < CONVERT_V_MS {
                    return Step::Pending;
                }
                self.command(bus, &[RECALL_MEMORY, PAGE_0]).map(|()| Phase::Recalled)
            }
            Phase::Recalled => {
                self.phase = Phase::Idle;
                return match self.read_page(bus) {
                    Ok(page) => match decode_page(&page) {
                        Ok(reading) => Step::Success(reading),
                        Err(e) => Step::Failure(e),
                    },
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

    fn command<B: OneWireBus + ?Sized>(&mut self, bus: &mut B, bytes: &[u8]) -> Result<(), ReadFailure> {
        select(bus, self.pin, &self.rom)?;
        bus.write_bytes(self.pin, bytes)?;
        Ok(())
    }

    fn read_page<B: OneWireBus + ?Sized>(&mut self, bus: &mut B) -> Result<[u8; 9], ReadFailure> {
        self.command(bus, &[READ_SCRATCHPAD, PAGE_0])?;
        let mut page = [0u8; 9];
        bus.read_bytes(self.pin, &mut page)?;
        Ok(page)
    }
}

/// Decode page 0 into `[temp tenths degC, volt hundredths V, curr hundredths A]`
pub fn decode_page(page: &[u8; 9]) -> Result<Reading, ReadFailure> {
    if page.iter().all(|&b| b == 0x00) || page.iter().all(|&b| b == 0xFF) {
        return Err(ReadFailure::BusFault);
    }
    if crc8(&page[..8]) != page[8] {
        return Err(ReadFailure::Crc);
    }

    // 13-bit two's complement, 1/32 degC
    let t32 = i64::from(i16::from_le_bytes([page[1], page[2]]) >> 3);
    if !(-55 * 32..=125 * 32).contains(&t32) {
        return Err(ReadFailure::OutOfRange);
    }
    let temp = div_round(t32 * 10, 32) as i32;

    // 10 mV LSB
    let volt = i32::from(u16::from_le_bytes([page[3], page[4]]) & 0x03FF);

    let raw_current = i64::from(i16::from_le_bytes([page[5], page[6]]));
    let curr = div_round(raw_current * CURRENT_NUM, CURRENT_DEN) as i32;

    Ok(Reading::new(&[temp, volt, curr]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ds2438_page, MockDevice, MockOneWire};

    #[test]
    fn test_decode_page() {
        // 25.40625 degC, 1.23 V, 25 LSB current
        let page = ds2438_page(813 << 3, 123, 25);
        assert_eq!(decode_page(&page), Ok(Reading::new(&[254, 123, 12])));
    }

    #[test]
    fn test_decode_negative_current_and_temperature() {
        // -10.5 degC, 0 V, -205 LSB (about -1.00 A)
        let page = ds2438_page(-336 << 3, 0, -205);
        assert_eq!(decode_page(&page), Ok(Reading::new(&[-105, 0, -100])));
    }

    #[test]
    fn test_decode_rejects_bad_crc() {
        let mut page = ds2438_page(813 << 3, 123, 25);
        page[8] ^= 0x55;
        assert_eq!(decode_page(&page), Err(ReadFailure::Crc));
    }

    #[test]
    fn test_full_sequence_is_four_steps() {
        let rom = Rom::from_parts(0x26, [9, 8, 7, 6, 5, 4]);
        let mut bus = MockOneWire::new(5);
        bus.attach(MockDevice::new(rom).with_scratchpad(ds2438_page(813 << 3, 123, 25)));

        let mut d = Ds2438::new(5, rom);
        assert_eq!(d.step(&mut bus, 0), Step::Pending);
        assert_eq!(d.step(&mut bus, 5), Step::Pending);
        assert_eq!(d.step(&mut bus, 10), Step::Pending);
        assert_eq!(d.step(&mut bus, 20), Step::Pending);
        assert_eq!(d.step(&mut bus, 21), Step::Success(Reading::new(&[254, 123, 12])));
        assert_eq!(bus.device(&rom).map(|dev| dev.conversions), Some(2));
    }
}
