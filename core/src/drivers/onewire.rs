//! 1-Wire ROM commands, device selection and ROM search

use hal_abstractions::OneWireBus;

use crate::error::ReadFailure;
use crate::sensor::{Rom, SensorKind};

pub const SEARCH_ROM: u8 = 0xF0;
pub const MATCH_ROM: u8 = 0x55;
pub const SKIP_ROM: u8 = 0xCC;

/// Reset the bus and address a single device
pub fn select<B: OneWireBus + ?Sized>(bus: &mut B, pin: u8, rom: &Rom) -> Result<(), ReadFailure> {
    if !bus.reset(pin)? {
        return Err(ReadFailure::BusFault);
    }
    bus.write_byte(pin, MATCH_ROM)?;
    bus.write_bytes(pin, &rom.0)?;
    Ok(())
}

/// Map a family code to a supported sensor kind
pub const fn classify(family: u8) -> Option<SensorKind> {
    match family {
        // DS18S20, DS1822, DS18B20, DS1825, DS28EA00
        0x10 | 0x22 | 0x28 | 0x3B | 0x42 => Some(SensorKind::OneWireTemp),
        // DS2438
        0x26 => Some(SensorKind::OneWireMulti),
        _ => None,
    }
}

/// Incremental binary-tree ROM search (Maxim AN187)
///
/// Every call to [`RomSearch::next`] runs one complete search pass and
/// yields at most one ROM, so a scan can be spread across ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomSearch {
    rom: [u8; 8],
    last_discrepancy: u8,
    done: bool,
}

impl Default for RomSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl RomSearch {
    pub const fn new() -> Self {
        Self {
            rom: [0; 8],
            last_discrepancy: 0,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Find the next device; `Ok(None)` once every device was returned
    ///
    /// A CRC error or a bus fault ends the search.
    pub fn next<B: OneWireBus + ?Sized>(
        &mut self,
        bus: &mut B,
        pin: u8,
    ) -> Result<Option<Rom>, ReadFailure> {
        if self.done {
            return Ok(None);
        }
        let result = self.pass(bus, pin);
        if result.is_err() {
            self.done = true;
        }
        result
    }

    fn pass<B: OneWireBus + ?Sized>(&mut self, bus: &mut B, pin: u8) -> Result<Option<Rom>, ReadFailure> {
        if !bus.reset(pin)? {
            self.done = true;
            return Ok(None);
        }
        bus.write_byte(pin, SEARCH_ROM)?;

        let mut last_zero = 0u8;
        for bit_number in 1..=64u8 {
            let byte = usize::from((bit_number - 1) / 8);
            let mask = 1u8 << ((bit_number - 1) % 8);
            let direction = if bit_number < self.last_discrepancy {
                self.rom[byte] & mask != 0
            } else {
                bit_number == self.last_discrepancy
            };

            let t = bus.triplet(pin, direction)?;
            if t.id_bit && t.complement {
                // presence pulse but nobody answered the search
                return Err(ReadFailure::BusFault);
            }
            if !t.id_bit && !t.complement && !t.direction {
                last_zero = bit_number;
            }
            if t.direction {
                self.rom[byte] |= mask;
            } else {
                self.rom[byte] &= !mask;
            }
        }

        self.last_discrepancy = last_zero;
        if last_zero == 0 {
            self.done = true;
        }

        let rom = Rom(self.rom);
        if rom.family() == 0 || !rom.crc_valid() {
            return Err(ReadFailure::Crc);
        }
        Ok(Some(rom))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDevice, MockOneWire};

    fn rom(family: u8, serial: u8) -> Rom {
        Rom::from_parts(family, [serial, 0x10, 0x20, 0x30, 0x40, 0x50])
    }

    #[test]
    fn test_search_finds_every_device_once() {
        let mut bus = MockOneWire::new(5);
        let roms = [rom(0x28, 0x01), rom(0x28, 0x02), rom(0x26, 0x81), rom(0x01, 0x44)];
        for r in roms {
            bus.attach(MockDevice::new(r));
        }

        let mut search = RomSearch::new();
        let mut found = std::vec::Vec::new();
        while let Some(r) = search.next(&mut bus, 5).unwrap() {
            found.push(r);
        }
        assert!(search.is_done());
        assert_eq!(found.len(), roms.len());
        for r in roms {
            assert!(found.contains(&r));
        }
    }

    #[test]
    fn test_search_on_empty_bus() {
        let mut bus = MockOneWire::new(5);
        let mut search = RomSearch::new();
        assert_eq!(search.next(&mut bus, 5), Ok(None));
        assert!(search.is_done());
    }

    #[test]
    fn test_search_rejects_bad_crc() {
        let mut bus = MockOneWire::new(5);
        let mut bad = rom(0x28, 0x01);
        bad.0[7] ^= 0xFF;
        bus.attach(MockDevice::new(bad));
        let mut search = RomSearch::new();
        assert_eq!(search.next(&mut bus, 5), Err(ReadFailure::Crc));
        assert_eq!(search.next(&mut bus, 5), Ok(None));
    }

    #[test]
    fn test_select_requires_presence() {
        let mut bus = MockOneWire::new(5);
        assert_eq!(select(&mut bus, 5, &rom(0x28, 1)), Err(ReadFailure::BusFault));
        assert_eq!(select(&mut bus, 6, &rom(0x28, 1)), Err(ReadFailure::BusFault));
    }

    #[test]
    fn test_family_classification() {
        assert_eq!(classify(0x28), Some(SensorKind::OneWireTemp));
        assert_eq!(classify(0x10), Some(SensorKind::OneWireTemp));
        assert_eq!(classify(0x26), Some(SensorKind::OneWireMulti));
        assert_eq!(classify(0x01), None);
    }
}
