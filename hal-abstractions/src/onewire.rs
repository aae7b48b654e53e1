//! 1-Wire bus access
//!
//! Boards implement the three timing-critical primitives (`reset`,
//! `write_bit`, `read_bit`); byte transfers and the ROM-search triplet have
//! default implementations built on top of them. Bus masters with hardware
//! support (e.g. DS2482) can override the defaults.

use crate::BusError;

/// Result of one ROM-search bit position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Triplet {
    /// AND of the id bit of all participating devices
    pub id_bit: bool,
    /// AND of the complemented id bit of all participating devices
    pub complement: bool,
    /// Direction written back to the bus
    pub direction: bool,
}

/// A set of 1-Wire buses, one per configured pin
pub trait OneWireBus {
    /// Issue a reset pulse; returns `true` when at least one device
    /// answered with a presence pulse
    fn reset(&mut self, pin: u8) -> Result<bool, BusError>;

    /// Write a single time slot
    fn write_bit(&mut self, pin: u8, bit: bool) -> Result<(), BusError>;

    /// Read a single time slot
    fn read_bit(&mut self, pin: u8) -> Result<bool, BusError>;

    /// Write one byte, LSB first
    fn write_byte(&mut self, pin: u8, byte: u8) -> Result<(), BusError> {
        for i in 0..8 {
            self.write_bit(pin, (byte >> i) & 0x01 == 0x01)?;
        }
        Ok(())
    }

    /// Read one byte, LSB first
    fn read_byte(&mut self, pin: u8) -> Result<u8, BusError> {
        let mut byte = 0u8;
        for i in 0..8 {
            if self.read_bit(pin)? {
                byte |= 1 << i;
            }
        }
        Ok(byte)
    }

    fn write_bytes(&mut self, pin: u8, bytes: &[u8]) -> Result<(), BusError> {
        for &b in bytes {
            self.write_byte(pin, b)?;
        }
        Ok(())
    }

    fn read_bytes(&mut self, pin: u8, buf: &mut [u8]) -> Result<(), BusError> {
        for b in buf.iter_mut() {
            *b = self.read_byte(pin)?;
        }
        Ok(())
    }

    /// One step of the ROM search: read id bit and complement, then write
    /// the chosen direction
    ///
    /// When both reads return `1` no device is participating and nothing
    /// is written.
    fn triplet(&mut self, pin: u8, direction: bool) -> Result<Triplet, BusError> {
        let id_bit = self.read_bit(pin)?;
        let complement = self.read_bit(pin)?;
        if id_bit && complement {
            return Ok(Triplet {
                id_bit,
                complement,
                direction: true,
            });
        }
        let direction = if id_bit != complement { id_bit } else { direction };
        self.write_bit(pin, direction)?;
        Ok(Triplet {
            id_bit,
            complement,
            direction,
        })
    }
}

impl<T: OneWireBus + ?Sized> OneWireBus for &mut T {
    fn reset(&mut self, pin: u8) -> Result<bool, BusError> {
        T::reset(self, pin)
    }

    fn write_bit(&mut self, pin: u8, bit: bool) -> Result<(), BusError> {
        T::write_bit(self, pin, bit)
    }

    fn read_bit(&mut self, pin: u8) -> Result<bool, BusError> {
        T::read_bit(self, pin)
    }

    fn write_byte(&mut self, pin: u8, byte: u8) -> Result<(), BusError> {
        T::write_byte(self, pin, byte)
    }

    fn read_byte(&mut self, pin: u8) -> Result<u8, BusError> {
        T::read_byte(self, pin)
    }

    fn triplet(&mut self, pin: u8, direction: bool) -> Result<Triplet, BusError> {
        T::triplet(self, pin, direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records written slots and replays a fixed read pattern
    struct Loopback {
        written: [bool; 16],
        written_len: usize,
        reads: [bool; 16],
        read_pos: usize,
    }

    impl Loopback {
        fn new(reads: [bool; 16]) -> Self {
            Self {
                written: [false; 16],
                written_len: 0,
                reads,
                read_pos: 0,
            }
        }
    }

    impl OneWireBus for Loopback {
        fn reset(&mut self, _pin: u8) -> Result<bool, BusError> {
            Ok(true)
        }

        fn write_bit(&mut self, _pin: u8, bit: bool) -> Result<(), BusError> {
            self.written[self.written_len] = bit;
            self.written_len += 1;
            Ok(())
        }

        fn read_bit(&mut self, _pin: u8) -> Result<bool, BusError> {
            let bit = self.reads[self.read_pos];
            self.read_pos += 1;
            Ok(bit)
        }
    }

    #[test]
    fn test_write_byte_is_lsb_first() {
        let mut bus = Loopback::new([false; 16]);
        bus.write_byte(0, 0x01).unwrap();
        assert!(bus.written[0]);
        assert!(bus.written[1..8].iter().all(|b| !b));
    }

    #[test]
    fn test_read_byte_is_lsb_first() {
        let mut reads = [false; 16];
        reads[0] = true;
        reads[7] = true;
        let mut bus = Loopback::new(reads);
        assert_eq!(bus.read_byte(0).unwrap(), 0x81);
    }

    #[test]
    fn test_triplet_follows_unanimous_bit() {
        let mut reads = [false; 16];
        reads[0] = true; // id bit 1, complement 0
        let mut bus = Loopback::new(reads);
        let t = bus.triplet(0, false).unwrap();
        assert!(t.direction);
        assert_eq!(bus.written_len, 1);
        assert!(bus.written[0]);
    }

    #[test]
    fn test_triplet_uses_requested_direction_on_discrepancy() {
        let mut bus = Loopback::new([false; 16]);
        let t = bus.triplet(0, true).unwrap();
        assert!(!t.id_bit && !t.complement);
        assert!(t.direction);
    }

    #[test]
    fn test_triplet_without_devices_writes_nothing() {
        let mut bus = Loopback::new([true; 16]);
        let t = bus.triplet(0, false).unwrap();
        assert!(t.id_bit && t.complement);
        assert_eq!(bus.written_len, 0);
    }
}
