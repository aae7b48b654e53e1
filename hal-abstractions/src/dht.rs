//! DHT single-wire sensor line
//!
//! The DHT protocol is split in two so the poll loop never waits for the
//! host start signal: `start_signal` pulls the line low and returns,
//! `read_frame` (called once the start window elapsed) releases the line
//! and captures the 40-bit answer.

use crate::BusError;

/// DHT data lines, one sensor per pin
pub trait DhtLine {
    /// Pull the data line low to request a measurement
    fn start_signal(&mut self, pin: u8) -> Result<(), BusError>;

    /// Release the line and capture the 5-byte frame
    ///
    /// Returns the raw bytes without checksum validation.
    fn read_frame(&mut self, pin: u8) -> Result<[u8; 5], BusError>;
}

impl<T: DhtLine + ?Sized> DhtLine for &mut T {
    fn start_signal(&mut self, pin: u8) -> Result<(), BusError> {
        T::start_signal(self, pin)
    }

    fn read_frame(&mut self, pin: u8) -> Result<[u8; 5], BusError> {
        T::read_frame(self, pin)
    }
}
