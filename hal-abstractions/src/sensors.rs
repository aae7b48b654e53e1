//! Sensor bus bundle

use embedded_hal::i2c::I2c;
use embedded_hal::spi::SpiDevice;

use crate::{BusError, DhtLine, OneWireBus};

/// All sensor-facing peripherals of a board
///
/// The poll loop borrows this bundle for the duration of one tick.
pub trait SensorBuses {
    type OneWire: OneWireBus;
    type Dht: DhtLine;
    type I2c: I2c;
    type Spi<'a>: SpiDevice
    where
        Self: 'a;

    /// 1-Wire master driving all configured 1-Wire pins
    fn one_wire(&mut self) -> &mut Self::OneWire;

    /// DHT data lines
    fn dht(&mut self) -> &mut Self::Dht;

    /// Drive the BH1750 ADDR pin `pin` high, every other pin of
    /// `light_pins` low, and return the shared I2C bus
    ///
    /// The selected sensor then answers on the high address (0x5C).
    fn select_light(&mut self, pin: u8, light_pins: &[u8]) -> Result<&mut Self::I2c, BusError>;

    /// SPI device on the shared bus whose chip select is `cs_pin`
    fn rtd(&mut self, cs_pin: u8) -> Result<Self::Spi<'_>, BusError>;
}
