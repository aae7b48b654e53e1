//! Sensor buses of the Feather board
//!
//! Logical pin numbers from the configuration map onto a small pool of
//! `Flex` GPIOs. 1-Wire and DHT are bit-banged on these pins with
//! interrupts masked for each timing-critical slot; BH1750s share I2C1 and
//! are selected through their ADDR line; MAX31865s share SPI1 with one
//! pool pin each as chip select.

use core::cell::RefCell;

use defmt::warn;
use embassy_embedded_hal::shared_bus::blocking::spi::SpiDevice;
use embassy_stm32::gpio::{Flex, Speed};
use embassy_stm32::i2c::{I2c, Master};
use embassy_stm32::mode::Blocking;
use embassy_stm32::spi::Spi;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{block_for, Duration, Instant};
use hal_abstractions::{BusError, DhtLine, OneWireBus, SensorBuses};
use heapless::Vec;

const POOL_SIZE: usize = 8;

type RtdBus = Mutex<NoopRawMutex, RefCell<Spi<'static, Blocking>>>;

fn delay_us(us: u64) {
    block_for(Duration::from_micros(us));
}

/// GPIOs addressable by logical pin number
pub struct GpioPool {
    pins: Vec<(u8, Flex<'static>), POOL_SIZE>,
}

impl GpioPool {
    pub fn new() -> Self {
        Self { pins: Vec::new() }
    }

    pub fn add(&mut self, pin: u8, line: Flex<'static>) {
        if self.pins.push((pin, line)).is_err() {
            warn!("GPIO pool full, pin {} not mapped", pin);
        }
    }

    fn get(&mut self, pin: u8) -> Result<&mut Flex<'static>, BusError> {
        self.pins
            .iter_mut()
            .find(|(p, _)| *p == pin)
            .map(|(_, line)| line)
            .ok_or(BusError::UnknownPin)
    }
}

/// Busy-wait until the line reaches `high`; returns the elapsed microseconds
fn wait_level(line: &Flex<'static>, high: bool, timeout_us: u64) -> Result<u64, BusError> {
    let start = Instant::now();
    loop {
        if line.is_high() == high {
            return Ok(start.elapsed().as_micros());
        }
        if start.elapsed().as_micros() > timeout_us {
            return Err(BusError::Timeout);
        }
    }
}

// Standard-speed 1-Wire slots, open-drain with an external pull-up
impl OneWireBus for GpioPool {
    fn reset(&mut self, pin: u8) -> Result<bool, BusError> {
        let line = self.get(pin)?;
        line.set_high();
        line.set_as_input_output(Speed::VeryHigh);
        if line.is_low() {
            return Err(BusError::LineStuck);
        }
        line.set_low();
        delay_us(480);
        let present = critical_section::with(|_| {
            line.set_high();
            delay_us(70);
            line.is_low()
        });
        delay_us(410);
        Ok(present)
    }

    fn write_bit(&mut self, pin: u8, bit: bool) -> Result<(), BusError> {
        let line = self.get(pin)?;
        critical_section::with(|_| {
            line.set_low();
            if bit {
                delay_us(6);
                line.set_high();
                delay_us(64);
            } else {
                delay_us(60);
                line.set_high();
                delay_us(10);
            }
        });
        Ok(())
    }

    fn read_bit(&mut self, pin: u8) -> Result<bool, BusError> {
        let line = self.get(pin)?;
        let bit = critical_section::with(|_| {
            line.set_low();
            delay_us(6);
            line.set_high();
            delay_us(9);
            let bit = line.is_high();
            delay_us(55);
            bit
        });
        Ok(bit)
    }
}

impl DhtLine for GpioPool {
    fn start_signal(&mut self, pin: u8) -> Result<(), BusError> {
        let line = self.get(pin)?;
        line.set_high();
        line.set_as_input_output(Speed::Low);
        line.set_low();
        Ok(())
    }

    /// Bits are told apart by the length of the high pulse: ~27 us for 0,
    /// ~70 us for 1
    fn read_frame(&mut self, pin: u8) -> Result<[u8; 5], BusError> {
        let line = self.get(pin)?;
        critical_section::with(|_| {
            line.set_high();
            // response: low 80 us, high 80 us
            wait_level(line, false, 100)?;
            wait_level(line, true, 100)?;
            wait_level(line, false, 100)?;

            let mut frame = [0u8; 5];
            for bit in 0..40 {
                wait_level(line, true, 80)?;
                let high_us = wait_level(line, false, 100)?;
                if high_us > 40 {
                    frame[bit / 8] |= 0x80 >> (bit % 8);
                }
            }
            Ok(frame)
        })
    }
}

pub struct BoardBuses {
    gpio: GpioPool,
    i2c: I2c<'static, Blocking, Master>,
    rtd_spi: RtdBus,
}

impl BoardBuses {
    pub fn new(gpio: GpioPool, i2c: I2c<'static, Blocking, Master>, rtd_spi: Spi<'static, Blocking>) -> Self {
        Self {
            gpio,
            i2c,
            rtd_spi: Mutex::new(RefCell::new(rtd_spi)),
        }
    }
}

impl SensorBuses for BoardBuses {
    type OneWire = GpioPool;
    type Dht = GpioPool;
    type I2c = I2c<'static, Blocking, Master>;
    type Spi<'a> = SpiDevice<'a, NoopRawMutex, Spi<'static, Blocking>, &'a mut Flex<'static>>;

    fn one_wire(&mut self) -> &mut GpioPool {
        &mut self.gpio
    }

    fn dht(&mut self) -> &mut GpioPool {
        &mut self.gpio
    }

    /// Pull the ADDR line of `pin` high (address 0x5C), all others low
    fn select_light(&mut self, pin: u8, light_pins: &[u8]) -> Result<&mut Self::I2c, BusError> {
        if !light_pins.contains(&pin) {
            return Err(BusError::UnknownPin);
        }
        for &p in light_pins {
            let line = self.gpio.get(p)?;
            if p == pin {
                line.set_high();
            } else {
                line.set_low();
            }
            line.set_as_output(Speed::Low);
        }
        Ok(&mut self.i2c)
    }

    fn rtd(&mut self, cs_pin: u8) -> Result<Self::Spi<'_>, BusError> {
        let cs = self.gpio.get(cs_pin)?;
        cs.set_high();
        cs.set_as_output(Speed::VeryHigh);
        Ok(SpiDevice::new(&self.rtd_spi, cs))
    }
}
