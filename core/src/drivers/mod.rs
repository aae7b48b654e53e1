//! Per-type sensor drivers
//!
//! Every driver is a small state machine. One call to
//! [`SensorDriver::step`] performs at most one bus transaction and never
//! waits: conversion delays are `Waiting`-style phases that simply return
//! [`Step::Pending`] until enough time has passed. Drivers never retry;
//! failure history is kept by [`crate::tracker`].

pub mod bh1750;
pub mod dht;
pub mod ds18x20;
pub mod ds2438;
pub mod max31865;
pub mod onewire;

use hal_abstractions::SensorBuses;

use crate::config::DriverSettings;
use crate::error::ReadFailure;
use crate::sensor::{Reading, Rom, SensorKind};

pub use bh1750::{Bh1750, LightMode};
pub use dht::{Dht, DhtModel};
pub use ds18x20::Ds18x20;
pub use ds2438::Ds2438;
pub use max31865::{MainsFilter, Max31865, RtdSettings};

/// Outcome of one driver step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    /// Waiting for the device; call again on a later tick
    Pending,
    Success(Reading),
    Failure(ReadFailure),
}

/// Result of the type probe of a freshly discovered sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Probe {
    Present,
    Absent,
    /// Trial read still in progress
    Pending,
}

/// Inputs shared by every driver step of one tick
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub now_ms: u64,
    pub settings: &'a DriverSettings,
    /// Configured BH1750 ADDR pins, needed to deselect the others
    pub light_pins: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorDriver {
    Ds18x20(Ds18x20),
    Ds2438(Ds2438),
    Dht(Dht),
    Bh1750(Bh1750),
    Max31865(Max31865),
}

impl SensorDriver {
    /// Driver for `kind` on `pin`; 1-Wire kinds require their ROM
    pub fn new(kind: SensorKind, pin: u8, rom: Option<Rom>) -> Option<Self> {
        match kind {
            SensorKind::OneWireTemp => rom.map(|r| Self::Ds18x20(Ds18x20::new(pin, r))),
            SensorKind::OneWireMulti => rom.map(|r| Self::Ds2438(Ds2438::new(pin, r))),
            SensorKind::Dht => Some(Self::Dht(Dht::new(pin))),
            SensorKind::Light => Some(Self::Bh1750(Bh1750::new(pin))),
            SensorKind::Rtd => Some(Self::Max31865(Max31865::new(pin))),
        }
    }

    pub fn step<B: SensorBuses>(&mut self, buses: &mut B, ctx: &StepContext<'_>) -> Step {
        let settings = ctx.settings;
        match self {
            Self::Ds18x20(d) => d.step(buses.one_wire(), ctx.now_ms, settings.ds18_resolution),
            Self::Ds2438(d) => d.step(buses.one_wire(), ctx.now_ms),
            Self::Dht(d) => d.step(buses.dht(), ctx.now_ms, settings.dht_model),
            Self::Bh1750(d) => match buses.select_light(d.pin(), ctx.light_pins) {
                Ok(i2c) => d.step(i2c, ctx.now_ms, settings.light_mode),
                Err(e) => {
                    d.reset();
                    Step::Failure(e.into())
                }
            },
            Self::Max31865(d) => match buses.rtd(d.cs_pin()) {
                Ok(mut spi) => d.step(&mut spi, ctx.now_ms, &settings.rtd),
                Err(e) => {
                    d.reset();
                    Step::Failure(e.into())
                }
            },
        }
    }

    /// Confirm the device answers
    ///
    /// DHT sensors have no presence query; they are probed with a trial
    /// read spread over several calls.
    pub fn probe<B: SensorBuses>(&mut self, buses: &mut B, ctx: &StepContext<'_>) -> Probe {
        let settings = ctx.settings;
        let result = match self {
            Self::Ds18x20(d) => d.probe(buses.one_wire(), settings.ds18_resolution),
            Self::Ds2438(d) => d.probe(buses.one_wire()),
            Self::Dht(d) => match d.step(buses.dht(), ctx.now_ms, settings.dht_model) {
                Step::Pending => return Probe::Pending,
                Step::Success(_) => Ok(()),
                Step::Failure(e) => Err(e),
            },
            Self::Bh1750(d) => buses
                .select_light(d.pin(), ctx.light_pins)
                .map_err(ReadFailure::from)
                .and_then(|i2c| d.probe(i2c)),
            Self::Max31865(d) => buses
                .rtd(d.cs_pin())
                .map_err(ReadFailure::from)
                .and_then(|mut spi| d.probe(&mut spi, &settings.rtd)),
        };
        match result {
            Ok(()) => Probe::Present,
            Err(_) => Probe::Absent,
        }
    }

    /// Abandon any in-flight measurement
    pub fn reset(&mut self) {
        match self {
            Self::Ds18x20(d) => d.reset(),
            Self::Ds2438(d) => d.reset(),
            Self::Dht(d) => d.reset(),
            Self::Bh1750(d) => d.reset(),
            Self::Max31865(d) => d.reset(),
        }
    }
}
