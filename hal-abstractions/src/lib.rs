//! Hardware abstraction traits for the sensor gateway
//!
//! This crate defines traits that abstract over hardware differences
//! between boards. BSPs implement these traits; the platform-agnostic
//! engine in `gateway-core` only ever talks to them.
//!
//! - **`onewire`**: bit/byte level 1-Wire bus access, addressed by pin
//! - **`dht`**: single-wire DHT start signal and frame capture
//! - **`sensors`**: `SensorBuses` bundle handed to the poll loop each tick
//! - **`network`**: fire-and-forget datagram sink
//! - **`storage`**: load/save of the persisted configuration blob

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod dht;
pub mod network;
pub mod onewire;
pub mod sensors;
pub mod storage;

pub use dht::DhtLine;
pub use network::{DatagramSink, Endpoint, SinkError};
pub use onewire::{OneWireBus, Triplet};
pub use sensors::SensorBuses;
pub use storage::{ConfigStorage, StorageError};

/// Low-level bus errors shared by the bit-banged sensor lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// The requested pin is not wired to this bus on the current board
    UnknownPin,
    /// The line is held low (short circuit or missing pull-up)
    LineStuck,
    /// The device did not answer within the protocol window
    Timeout,
    /// The underlying peripheral reported an error
    Peripheral,
}

impl core::fmt::Display for BusError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::UnknownPin => write!(f, "Unknown pin"),
            Self::LineStuck => write!(f, "Line stuck low"),
            Self::Timeout => write!(f, "Bus timeout"),
            Self::Peripheral => write!(f, "Peripheral error"),
        }
    }
}

impl core::error::Error for BusError {}
