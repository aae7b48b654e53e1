//! Platform-agnostic core logic for the UDP sensor gateway
//!
//! This crate contains the sensor acquisition, error-recovery and
//! change-gated reporting engine. It has NO hardware dependencies: boards
//! hand it a [`hal_abstractions::SensorBuses`] bundle on every tick, a
//! [`hal_abstractions::DatagramSink`] for telemetry and a
//! [`hal_abstractions::ConfigStorage`] for the persisted configuration.
//!
//! ## Data flow
//!
//! ```text
//! Gateway::tick(now)
//!   ├─ apply queued ConfigChange (tick boundary)
//!   ├─ Scanner::step        discover / probe one unit of work
//!   ├─ per BusKind cycle    SensorDriver::step (one hardware step per sensor)
//!   │    └─ RetryTracker    retry / error line / eviction
//!   │         └─ hysteresis::decide
//!   │              └─ packet::render → Transport → DatagramSink
//!   └─ ConfigStore::flush_if_due
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

// Must stay first so the log macros are visible in every module below.
#[macro_use]
mod fmt;

pub mod config;
pub mod crc;
pub mod drivers;
pub mod error;
pub mod gateway;
pub mod hysteresis;
pub mod packet;
pub mod registry;
pub mod scanner;
pub mod schedule;
pub mod sensor;
pub mod store;
pub mod tracker;
pub mod transport;

#[cfg(test)]
mod mock;

pub use config::{BusSettings, DriverSettings, NetworkSettings, PersistedConfig, Statistics};
pub use error::{ConfigError, ReadFailure, StoreError};
pub use gateway::{Gateway, SensorSnapshot, MAX_SENSORS};
pub use hysteresis::{Decision, ReportPolicy};
pub use registry::{LifecycleState, SensorHandle, SensorRecord};
pub use sensor::{BusKind, Reading, Rom, SensorKind};
pub use store::{BootOutcome, ConfigChange, ConfigStore};
