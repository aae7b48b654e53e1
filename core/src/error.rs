//! Error types
//!
//! Every failure is local to one sensor record, one datagram or one
//! configuration request; none of them stops the poll loop.

use hal_abstractions::{BusError, StorageError};

/// Why a single driver step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadFailure {
    /// CRC or checksum mismatch
    Crc,
    /// Device did not answer in time
    Timeout,
    /// No presence pulse, NACK, stuck line or peripheral error
    BusFault,
    /// Decoded value outside the sensor's physical range
    OutOfRange,
}

impl From<BusError> for ReadFailure {
    fn from(e: BusError) -> Self {
        match e {
            BusError::Timeout => ReadFailure::Timeout,
            BusError::UnknownPin | BusError::LineStuck | BusError::Peripheral => {
                ReadFailure::BusFault
            }
        }
    }
}

impl core::fmt::Display for ReadFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Crc => write!(f, "CRC mismatch"),
            Self::Timeout => write!(f, "Sensor timeout"),
            Self::BusFault => write!(f, "Bus fault"),
            Self::OutOfRange => write!(f, "Value out of range"),
        }
    }
}

impl core::error::Error for ReadFailure {}

/// Rejected configuration mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Pin listed twice or already used by another bus
    PinConflict,
    /// Value outside its accepted range
    InvalidValue,
    /// Too many mutations waiting for the next tick
    QueueFull,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::PinConflict => write!(f, "Pin conflict"),
            Self::InvalidValue => write!(f, "Invalid value"),
            Self::QueueFull => write!(f, "Change queue full"),
        }
    }
}

impl core::error::Error for ConfigError {}

/// Persisted configuration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// Stored schema version differs from the compiled one
    VersionMismatch { stored: u8 },
    /// Blob too short, bad CRC or invalid field encoding
    Corrupt,
    /// Encode buffer too small
    BufferTooSmall,
    /// Underlying storage failed
    Storage(StorageError),
}

impl From<StorageError> for StoreError {
    fn from(e: StorageError) -> Self {
        StoreError::Storage(e)
    }
}

impl core::fmt::Display for StoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::VersionMismatch { stored } => {
                write!(f, "Config version mismatch (stored {})", stored)
            }
            Self::Corrupt => write!(f, "Config blob corrupt"),
            Self::BufferTooSmall => write!(f, "Buffer too small"),
            Self::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl core::error::Error for StoreError {}
