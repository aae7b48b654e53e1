//! Non-volatile configuration storage
//!
//! The engine owns the blob format; storage only moves bytes. It is
//! invoked at boot, on the coarse statistics-flush interval and on
//! explicit resets, so implementations may erase/program flash directly.

/// Storage errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// Nothing has been stored yet (erased medium)
    Empty,
    /// Blob does not fit the storage area
    TooLarge,
    /// Hardware read failed
    ReadFailed,
    /// Hardware erase/program failed
    WriteFailed,
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Empty => write!(f, "Storage empty"),
            Self::TooLarge => write!(f, "Blob too large"),
            Self::ReadFailed => write!(f, "Storage read failed"),
            Self::WriteFailed => write!(f, "Storage write failed"),
        }
    }
}

impl core::error::Error for StorageError {}

/// Load/save capability for the persisted configuration blob
pub trait ConfigStorage {
    /// Copy the stored blob into `buf`, returning its length
    fn load(&mut self, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Replace the stored blob
    fn save(&mut self, data: &[u8]) -> Result<(), StorageError>;
}

impl<T: ConfigStorage + ?Sized> ConfigStorage for &mut T {
    fn load(&mut self, buf: &mut [u8]) -> Result<usize, StorageError> {
        T::load(self, buf)
    }

    fn save(&mut self, data: &[u8]) -> Result<(), StorageError> {
        T::save(self, data)
    }
}
