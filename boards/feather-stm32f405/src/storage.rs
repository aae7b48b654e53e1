//! Configuration blob in the last internal flash sector
//!
//! Layout: `len: u16 LE`, two pad bytes, then `len` blob bytes, padded to
//! the flash write granularity. An erased sector reads back `0xFFFF` as
//! length and is reported as [`StorageError::Empty`].

use defmt::warn;
use embassy_stm32::flash::{Blocking, Flash, WRITE_SIZE};
use gateway_core::config::BLOB_CAPACITY;
use hal_abstractions::{ConfigStorage, StorageError};

/// Sector 11 of the STM32F405RG (128 KiB), relative to the flash base
const SECTOR_OFFSET: u32 = 0x000E_0000;
const SECTOR_SIZE: u32 = 0x0002_0000;

const HEADER_LEN: usize = 4;
const AREA_LEN: usize = (HEADER_LEN + BLOB_CAPACITY).div_ceil(WRITE_SIZE) * WRITE_SIZE;

pub struct FlashStorage {
    flash: Flash<'static, Blocking>,
}

impl FlashStorage {
    pub fn new(flash: Flash<'static, Blocking>) -> Self {
        Self { flash }
    }
}

impl ConfigStorage for FlashStorage {
    fn load(&mut self, buf: &mut [u8]) -> Result<usize, StorageError> {
        let mut header = [0u8; HEADER_LEN];
        self.flash
            .blocking_read(SECTOR_OFFSET, &mut header)
            .map_err(|_| StorageError::ReadFailed)?;
        let len = usize::from(u16::from_le_bytes([header[0], header[1]]));
        if len == 0xFFFF {
            return Err(StorageError::Empty);
        }
        let out = buf.get_mut(..len).ok_or(StorageError::TooLarge)?;
        self.flash
            .blocking_read(SECTOR_OFFSET + HEADER_LEN as u32, out)
            .map_err(|_| StorageError::ReadFailed)?;
        Ok(len)
    }

    /// Erases the whole sector; this blocks for up to a few seconds
    fn save(&mut self, data: &[u8]) -> Result<(), StorageError> {
        let mut area = [0xFFu8; AREA_LEN];
        let end = HEADER_LEN + data.len();
        let len = u16::try_from(data.len()).map_err(|_| StorageError::TooLarge)?;
        area.get_mut(HEADER_LEN..end)
            .ok_or(StorageError::TooLarge)?
            .copy_from_slice(data);
        area[..2].copy_from_slice(&len.to_le_bytes());
        area[2..HEADER_LEN].fill(0);
        let padded = end.div_ceil(WRITE_SIZE) * WRITE_SIZE;

        self.flash
            .blocking_erase(SECTOR_OFFSET, SECTOR_OFFSET + SECTOR_SIZE)
            .map_err(|e| {
                warn!("Flash erase failed: {:?}", e);
                StorageError::WriteFailed
            })?;
        self.flash
            .blocking_write(SECTOR_OFFSET, &area[..padded])
            .map_err(|e| {
                warn!("Flash write failed: {:?}", e);
                StorageError::WriteFailed
            })
    }
}
