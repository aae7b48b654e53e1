//! Dallas/Maxim CRC-8 (polynomial x^8 + x^5 + x^4 + 1, reflected)
//!
//! Used for 1-Wire ROM codes, scratchpads and the persisted config blob.

use crc::{Crc, CRC_8_MAXIM_DOW};

/// CRC-8/MAXIM-DOW (1-Wire)
const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_MAXIM_DOW);

/// Compute the CRC-8 of `data`
///
/// Appending the result to `data` yields a buffer whose CRC is zero.
pub fn crc8(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}
