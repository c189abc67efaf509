//! CRC-16 shared by the framer and the packet codec.

use crc::{CRC_16_XMODEM, Crc};

/// Checksum algorithm used for frame validation.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Compute the CRC-16 over `data`.
///
/// Both peers must agree on this function; the result travels little-endian
/// on the wire, after the frame payload.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::crc16;

    #[test]
    fn matches_xmodem_check_value() {
        // The CRC catalogue check value for CRC-16/XMODEM.
        assert_eq!(crc16(b"123456789"), 0x31C3);
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(crc16(&[]), 0);
    }
}
