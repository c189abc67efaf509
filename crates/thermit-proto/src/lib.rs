//! Wire layer for the thermit file-transfer protocol.
//!
//! thermit frames travel over byte-oriented serial links bracketed by
//! sentinel pairs:
//!
//! ```text
//! A5 A5 | FC RFID RFB SFID SCHK PLEN | payload[PLEN] | CRC_lo CRC_hi | 5A 5A
//! ```
//!
//! This crate owns everything below the session layer:
//!
//! - [`Framer`]: byte-at-a-time recovery of frames from a raw stream
//! - [`Packet`]: parse/build of the frame body with CRC enforcement
//! - [`Parameters`] and [`FileInfo`]: the negotiation and file-announcement
//!   payloads
//! - [`Reader`]/[`Writer`]: bounds-checked little-endian cursors
//!
//! All multi-byte integers are little-endian on the wire, including the
//! CRC-16 footer.

#![forbid(unsafe_code)]

mod crc;
mod cursor;
mod errors;
mod framing;
mod packet;
mod payloads;

pub use crc::crc16;
pub use cursor::{Reader, Writer};
pub use errors::{ProtocolError, Result};
pub use framing::{Framer, START_BYTE, STOP_BYTE, enframe};
pub use packet::{FCode, Packet};
pub use payloads::{FILE_INFO_MAX, FileInfo, PARAMETERS_WIRE_LEN, Parameters};

/// Link-layer MTU: the largest on-wire unit including sentinels.
pub const L2_MTU: usize = 128;

/// Bytes the link layer reserves ahead of the thermit body.
pub const L2_HEADER_SIZE: usize = 8;

/// Bytes the link layer reserves after the thermit body.
pub const L2_FOOTER_SIZE: usize = 0;

/// Largest thermit body the link layer can carry.
pub const L2_PAYLOAD_SIZE: usize = L2_MTU - L2_HEADER_SIZE - L2_FOOTER_SIZE;

/// Fixed frame body header: function code, two file ids, feedback, chunk
/// number and payload length.
pub const HEADER_LENGTH: usize = 6;

/// Frame body footer: the little-endian CRC-16.
pub const FOOTER_LENGTH: usize = 2;

/// Largest frame payload, and therefore the largest negotiable chunk size.
pub const PAYLOAD_MAX: usize = L2_PAYLOAD_SIZE - HEADER_LENGTH - FOOTER_LENGTH;

/// Size of the frame buffer a session carries: one maximal frame body.
pub const MSG_SIZE_MAX: usize = L2_PAYLOAD_SIZE;

/// Most chunks a single transfer can address (bitmap capacity).
pub const CHUNK_COUNT_MAX: usize = 250;

/// Longest file name carried in a file-info record, excluding the NUL.
pub const FILENAME_MAX: usize = 32;

/// File ids advance modulo this bound; reuse after wrap is tolerated.
pub const FILEID_MAX: u8 = 250;

/// File id marking "no transfer active" in either direction.
pub const FILEID_INACTIVE: u8 = 0xFF;

/// Feedback byte announcing that the incoming file is complete.
pub const FEEDBACK_FILE_READY: u8 = 0xFF;

#[cfg(test)]
mod tests {
    use super::{
        FOOTER_LENGTH, HEADER_LENGTH, L2_PAYLOAD_SIZE, MSG_SIZE_MAX, PAYLOAD_MAX,
    };

    #[test]
    fn size_constants_are_consistent() {
        assert_eq!(L2_PAYLOAD_SIZE, 120);
        assert_eq!(PAYLOAD_MAX, 112);
        assert_eq!(MSG_SIZE_MAX, HEADER_LENGTH + PAYLOAD_MAX + FOOTER_LENGTH);
    }
}
