//! Error types for the thermit wire layer.
//!
//! Strongly-typed parse and build failures. Framing-level errors (lost
//! sentinels, stream CRC mismatches) never surface here: the framer recovers
//! from them silently and only counts them.

use thiserror::Error;

/// Result alias for wire-layer operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while parsing or building thermit frame bodies.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Body is shorter than the fixed header and footer.
    #[error("frame truncated: need at least {expected} bytes, have {actual}")]
    Truncated {
        /// Minimum length required.
        expected: usize,
        /// Length actually available.
        actual: usize,
    },

    /// Payload length exceeds the protocol maximum.
    #[error("payload length {len} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Claimed or requested payload length.
        len: usize,
        /// Protocol maximum.
        max: usize,
    },

    /// Body length disagrees with the payload length field.
    #[error("body is {actual} bytes but the length field implies {expected}")]
    LengthMismatch {
        /// Length implied by the length field.
        expected: usize,
        /// Length actually present.
        actual: usize,
    },

    /// CRC-16 of the body does not match the received checksum.
    #[error("crc mismatch: received {received:#06x}, computed {computed:#06x}")]
    CrcMismatch {
        /// Checksum carried by the frame.
        received: u16,
        /// Checksum computed over the body.
        computed: u16,
    },

    /// Function code byte outside the closed set.
    #[error("unknown function code {0:#04x}")]
    UnknownFunctionCode(u8),

    /// A cursor ran off the end of its buffer.
    #[error("buffer exhausted at offset {at}")]
    BufferExhausted {
        /// Cursor position when the access failed.
        at: usize,
    },

    /// File name does not fit the wire format.
    #[error("file name is {len} bytes, maximum is {max}")]
    NameTooLong {
        /// Length of the offending name.
        len: usize,
        /// Longest permitted name.
        max: usize,
    },

    /// File name bytes are not valid UTF-8.
    #[error("file name is not valid UTF-8")]
    NameEncoding,
}
