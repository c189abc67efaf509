//! Stream framing for byte-oriented links.
//!
//! Where the transport is not packet-aware, each frame body is bracketed by
//! sentinel pairs so the receiver can find frame boundaries in the raw byte
//! stream:
//!
//! ```text
//! | A5 | A5 | frame body | 5A | 5A |
//! ```
//!
//! The sentinels are stripped and only the validated body reaches the packet
//! codec.

use bytes::BufMut;

use crate::{FOOTER_LENGTH, HEADER_LENGTH, MSG_SIZE_MAX, PAYLOAD_MAX, crc::crc16};

/// Byte of the start sentinel; two in a row open a frame.
pub const START_BYTE: u8 = 0xA5;

/// Byte of the stop sentinel; two in a row close a frame.
pub const STOP_BYTE: u8 = 0x5A;

/// Recognition phases, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramerState {
    /// Waiting for two consecutive start sentinels.
    Start,
    /// Collecting the five header bytes after the sentinels.
    Header,
    /// Collecting the payload length byte.
    Len,
    /// Collecting `PLEN` payload bytes.
    Payload,
    /// Collecting the two CRC bytes; validates on the second.
    Crc,
    /// Waiting for two consecutive stop sentinels.
    Stop,
    /// A validated frame is buffered.
    Finished,
}

/// Byte-at-a-time frame recognizer.
///
/// Feed the raw stream through [`Framer::follow`]; when it returns `true` a
/// validated frame body is available from [`Framer::body`]. Each call is O(1)
/// (the checksum is computed once, when its final byte arrives) and never
/// allocates. Any framing error restarts recognition at the next start
/// sentinel with no partial commitment.
///
/// A framer is owned by exactly one session; it is not meant to be shared.
#[derive(Debug)]
pub struct Framer {
    buf: [u8; MSG_SIZE_MAX],
    len: usize,
    state: FramerState,
    rounds_left: usize,
    crc_errors: u64,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    /// Fresh framer waiting for a start sentinel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: [0; MSG_SIZE_MAX],
            len: 0,
            state: FramerState::Start,
            rounds_left: 2,
            crc_errors: 0,
        }
    }

    /// Restart recognition from the start sentinel, dropping any partial
    /// frame. The error counter is preserved.
    pub fn reset(&mut self) {
        self.len = 0;
        self.state = FramerState::Start;
        self.rounds_left = 2;
    }

    /// Frames dropped so far on checksum mismatch.
    #[must_use]
    pub fn crc_errors(&self) -> u64 {
        self.crc_errors
    }

    /// True while a validated frame is buffered.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == FramerState::Finished
    }

    /// The buffered frame body: header, length byte, payload and the two CRC
    /// bytes in wire order (`PLEN + 8` bytes total). Only meaningful while
    /// [`Framer::is_ready`] holds.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Feed one byte of the stream.
    ///
    /// Returns `true` when this byte completed a validated frame. A byte
    /// arriving after a finished frame first re-initializes the framer and is
    /// then processed normally, so back-to-back frames lose no sentinels.
    pub fn follow(&mut self, byte: u8) -> bool {
        if self.state == FramerState::Finished {
            self.reset();
        }

        let mut error = true;

        match self.state {
            FramerState::Start => {
                if byte == START_BYTE {
                    self.rounds_left -= 1;
                    if self.rounds_left == 0 {
                        self.state = FramerState::Header;
                        // Five header bytes precede the length byte.
                        self.rounds_left = HEADER_LENGTH - 1;
                    }
                    error = false;
                }
            }

            FramerState::Header => {
                self.buf[self.len] = byte;
                self.len += 1;
                self.rounds_left -= 1;
                if self.rounds_left == 0 {
                    self.state = FramerState::Len;
                    self.rounds_left = 1;
                }
                error = false;
            }

            FramerState::Len => {
                if usize::from(byte) <= PAYLOAD_MAX {
                    self.buf[self.len] = byte;
                    self.len += 1;
                    if byte == 0 {
                        // Empty frames (SYNC_ACK, keepalive) skip the payload.
                        self.state = FramerState::Crc;
                        self.rounds_left = FOOTER_LENGTH;
                    } else {
                        self.state = FramerState::Payload;
                        self.rounds_left = usize::from(byte);
                    }
                    error = false;
                }
            }

            FramerState::Payload => {
                self.buf[self.len] = byte;
                self.len += 1;
                self.rounds_left -= 1;
                if self.rounds_left == 0 {
                    self.state = FramerState::Crc;
                    self.rounds_left = FOOTER_LENGTH;
                }
                error = false;
            }

            FramerState::Crc => {
                self.buf[self.len] = byte;
                self.len += 1;
                self.rounds_left -= 1;
                error = false;
                if self.rounds_left == 0 {
                    let body_end = self.len - FOOTER_LENGTH;
                    let received =
                        u16::from_le_bytes([self.buf[body_end], self.buf[body_end + 1]]);
                    if received == crc16(&self.buf[..body_end]) {
                        self.state = FramerState::Stop;
                        self.rounds_left = 2;
                    } else {
                        self.crc_errors += 1;
                        error = true;
                    }
                }
            }

            FramerState::Stop => {
                if byte == STOP_BYTE {
                    self.rounds_left -= 1;
                    if self.rounds_left == 0 {
                        self.state = FramerState::Finished;
                    }
                    error = false;
                }
            }

            // Unreachable after the reset above; kept as the drop-bytes idle
            // branch so a stray call cannot corrupt the buffered frame.
            FramerState::Finished => {
                error = false;
            }
        }

        if error {
            self.reset();
        }

        self.state == FramerState::Finished
    }
}

/// Bracket an encoded frame body with the start/stop sentinel pairs.
pub fn enframe(body: &[u8], out: &mut impl BufMut) {
    out.put_u8(START_BYTE);
    out.put_u8(START_BYTE);
    out.put_slice(body);
    out.put_u8(STOP_BYTE);
    out.put_u8(STOP_BYTE);
}
