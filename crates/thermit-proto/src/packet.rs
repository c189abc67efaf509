//! Frame body codec: function codes and the parsed packet form.
//!
//! The body is what travels between the framing sentinels:
//!
//! ```text
//! FC RFID RFB SFID SCHK PLEN | payload[PLEN] | CRC_lo CRC_hi
//! ```
//!
//! `RFID`/`RFB` describe the emitter's *receive* side (which file it is
//! taking in and which chunk it wants next), `SFID`/`SCHK` describe the
//! *send* side the payload belongs to. This is how acknowledgement feedback
//! piggybacks on every frame without dedicated ack packets.

use crate::{
    FOOTER_LENGTH, HEADER_LENGTH, PAYLOAD_MAX,
    crc::crc16,
    cursor::{Reader, Writer},
    errors::{ProtocolError, Result},
};

/// Function codes of the thermit protocol (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FCode {
    /// Master's opening parameter proposal.
    SyncProposal = 0x01,
    /// Slave's compromise response to a proposal.
    SyncResponse = 0x02,
    /// Negotiation acknowledgement, sent by both roles in turn.
    SyncAck = 0x03,
    /// One data chunk, or an empty feedback/keepalive carrier.
    DataTransfer = 0x04,
    /// Announcement of a new outbound file (file-info payload).
    NewFileStart = 0x05,
    /// The receiver gave up writing the current incoming file.
    WriteTerminated = 0xFE,
    /// The emitter lost protocol synchronization.
    OutOfSync = 0xFF,
}

impl FCode {
    /// Decode a function code byte. `None` for values outside the closed set.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::SyncProposal),
            0x02 => Some(Self::SyncResponse),
            0x03 => Some(Self::SyncAck),
            0x04 => Some(Self::DataTransfer),
            0x05 => Some(Self::NewFileStart),
            0xFE => Some(Self::WriteTerminated),
            0xFF => Some(Self::OutOfSync),
            _ => None,
        }
    }

    /// Wire value of the code.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Parsed thermit frame body.
///
/// # Invariants
///
/// A parsed packet has passed the acceptance check: the body was exactly
/// `payloadLen + 8` bytes, `payloadLen <= PAYLOAD_MAX`, and the CRC-16 over
/// header and payload matched the little-endian footer. [`Packet::encode`]
/// produces bodies that satisfy the same check by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    /// Function code.
    pub fcode: FCode,
    /// File id the emitter is currently receiving; `FILEID_INACTIVE` if none.
    pub rec_file_id: u8,
    /// Piggybacked feedback: lowest dirty chunk index the emitter still
    /// wants, or `FEEDBACK_FILE_READY` when its incoming file is complete.
    pub rec_feedback: u8,
    /// File id the payload belongs to.
    pub snd_file_id: u8,
    /// Chunk number of the carried payload.
    pub snd_chunk_no: u8,
    /// Frame payload; empty for pure feedback and control frames.
    pub payload: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Parse a frame body (`payloadLen + 8` bytes including the CRC footer).
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::Truncated`] if shorter than header + footer
    /// - [`ProtocolError::PayloadTooLarge`] if the length field exceeds
    ///   [`PAYLOAD_MAX`]
    /// - [`ProtocolError::LengthMismatch`] if the body length disagrees with
    ///   the length field
    /// - [`ProtocolError::CrcMismatch`] if the checksum does not verify
    /// - [`ProtocolError::UnknownFunctionCode`] for codes outside the set
    pub fn parse(body: &'a [u8]) -> Result<Self> {
        if body.len() < HEADER_LENGTH + FOOTER_LENGTH {
            return Err(ProtocolError::Truncated {
                expected: HEADER_LENGTH + FOOTER_LENGTH,
                actual: body.len(),
            });
        }

        let mut rd = Reader::new(body);
        let fcode_raw = rd.get_u8()?;
        let rec_file_id = rd.get_u8()?;
        let rec_feedback = rd.get_u8()?;
        let snd_file_id = rd.get_u8()?;
        let snd_chunk_no = rd.get_u8()?;
        let payload_len = usize::from(rd.get_u8()?);

        if payload_len > PAYLOAD_MAX {
            return Err(ProtocolError::PayloadTooLarge {
                len: payload_len,
                max: PAYLOAD_MAX,
            });
        }
        let expected = HEADER_LENGTH + payload_len + FOOTER_LENGTH;
        if body.len() != expected {
            return Err(ProtocolError::LengthMismatch {
                expected,
                actual: body.len(),
            });
        }

        let payload = rd.take(payload_len)?;
        let received = rd.get_u16()?;
        let computed = crc16(&body[..HEADER_LENGTH + payload_len]);
        if received != computed {
            return Err(ProtocolError::CrcMismatch { received, computed });
        }

        let fcode =
            FCode::from_u8(fcode_raw).ok_or(ProtocolError::UnknownFunctionCode(fcode_raw))?;

        Ok(Self {
            fcode,
            rec_file_id,
            rec_feedback,
            snd_file_id,
            snd_chunk_no,
            payload,
        })
    }

    /// Serialize the body into `out`, returning the body length
    /// (`payloadLen + 8`).
    ///
    /// Header fields go through the little-endian cursor writer, then the
    /// payload, then the CRC-16 over everything written so far.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::PayloadTooLarge`] if the payload exceeds
    ///   [`PAYLOAD_MAX`]
    /// - [`ProtocolError::BufferExhausted`] if `out` cannot hold the body
    pub fn encode(&self, out: &mut [u8]) -> Result<usize> {
        if self.payload.len() > PAYLOAD_MAX {
            return Err(ProtocolError::PayloadTooLarge {
                len: self.payload.len(),
                max: PAYLOAD_MAX,
            });
        }

        let mut wr = Writer::new(out);
        wr.put_u8(self.fcode.to_u8())?;
        wr.put_u8(self.rec_file_id)?;
        wr.put_u8(self.rec_feedback)?;
        wr.put_u8(self.snd_file_id)?;
        wr.put_u8(self.snd_chunk_no)?;
        wr.put_u8(self.payload.len() as u8)?;
        wr.put_slice(self.payload)?;

        let crc = crc16(wr.written());
        wr.put_u16(crc)?;
        Ok(wr.position())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MSG_SIZE_MAX;

    fn encode_to_vec(pkt: &Packet<'_>) -> Vec<u8> {
        let mut buf = [0u8; MSG_SIZE_MAX];
        let len = pkt.encode(&mut buf).unwrap();
        buf[..len].to_vec()
    }

    #[test]
    fn round_trips_every_function_code() {
        for fcode in [
            FCode::SyncProposal,
            FCode::SyncResponse,
            FCode::SyncAck,
            FCode::DataTransfer,
            FCode::NewFileStart,
            FCode::WriteTerminated,
            FCode::OutOfSync,
        ] {
            let pkt = Packet {
                fcode,
                rec_file_id: 7,
                rec_feedback: 3,
                snd_file_id: 9,
                snd_chunk_no: 1,
                payload: &[0xDE, 0xAD],
            };
            let wire = encode_to_vec(&pkt);
            assert_eq!(wire.len(), 2 + 8);
            let parsed = Packet::parse(&wire).unwrap();
            assert_eq!(parsed, pkt);
        }
    }

    #[test]
    fn crc_footer_is_little_endian() {
        let pkt = Packet {
            fcode: FCode::SyncAck,
            rec_file_id: 0,
            rec_feedback: 0,
            snd_file_id: 0,
            snd_chunk_no: 0,
            payload: &[],
        };
        let wire = encode_to_vec(&pkt);
        let crc = crc16(&wire[..6]);
        assert_eq!(&wire[6..], &crc.to_le_bytes());
    }

    #[test]
    fn rejects_tampered_payload() {
        let pkt = Packet {
            fcode: FCode::DataTransfer,
            rec_file_id: 0xFF,
            rec_feedback: 0xFF,
            snd_file_id: 0,
            snd_chunk_no: 2,
            payload: &[1, 2, 3, 4],
        };
        let mut wire = encode_to_vec(&pkt);
        wire[8] ^= 0x10;
        assert!(matches!(
            Packet::parse(&wire),
            Err(ProtocolError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn rejects_length_field_mismatch() {
        let pkt = Packet {
            fcode: FCode::DataTransfer,
            rec_file_id: 0,
            rec_feedback: 0,
            snd_file_id: 0,
            snd_chunk_no: 0,
            payload: &[5, 6],
        };
        let mut wire = encode_to_vec(&pkt);
        // Claim one payload byte more than the body carries.
        wire[5] = 3;
        assert!(matches!(
            Packet::parse(&wire),
            Err(ProtocolError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn rejects_unknown_function_code() {
        let mut body = [0u8; 8];
        body[0] = 0x42;
        let crc = crc16(&body[..6]);
        body[6..].copy_from_slice(&crc.to_le_bytes());
        assert_eq!(
            Packet::parse(&body),
            Err(ProtocolError::UnknownFunctionCode(0x42))
        );
    }

    #[test]
    fn rejects_truncated_body() {
        assert!(matches!(
            Packet::parse(&[4, 0, 0]),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn encode_fails_on_short_buffer() {
        let pkt = Packet {
            fcode: FCode::DataTransfer,
            rec_file_id: 0,
            rec_feedback: 0,
            snd_file_id: 0,
            snd_chunk_no: 0,
            payload: &[1, 2, 3],
        };
        let mut buf = [0u8; 4];
        assert!(matches!(
            pkt.encode(&mut buf),
            Err(ProtocolError::BufferExhausted { .. })
        ));
    }
}
