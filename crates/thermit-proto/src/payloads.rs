//! Negotiation and file-announcement payloads.
//!
//! Two frame kinds carry structured payloads: the sync exchange serializes a
//! [`Parameters`] set (five little-endian `u16`s), and `NEW_FILE_START`
//! carries a [`FileInfo`] record. Everything else rides as raw chunk bytes.

use crate::{
    CHUNK_COUNT_MAX, FILENAME_MAX, PAYLOAD_MAX,
    cursor::{Reader, Writer},
    errors::{ProtocolError, Result},
};

/// Wire size of a serialized parameter set.
pub const PARAMETERS_WIRE_LEN: usize = 10;

/// Largest wire size of a file-info record: size, name length, name, NUL.
pub const FILE_INFO_MAX: usize = 3 + FILENAME_MAX + 1;

/// Session parameters negotiated per peer pair.
///
/// Each endpoint boots with its local capability set; the sync exchange
/// reduces the pair to [`Parameters::best_common`], which both sides then run
/// with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameters {
    /// Protocol version identifier.
    pub version: u16,
    /// Bytes per data chunk; equals the payload size of a full data frame.
    pub chunk_size: u16,
    /// Upper bound on file bytes per transfer.
    pub max_file_size: u16,
    /// Idle time before an empty data frame is emitted as keepalive.
    pub keep_alive_ms: u16,
    /// Reserved pacing knob: max outstanding data frames per step.
    pub burst_length: u16,
}

impl Default for Parameters {
    /// Capability set of a stock endpoint: full-size chunks, the largest
    /// bitmap-addressable file, one-second keepalive.
    fn default() -> Self {
        Self {
            version: 0,
            chunk_size: PAYLOAD_MAX as u16,
            max_file_size: 28_000,
            keep_alive_ms: 1_000,
            burst_length: 4,
        }
    }
}

impl Parameters {
    /// Serialize as five little-endian `u16`s (10 bytes).
    #[must_use]
    pub fn to_wire(&self) -> [u8; PARAMETERS_WIRE_LEN] {
        let mut buf = [0u8; PARAMETERS_WIRE_LEN];
        buf[0..2].copy_from_slice(&self.version.to_le_bytes());
        buf[2..4].copy_from_slice(&self.chunk_size.to_le_bytes());
        buf[4..6].copy_from_slice(&self.max_file_size.to_le_bytes());
        buf[6..8].copy_from_slice(&self.keep_alive_ms.to_le_bytes());
        buf[8..10].copy_from_slice(&self.burst_length.to_le_bytes());
        buf
    }

    /// Parse a 10-byte parameter payload.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::LengthMismatch`] unless the payload is exactly
    /// [`PARAMETERS_WIRE_LEN`] bytes.
    pub fn from_wire(payload: &[u8]) -> Result<Self> {
        if payload.len() != PARAMETERS_WIRE_LEN {
            return Err(ProtocolError::LengthMismatch {
                expected: PARAMETERS_WIRE_LEN,
                actual: payload.len(),
            });
        }
        let mut rd = Reader::new(payload);
        Ok(Self {
            version: rd.get_u16()?,
            chunk_size: rd.get_u16()?,
            max_file_size: rd.get_u16()?,
            keep_alive_ms: rd.get_u16()?,
            burst_length: rd.get_u16()?,
        })
    }

    /// Largest parameter set both peers can serve.
    ///
    /// Elementwise minimum of the two sets, then `max_file_size` is capped to
    /// what the chunk bitmap can address (`chunk_size × CHUNK_COUNT_MAX`) and
    /// `burst_length` to the chunk count of a maximal file. Commutative and
    /// idempotent, so a compromise recomputed against either input is itself.
    #[must_use]
    pub fn best_common(&self, other: &Self) -> Self {
        let chunk_size = self.chunk_size.min(other.chunk_size);
        let addressable = u32::from(chunk_size) * CHUNK_COUNT_MAX as u32;
        let max_file_size =
            u32::from(self.max_file_size.min(other.max_file_size)).min(addressable) as u16;
        let burst_cap = if chunk_size == 0 {
            0
        } else {
            max_file_size / chunk_size
        };
        Self {
            version: self.version.min(other.version),
            chunk_size,
            max_file_size,
            keep_alive_ms: self.keep_alive_ms.min(other.keep_alive_ms),
            burst_length: self.burst_length.min(other.burst_length).min(burst_cap),
        }
    }
}

/// File announcement carried by a `NEW_FILE_START` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// File size in bytes.
    pub size: u16,
    /// File name: UTF-8, at most [`FILENAME_MAX`] bytes.
    pub name: String,
}

impl FileInfo {
    /// Parse `size:u16, nameLen:u8, name[nameLen]`.
    ///
    /// A trailing NUL counted in `nameLen` is tolerated and stripped.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::BufferExhausted`] if the record is truncated
    /// - [`ProtocolError::NameTooLong`] past [`FILENAME_MAX`]
    /// - [`ProtocolError::NameEncoding`] for non-UTF-8 names
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut rd = Reader::new(payload);
        let size = rd.get_u16()?;
        let name_len = usize::from(rd.get_u8()?);
        let raw = rd.take(name_len)?;
        let raw = raw.strip_suffix(&[0]).unwrap_or(raw);
        if raw.len() > FILENAME_MAX {
            return Err(ProtocolError::NameTooLong {
                len: raw.len(),
                max: FILENAME_MAX,
            });
        }
        let name = std::str::from_utf8(raw)
            .map_err(|_| ProtocolError::NameEncoding)?
            .to_owned();
        Ok(Self { size, name })
    }

    /// Serialize into `out`, returning the record length.
    ///
    /// The emitted `nameLen` includes a trailing NUL, matching what the
    /// parser tolerates.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::NameTooLong`] past [`FILENAME_MAX`]
    /// - [`ProtocolError::BufferExhausted`] if `out` is too small
    pub fn encode(&self, out: &mut [u8]) -> Result<usize> {
        let name = self.name.as_bytes();
        if name.len() > FILENAME_MAX {
            return Err(ProtocolError::NameTooLong {
                len: name.len(),
                max: FILENAME_MAX,
            });
        }
        let mut wr = Writer::new(out);
        wr.put_u16(self.size)?;
        wr.put_u8((name.len() + 1) as u8)?;
        wr.put_slice(name)?;
        wr.put_u8(0)?;
        Ok(wr.position())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_round_trip() {
        let params = Parameters {
            version: 3,
            chunk_size: 64,
            max_file_size: 16_000,
            keep_alive_ms: 250,
            burst_length: 2,
        };
        assert_eq!(Parameters::from_wire(&params.to_wire()).unwrap(), params);
    }

    #[test]
    fn parameters_wire_is_little_endian_in_field_order() {
        let wire = Parameters::default().to_wire();
        assert_eq!(wire[0..2], [0x00, 0x00]); // version 0
        assert_eq!(wire[2..4], [0x70, 0x00]); // chunk size 112
        assert_eq!(wire[4..6], 28_000u16.to_le_bytes()); // max file size
        assert_eq!(wire[6..8], [0xE8, 0x03]); // keepalive 1000
        assert_eq!(wire[8..10], [0x04, 0x00]); // burst 4
    }

    #[test]
    fn from_wire_rejects_wrong_length() {
        assert!(matches!(
            Parameters::from_wire(&[0u8; 9]),
            Err(ProtocolError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn best_common_downgrades_to_the_smaller_peer() {
        let master = Parameters::default();
        let slave = Parameters {
            chunk_size: 64,
            ..Parameters::default()
        };
        let common = master.best_common(&slave);
        assert_eq!(common.chunk_size, 64);
        // Capped to what 250 chunks of 64 bytes can address.
        assert_eq!(common.max_file_size, 16_000);
        assert_eq!(common, slave.best_common(&master));
    }

    #[test]
    fn best_common_caps_burst_to_chunk_count() {
        let a = Parameters {
            chunk_size: 100,
            max_file_size: 250,
            burst_length: 10,
            ..Parameters::default()
        };
        let common = a.best_common(&a);
        assert_eq!(common.burst_length, 2);
    }

    #[test]
    fn best_common_survives_zero_chunk_size() {
        let degenerate = Parameters {
            chunk_size: 0,
            ..Parameters::default()
        };
        let common = degenerate.best_common(&Parameters::default());
        assert_eq!(common.chunk_size, 0);
        assert_eq!(common.max_file_size, 0);
        assert_eq!(common.burst_length, 0);
    }

    #[test]
    fn file_info_matches_the_wire_literal() {
        // size=345, nameLen=3 (incl NUL), "f0\0"
        let info = FileInfo {
            size: 345,
            name: "f0".to_owned(),
        };
        let mut buf = [0u8; FILE_INFO_MAX];
        let len = info.encode(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[0x59, 0x01, 0x03, 0x66, 0x30, 0x00]);
        assert_eq!(FileInfo::parse(&buf[..len]).unwrap(), info);
    }

    #[test]
    fn file_info_tolerates_missing_nul() {
        let payload = [0x10, 0x00, 0x02, b'a', b'b'];
        let info = FileInfo::parse(&payload).unwrap();
        assert_eq!(info.name, "ab");
        assert_eq!(info.size, 0x10);
    }

    #[test]
    fn file_info_rejects_over_long_names() {
        let info = FileInfo {
            size: 1,
            name: "x".repeat(FILENAME_MAX + 1),
        };
        let mut buf = [0u8; 64];
        assert!(matches!(
            info.encode(&mut buf),
            Err(ProtocolError::NameTooLong { .. })
        ));
    }

    #[test]
    fn file_info_rejects_truncated_records() {
        assert!(matches!(
            FileInfo::parse(&[0x10, 0x00, 0x05, b'a']),
            Err(ProtocolError::BufferExhausted { .. })
        ));
    }
}
