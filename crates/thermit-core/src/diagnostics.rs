//! Session diagnostics counters.

/// Lifetime counters carried by a session.
///
/// Counters only ever increase; re-sync does not clear them. The framer's
/// CRC drop count is folded in when read through
/// [`crate::Session::diagnostics`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Diagnostics {
    /// Files fully received and closed.
    pub received_files: u32,
    /// Payload bytes written to destination files.
    pub received_bytes: u64,
    /// Files fully sent and acknowledged by the peer.
    pub sent_files: u32,
    /// Payload bytes read from source files and emitted.
    pub sent_bytes: u64,
    /// Inbound frames dropped on checksum mismatch.
    pub crc_errors: u64,
    /// Chunks re-emitted on a wrap-to-first-dirty pass.
    pub retransmits: u32,
    /// Times the session fell out of sync and renegotiated.
    pub reconnections: u32,
    /// Outbound frames lost to device write failures.
    pub link_errors: u32,
}
