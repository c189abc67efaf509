//! Adaptation interface: the capability bundle a session calls out to.
//!
//! Decouples the protocol engine from the device, the file system and the
//! clock. Production implementations wrap a serial port or socket and real
//! files; test environments substitute in-memory queues and a virtual clock.
//! The original design exposed this as a table of C function pointers; here
//! it is a trait the session owns.

use thiserror::Error;

/// Errors surfaced by an [`Environment`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    /// Named device or file does not exist or cannot be opened.
    #[error("no such device or file: {0}")]
    NotFound(String),

    /// Handle does not refer to an open file.
    #[error("invalid file handle")]
    InvalidHandle,

    /// Underlying I/O failed.
    #[error("i/o error: {0}")]
    Io(String),
}

/// Opaque handle to a file opened through the environment.
///
/// The wrapped value is implementation-defined — a slot index, a file
/// descriptor, whatever the environment uses to find the file again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle(pub u32);

/// A file the environment offers for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    /// Name announced to the peer (at most `FILENAME_MAX` bytes of UTF-8).
    pub name: String,
    /// File size in bytes.
    pub size: u16,
}

/// Capability bundle the protocol engine consumes.
///
/// # Contract
///
/// - `link_read`/`link_write` must not block beyond a short device timeout;
///   the engine treats a read error as "no bytes available this step" and a
///   write error as loss of that one frame.
/// - File offsets are absolute; chunk writes may arrive more than once for
///   the same offset and must be idempotent.
/// - `now_ms` is monotonic within a session's lifetime.
pub trait Environment {
    /// Open the device this session talks through. Called once, at session
    /// construction.
    fn link_open(&mut self, name: &str) -> Result<(), EnvError>;

    /// Release the device. Called at session teardown.
    fn link_close(&mut self) -> Result<(), EnvError>;

    /// Read whatever bytes are available, up to `buf.len()`. `Ok(0)` means
    /// no data right now.
    fn link_read(&mut self, buf: &mut [u8]) -> Result<usize, EnvError>;

    /// Write one complete on-wire frame. An error means the frame is lost.
    fn link_write(&mut self, frame: &[u8]) -> Result<(), EnvError>;

    /// Open a file for chunk reads; returns its handle and size in bytes.
    fn file_open_read(&mut self, name: &str) -> Result<(FileHandle, u32), EnvError>;

    /// Open (create or truncate) a destination file. `size` is the announced
    /// final size and may be used to pre-allocate.
    fn file_open_write(&mut self, name: &str, size: u32) -> Result<FileHandle, EnvError>;

    /// Close a file handle.
    fn file_close(&mut self, file: FileHandle) -> Result<(), EnvError>;

    /// Read up to `buf.len()` bytes at the absolute `offset`; returns the
    /// count actually read.
    fn file_read(&mut self, file: FileHandle, offset: u32, buf: &mut [u8])
    -> Result<usize, EnvError>;

    /// Write all of `data` at the absolute `offset`.
    fn file_write(&mut self, file: FileHandle, offset: u32, data: &[u8]) -> Result<(), EnvError>;

    /// Availability probe: the next file waiting to be sent, if any. Polled
    /// on idle TX steps; returning `Some` hands the file over to the engine.
    fn poll_outgoing(&mut self) -> Option<OutgoingFile>;

    /// Monotonic millisecond clock, for keepalive pacing.
    fn now_ms(&self) -> u64;
}
