//! Per-direction transfer progress: the dirty-chunk bitmap and chunk math.

use thermit_proto::{CHUNK_COUNT_MAX, FILEID_INACTIVE};

use crate::{env::FileHandle, error::SessionError};

/// Bytes in the chunk status bitmap.
const CHUNK_STATUS_BYTES: usize = CHUNK_COUNT_MAX.div_ceil(8);

/// Progress record for one transfer direction.
///
/// Idle (not running) between transfers. While a transfer runs, one bit per
/// chunk tracks completion: a set bit means the chunk is still dirty — not
/// yet written on the receive side, not yet acknowledged on the send side.
///
/// # Invariants
///
/// - Bits at indices `>= chunks_needed` are always zero.
/// - `chunks_needed == ceil(file_size / chunk_size)` for the chunk size the
///   transfer was armed with.
#[derive(Debug, Clone)]
pub struct Progress {
    running: bool,
    file_size: u16,
    file: Option<FileHandle>,
    file_id: u8,
    chunk_no: u8,
    file_name: String,
    chunk_status: [u8; CHUNK_STATUS_BYTES],
    chunks_needed: u8,
    percent_per_chunk_x100: u16,
}

impl Default for Progress {
    fn default() -> Self {
        Self::idle()
    }
}

impl Progress {
    /// Idle record: no transfer in this direction.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            running: false,
            file_size: 0,
            file: None,
            file_id: FILEID_INACTIVE,
            chunk_no: 0,
            file_name: String::new(),
            chunk_status: [0; CHUNK_STATUS_BYTES],
            chunks_needed: 0,
            percent_per_chunk_x100: 0,
        }
    }

    /// Arm the record for a transfer of `file_size` bytes in
    /// `chunk_size`-byte chunks, marking every chunk dirty and the cursor at
    /// chunk zero.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidTransfer`] when `chunk_size` is zero or the
    /// file needs more chunks than the bitmap addresses.
    pub fn begin(
        &mut self,
        file: FileHandle,
        file_id: u8,
        name: &str,
        file_size: u16,
        chunk_size: u16,
    ) -> Result<(), SessionError> {
        if chunk_size == 0 {
            return Err(SessionError::InvalidTransfer {
                reason: "chunk size is zero",
            });
        }
        let needed = usize::from(file_size).div_ceil(usize::from(chunk_size));
        if needed > CHUNK_COUNT_MAX {
            return Err(SessionError::InvalidTransfer {
                reason: "file needs more chunks than the bitmap addresses",
            });
        }

        self.running = true;
        self.file_size = file_size;
        self.file = Some(file);
        self.file_id = file_id;
        self.chunk_no = 0;
        self.file_name.clear();
        self.file_name.push_str(name);
        self.chunk_status = [0; CHUNK_STATUS_BYTES];
        for chunk in 0..needed {
            self.chunk_status[chunk / 8] |= 1 << (chunk % 8);
        }
        self.chunks_needed = needed as u8;
        self.percent_per_chunk_x100 = if needed == 0 {
            10_000
        } else {
            (10_000 / needed) as u16
        };
        Ok(())
    }

    /// Tear down to idle, forgetting the bitmap. The caller closes the file
    /// handle first.
    pub fn clear(&mut self) {
        *self = Self::idle();
    }

    /// True while a transfer is active in this direction.
    #[must_use]
    pub fn running(&self) -> bool {
        self.running
    }

    /// Size of the file in flight.
    #[must_use]
    pub fn file_size(&self) -> u16 {
        self.file_size
    }

    /// Open file handle, while a transfer is active.
    #[must_use]
    pub fn file(&self) -> Option<FileHandle> {
        self.file
    }

    /// Protocol file id of the transfer; `FILEID_INACTIVE` when idle.
    #[must_use]
    pub fn file_id(&self) -> u8 {
        self.file_id
    }

    /// Next-to-send chunk cursor (send side only).
    #[must_use]
    pub fn chunk_no(&self) -> u8 {
        self.chunk_no
    }

    pub(crate) fn set_chunk_no(&mut self, chunk_no: u8) {
        self.chunk_no = chunk_no;
    }

    /// Name of the file in flight.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Total chunks this transfer takes.
    #[must_use]
    pub fn chunks_needed(&self) -> u8 {
        self.chunks_needed
    }

    /// Mark `chunk` done (`true`) or dirty (`false`). Indices outside the
    /// transfer are ignored.
    pub fn set_chunk_status(&mut self, chunk: u8, done: bool) {
        if chunk >= self.chunks_needed {
            return;
        }
        let byte = usize::from(chunk) / 8;
        let bit = usize::from(chunk) % 8;
        if done {
            self.chunk_status[byte] &= !(1 << bit);
        } else {
            self.chunk_status[byte] |= 1 << bit;
        }
    }

    /// True when `chunk` is written/acknowledged (out-of-range chunks count
    /// as done).
    #[must_use]
    pub fn chunk_is_done(&self, chunk: u8) -> bool {
        if chunk >= self.chunks_needed {
            return true;
        }
        self.chunk_status[usize::from(chunk) / 8] & (1 << (usize::from(chunk) % 8)) == 0
    }

    /// Lowest chunk still dirty; `None` when the transfer is complete.
    /// Fully-acknowledged bytes of the bitmap are skipped in bulk.
    #[must_use]
    pub fn first_dirty(&self) -> Option<u8> {
        let bytes_in_use = usize::from(self.chunks_needed).div_ceil(8);
        for (index, &byte) in self.chunk_status[..bytes_in_use].iter().enumerate() {
            if byte != 0 {
                return Some((index * 8 + byte.trailing_zeros() as usize) as u8);
            }
        }
        None
    }

    /// True when no chunk in range is dirty.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.first_dirty().is_none()
    }

    /// Completion in hundredths of a percent (0..=10000).
    #[must_use]
    pub fn progress_x100(&self) -> u16 {
        let done = (0..self.chunks_needed)
            .filter(|&chunk| self.chunk_is_done(chunk))
            .count() as u16;
        (done * self.percent_per_chunk_x100).min(10_000)
    }
}

/// Byte offset of `chunk` within the file.
#[must_use]
pub fn chunk_offset(chunk: u8, chunk_size: u16) -> u32 {
    u32::from(chunk) * u32::from(chunk_size)
}

/// Length of `chunk` in a `file_size`-byte transfer: `chunk_size`, except a
/// short final chunk when the file size leaves a remainder.
#[must_use]
pub fn chunk_len(chunk: u8, file_size: u16, chunk_size: u16) -> u16 {
    if chunk_size == 0 {
        return 0;
    }
    let needed = file_size.div_ceil(chunk_size);
    let remainder = file_size % chunk_size;
    if u16::from(chunk) + 1 == needed && remainder != 0 {
        remainder
    } else {
        chunk_size
    }
}
