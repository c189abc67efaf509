//! In-memory environment: files as byte vectors, the link as wires, time as
//! a virtual clock.

use std::{cell::RefCell, collections::HashMap, collections::VecDeque, rc::Rc};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thermit_core::{EnvError, Environment, FileHandle, OutgoingFile};

use crate::{link::Wire, runner::VirtualClock};

/// Seeded line-noise model applied to received bytes.
#[derive(Debug)]
struct Noise {
    rng: ChaCha8Rng,
    flips_per_mille: u32,
}

#[derive(Debug)]
struct OpenFile {
    name: String,
    writable: bool,
}

#[derive(Debug)]
struct MemEnvInner {
    link_name: Option<String>,
    rx: Wire,
    tx: Wire,
    files: HashMap<String, Vec<u8>>,
    open: Vec<Option<OpenFile>>,
    outbox: VecDeque<OutgoingFile>,
    clock: VirtualClock,
    fail_file_opens: bool,
    noise: Option<Noise>,
}

/// Shared-handle in-memory environment.
///
/// Clones share state, so a test can keep one handle while the session owns
/// another: queue outbound files, inspect written destinations and toggle
/// fault injection between steps.
#[derive(Debug, Clone)]
pub struct MemEnv {
    inner: Rc<RefCell<MemEnvInner>>,
}

impl MemEnv {
    /// Environment reading from `rx`, writing to `tx`, on `clock` time.
    #[must_use]
    pub fn new(rx: Wire, tx: Wire, clock: VirtualClock) -> Self {
        Self {
            inner: Rc::new(RefCell::new(MemEnvInner {
                link_name: None,
                rx,
                tx,
                files: HashMap::new(),
                open: Vec::new(),
                outbox: VecDeque::new(),
                clock,
                fail_file_opens: false,
                noise: None,
            })),
        }
    }

    /// Put a file into this endpoint's file system.
    pub fn insert_file(&self, name: &str, data: &[u8]) {
        self.inner
            .borrow_mut()
            .files
            .insert(name.to_owned(), data.to_vec());
    }

    /// Contents of a file, if it exists.
    #[must_use]
    pub fn file_contents(&self, name: &str) -> Option<Vec<u8>> {
        self.inner.borrow().files.get(name).cloned()
    }

    /// Offer an existing file to the availability probe. Returns `false`
    /// when no such file is in the file system.
    pub fn queue_outgoing(&self, name: &str) -> bool {
        let mut inner = self.inner.borrow_mut();
        let Some(size) = inner.files.get(name).map(Vec::len) else {
            return false;
        };
        let outgoing = OutgoingFile {
            name: name.to_owned(),
            size: size as u16,
        };
        inner.outbox.push_back(outgoing);
        true
    }

    /// Make every subsequent file open fail (transfer-error injection).
    pub fn set_fail_file_opens(&self, fail: bool) {
        self.inner.borrow_mut().fail_file_opens = fail;
    }

    /// Flip roughly `flips_per_mille` of every thousand received bits,
    /// deterministically from `seed`. `None`-like zero disables nothing;
    /// call with `0` to keep the RNG but flip no bits.
    pub fn set_noise(&self, seed: u64, flips_per_mille: u32) {
        self.inner.borrow_mut().noise = Some(Noise {
            rng: ChaCha8Rng::seed_from_u64(seed),
            flips_per_mille,
        });
    }

    /// Name the session opened its link under, while open.
    #[must_use]
    pub fn link_name(&self) -> Option<String> {
        self.inner.borrow().link_name.clone()
    }

    /// Number of files currently held open through this environment.
    #[must_use]
    pub fn open_files(&self) -> usize {
        self.inner
            .borrow()
            .open
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }
}

impl Environment for MemEnv {
    fn link_open(&mut self, name: &str) -> Result<(), EnvError> {
        self.inner.borrow_mut().link_name = Some(name.to_owned());
        Ok(())
    }

    fn link_close(&mut self) -> Result<(), EnvError> {
        self.inner.borrow_mut().link_name = None;
        Ok(())
    }

    fn link_read(&mut self, buf: &mut [u8]) -> Result<usize, EnvError> {
        let mut inner = self.inner.borrow_mut();
        let mut count = 0;
        while count < buf.len() {
            let Some(mut byte) = inner.rx.pop() else {
                break;
            };
            if let Some(noise) = inner.noise.as_mut() {
                if noise.rng.gen_range(0..1000) < noise.flips_per_mille {
                    byte ^= 1 << noise.rng.gen_range(0..8u8);
                }
            }
            buf[count] = byte;
            count += 1;
        }
        Ok(count)
    }

    fn link_write(&mut self, frame: &[u8]) -> Result<(), EnvError> {
        self.inner.borrow().tx.push_slice(frame);
        Ok(())
    }

    fn file_open_read(&mut self, name: &str) -> Result<(FileHandle, u32), EnvError> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_file_opens {
            return Err(EnvError::Io("injected open failure".to_owned()));
        }
        let Some(size) = inner.files.get(name).map(Vec::len) else {
            return Err(EnvError::NotFound(name.to_owned()));
        };
        let handle = FileHandle(inner.open.len() as u32);
        inner.open.push(Some(OpenFile {
            name: name.to_owned(),
            writable: false,
        }));
        Ok((handle, size as u32))
    }

    fn file_open_write(&mut self, name: &str, size: u32) -> Result<FileHandle, EnvError> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_file_opens {
            return Err(EnvError::Io("injected open failure".to_owned()));
        }
        // Pre-allocate to the announced size; chunks land at their offsets.
        inner
            .files
            .insert(name.to_owned(), vec![0; size as usize]);
        let handle = FileHandle(inner.open.len() as u32);
        inner.open.push(Some(OpenFile {
            name: name.to_owned(),
            writable: true,
        }));
        Ok(handle)
    }

    fn file_close(&mut self, file: FileHandle) -> Result<(), EnvError> {
        let mut inner = self.inner.borrow_mut();
        match inner.open.get_mut(file.0 as usize) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                Ok(())
            }
            _ => Err(EnvError::InvalidHandle),
        }
    }

    fn file_read(
        &mut self,
        file: FileHandle,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<usize, EnvError> {
        let inner = self.inner.borrow();
        let Some(Some(open)) = inner.open.get(file.0 as usize) else {
            return Err(EnvError::InvalidHandle);
        };
        let Some(data) = inner.files.get(&open.name) else {
            return Err(EnvError::NotFound(open.name.clone()));
        };
        let start = (offset as usize).min(data.len());
        let end = (start + buf.len()).min(data.len());
        buf[..end - start].copy_from_slice(&data[start..end]);
        Ok(end - start)
    }

    fn file_write(&mut self, file: FileHandle, offset: u32, data: &[u8]) -> Result<(), EnvError> {
        let mut inner = self.inner.borrow_mut();
        let Some(Some(open)) = inner.open.get(file.0 as usize) else {
            return Err(EnvError::InvalidHandle);
        };
        if !open.writable {
            return Err(EnvError::Io("file is open read-only".to_owned()));
        }
        let name = open.name.clone();
        let Some(contents) = inner.files.get_mut(&name) else {
            return Err(EnvError::NotFound(name));
        };
        let end = offset as usize + data.len();
        if contents.len() < end {
            contents.resize(end, 0);
        }
        contents[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn poll_outgoing(&mut self) -> Option<OutgoingFile> {
        self.inner.borrow_mut().outbox.pop_front()
    }

    fn now_ms(&self) -> u64 {
        self.inner.borrow().clock.now()
    }
}
