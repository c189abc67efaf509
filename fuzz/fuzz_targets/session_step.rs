//! Fuzz target for the session step driver.
//!
//! Drives a session of each role over an arbitrary inbound byte stream.
//! `step` must stay total and the state must stay inside the declared set,
//! no matter what arrives on the line.

#![no_main]

use libfuzzer_sys::fuzz_target;
use thermit_core::{EnvError, Environment, FileHandle, OutgoingFile, Role, Session, State};

/// Link that replays the fuzz input and swallows everything written.
struct FuzzEnv {
    data: Vec<u8>,
    pos: usize,
}

impl Environment for FuzzEnv {
    fn link_open(&mut self, _name: &str) -> Result<(), EnvError> {
        Ok(())
    }
    fn link_close(&mut self) -> Result<(), EnvError> {
        Ok(())
    }
    fn link_read(&mut self, buf: &mut [u8]) -> Result<usize, EnvError> {
        let rest = &self.data[self.pos..];
        let count = rest.len().min(buf.len()).min(17);
        buf[..count].copy_from_slice(&rest[..count]);
        self.pos += count;
        Ok(count)
    }
    fn link_write(&mut self, _frame: &[u8]) -> Result<(), EnvError> {
        Ok(())
    }
    fn file_open_read(&mut self, name: &str) -> Result<(FileHandle, u32), EnvError> {
        Err(EnvError::NotFound(name.to_owned()))
    }
    fn file_open_write(&mut self, name: &str, _size: u32) -> Result<FileHandle, EnvError> {
        Err(EnvError::NotFound(name.to_owned()))
    }
    fn file_close(&mut self, _file: FileHandle) -> Result<(), EnvError> {
        Ok(())
    }
    fn file_read(
        &mut self,
        _file: FileHandle,
        _offset: u32,
        _buf: &mut [u8],
    ) -> Result<usize, EnvError> {
        Err(EnvError::InvalidHandle)
    }
    fn file_write(&mut self, _file: FileHandle, _offset: u32, _data: &[u8]) -> Result<(), EnvError> {
        Err(EnvError::InvalidHandle)
    }
    fn poll_outgoing(&mut self) -> Option<OutgoingFile> {
        None
    }
    fn now_ms(&self) -> u64 {
        // Monotonic enough: consumed input only ever grows.
        self.pos as u64
    }
}

fuzz_target!(|data: &[u8]| {
    for role in [Role::Master, Role::Slave] {
        let env = FuzzEnv {
            data: data.to_vec(),
            pos: 0,
        };
        let Ok(mut session) = Session::new("fuzz0", role, env) else {
            return;
        };
        for _ in 0..96 {
            let state = session.step();
            assert!(matches!(
                state,
                State::SyncFirst | State::SyncSecond | State::Running | State::OutOfSync
            ));
        }
    }
});
