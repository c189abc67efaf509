//! TCP-link environment over real files.
//!
//! The link name handed to the session is the socket address: a listening
//! endpoint accepts one peer, a connecting endpoint dials out. The stream is
//! switched to non-blocking afterwards so `link_read` never stalls a step.

use std::{
    collections::{HashMap, VecDeque},
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    net::{TcpListener, TcpStream},
    path::{Path, PathBuf},
    time::Instant,
};

use thermit_core::{EnvError, Environment, FileHandle, OutgoingFile};
use tracing::{debug, info};

/// How the endpoint obtains its TCP link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Bind the address and accept one peer.
    Listen,
    /// Dial the address.
    Connect,
}

/// Environment backed by one TCP stream and the local file system.
pub struct TcpEnv {
    mode: LinkMode,
    stream: Option<TcpStream>,
    out_dir: PathBuf,
    /// Announced name → source path for files offered via `--send`.
    sources: HashMap<String, PathBuf>,
    outbox: VecDeque<OutgoingFile>,
    open: Vec<Option<File>>,
    started: Instant,
}

impl TcpEnv {
    /// Environment that will open its link in `mode` and write received
    /// files under `out_dir`.
    #[must_use]
    pub fn new(mode: LinkMode, out_dir: PathBuf) -> Self {
        Self {
            mode,
            stream: None,
            out_dir,
            sources: HashMap::new(),
            outbox: VecDeque::new(),
            open: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Offer a local file to the availability probe under its base name.
    ///
    /// # Errors
    ///
    /// [`EnvError`] when the file is missing, oversized for the protocol's
    /// 16-bit sizes, or has no usable base name.
    pub fn offer_file(&mut self, path: &Path) -> Result<(), EnvError> {
        let metadata =
            std::fs::metadata(path).map_err(|err| EnvError::Io(err.to_string()))?;
        let size = u16::try_from(metadata.len())
            .map_err(|_| EnvError::Io(format!("{} exceeds 65535 bytes", path.display())))?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| EnvError::NotFound(path.display().to_string()))?
            .to_owned();
        self.sources.insert(name.clone(), path.to_path_buf());
        self.outbox.push_back(OutgoingFile { name, size });
        Ok(())
    }

    /// Strip any path components from a peer-announced name and anchor it in
    /// the output directory.
    fn destination(&self, announced: &str) -> Result<PathBuf, EnvError> {
        let base = Path::new(announced)
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| EnvError::NotFound(announced.to_owned()))?;
        Ok(self.out_dir.join(base))
    }

    fn slot(&mut self, file: File) -> FileHandle {
        let handle = FileHandle(self.open.len() as u32);
        self.open.push(Some(file));
        handle
    }

    fn open_file(&mut self, handle: FileHandle) -> Result<&mut File, EnvError> {
        self.open
            .get_mut(handle.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(EnvError::InvalidHandle)
    }
}

impl Environment for TcpEnv {
    fn link_open(&mut self, name: &str) -> Result<(), EnvError> {
        let stream = match self.mode {
            LinkMode::Listen => {
                let listener =
                    TcpListener::bind(name).map_err(|err| EnvError::Io(err.to_string()))?;
                info!(addr = name, "waiting for a peer");
                let (stream, peer) = listener
                    .accept()
                    .map_err(|err| EnvError::Io(err.to_string()))?;
                info!(%peer, "peer connected");
                stream
            }
            LinkMode::Connect => {
                let stream =
                    TcpStream::connect(name).map_err(|err| EnvError::Io(err.to_string()))?;
                info!(addr = name, "connected");
                stream
            }
        };
        stream
            .set_nonblocking(true)
            .map_err(|err| EnvError::Io(err.to_string()))?;
        stream.set_nodelay(true).ok();
        self.stream = Some(stream);
        Ok(())
    }

    fn link_close(&mut self) -> Result<(), EnvError> {
        self.stream = None;
        Ok(())
    }

    fn link_read(&mut self, buf: &mut [u8]) -> Result<usize, EnvError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(EnvError::Io("link not open".to_owned()));
        };
        match stream.read(buf) {
            Ok(count) => Ok(count),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(err) => Err(EnvError::Io(err.to_string())),
        }
    }

    fn link_write(&mut self, frame: &[u8]) -> Result<(), EnvError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(EnvError::Io("link not open".to_owned()));
        };
        stream
            .write_all(frame)
            .map_err(|err| EnvError::Io(err.to_string()))
    }

    fn file_open_read(&mut self, name: &str) -> Result<(FileHandle, u32), EnvError> {
        let path = self
            .sources
            .get(name)
            .cloned()
            .ok_or_else(|| EnvError::NotFound(name.to_owned()))?;
        let file = File::open(&path).map_err(|err| EnvError::Io(err.to_string()))?;
        let size = file
            .metadata()
            .map_err(|err| EnvError::Io(err.to_string()))?
            .len();
        let size = u32::try_from(size).map_err(|_| EnvError::Io("file too large".to_owned()))?;
        debug!(name, path = %path.display(), size, "source file opened");
        Ok((self.slot(file), size))
    }

    fn file_open_write(&mut self, name: &str, size: u32) -> Result<FileHandle, EnvError> {
        let path = self.destination(name)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|err| EnvError::Io(err.to_string()))?;
        file.set_len(u64::from(size)).ok();
        info!(name, path = %path.display(), size, "receiving file");
        Ok(self.slot(file))
    }

    fn file_close(&mut self, file: FileHandle) -> Result<(), EnvError> {
        match self.open.get_mut(file.0 as usize) {
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
        let file = self.open_file(file)?;
        file.seek(SeekFrom::Start(u64::from(offset)))
            .map_err(|err| EnvError::Io(err.to_string()))?;
        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(count) => total += count,
                Err(err) => return Err(EnvError::Io(err.to_string())),
            }
        }
        Ok(total)
    }

    fn file_write(&mut self, file: FileHandle, offset: u32, data: &[u8]) -> Result<(), EnvError> {
        let file = self.open_file(file)?;
        file.seek(SeekFrom::Start(u64::from(offset)))
            .map_err(|err| EnvError::Io(err.to_string()))?;
        file.write_all(data)
            .map_err(|err| EnvError::Io(err.to_string()))
    }

    fn poll_outgoing(&mut self) -> Option<OutgoingFile> {
        self.outbox.pop_front()
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}
