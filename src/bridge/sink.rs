//! Capture sinks: where ingest writes TDM bytes.

use crate::bridge::{fifo, Session};
use crate::error::BridgeError;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Outcome of one write to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The reader went away. Nothing of this write is assumed to have arrived.
    StreamClosed,
}

pub trait TdmSink {
    fn deliver(&mut self, bytes: &[u8]) -> Result<Delivery, BridgeError>;

    /// Re-establish the stream after [`Delivery::StreamClosed`]. Blocks until it is usable.
    fn reopen(&mut self, session: &Session) -> Result<(), BridgeError>;

    fn flush(&mut self) -> Result<(), BridgeError>;
}

/// Regular file sink.
pub struct FileSink {
    out: BufWriter<File>,
    path: PathBuf,
}

impl FileSink {
    /// Open for appending, creating the file if needed.
    pub fn append(path: &Path) -> Result<Self, BridgeError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::wrap(file, path))
    }

    /// Open and truncate.
    pub fn create(path: &Path) -> Result<Self, BridgeError> {
        let file = File::create(path)?;
        Ok(Self::wrap(file, path))
    }

    fn wrap(file: File, path: &Path) -> Self {
        tracing::info!(file = %path.display(), "writing to file");
        FileSink {
            out: BufWriter::new(file),
            path: path.to_path_buf(),
        }
    }
}

impl TdmSink for FileSink {
    fn deliver(&mut self, bytes: &[u8]) -> Result<Delivery, BridgeError> {
        self.out.write_all(bytes)?;
        Ok(Delivery::Delivered)
    }

    fn reopen(&mut self, _session: &Session) -> Result<(), BridgeError> {
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.out = BufWriter::new(file);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), BridgeError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Named pipe sink. Creating it waits for a reader; a reader disconnect yields
/// [`Delivery::StreamClosed`] and [`TdmSink::reopen`] replaces the pipe with a fresh one.
pub struct PipeSink {
    path: PathBuf,
    out: Option<File>,
    stale: Option<File>,
}

impl PipeSink {
    pub fn open(path: &Path, session: &Session) -> Result<Self, BridgeError> {
        fifo::ensure(path)?;
        let out = fifo::open_writer(path, session)?;
        Ok(PipeSink {
            path: path.to_path_buf(),
            out: Some(out),
            stale: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TdmSink for PipeSink {
    fn deliver(&mut self, bytes: &[u8]) -> Result<Delivery, BridgeError> {
        let Some(out) = self.out.as_mut() else {
            return Ok(Delivery::StreamClosed);
        };
        match out.write_all(bytes) {
            Ok(()) => Ok(Delivery::Delivered),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                self.stale = self.out.take();
                Ok(Delivery::StreamClosed)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn reopen(&mut self, session: &Session) -> Result<(), BridgeError> {
        // the old handle stays open until the new FIFO exists so the path gets a new inode
        fifo::recreate(&self.path)?;
        self.stale = None;
        self.out = Some(fifo::open_writer(&self.path, session)?);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), BridgeError> {
        if let Some(out) = self.out.as_mut() {
            match out.flush() {
                Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }
}

/// In-memory sink.
#[derive(Debug, Default)]
pub struct VecSink {
    pub bytes: Vec<u8>,
    pub deliveries: u64,
}

impl TdmSink for VecSink {
    fn deliver(&mut self, bytes: &[u8]) -> Result<Delivery, BridgeError> {
        self.bytes.extend_from_slice(bytes);
        self.deliveries += 1;
        Ok(Delivery::Delivered)
    }

    fn reopen(&mut self, _session: &Session) -> Result<(), BridgeError> {
        Ok(())
    }

    fn flush(&mut self) -> Result<(), BridgeError> {
        Ok(())
    }
}

/// Open a sink at `path`: a named pipe when one exists there or `pipe` is set, a file otherwise.
/// Files are appended to unless `truncate` is set.
pub fn open_sink(path: &Path, pipe: bool, truncate: bool, session: &Session) -> Result<Box<dyn TdmSink>, BridgeError> {
    use std::os::unix::fs::FileTypeExt;
    let is_fifo = std::fs::metadata(path)
        .map(|m| m.file_type().is_fifo())
        .unwrap_or(false);
    if pipe || is_fifo {
        Ok(Box::new(PipeSink::open(path, session)?))
    } else if truncate {
        Ok(Box::new(FileSink::create(path)?))
    } else {
        Ok(Box::new(FileSink::append(path)?))
    }
}
