//! Egress sources: a regular file or named pipe of concatenated messages, framed minimally.

use crate::bridge::{fifo, Session};
use crate::error::{BridgeError, ProtocolError};
use crate::message::RawMessage;
use crate::reader::read_raw_message;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Message(RawMessage),
    /// A regular file is exhausted.
    EndOfStream,
    /// The pipe writer went away; reopen to continue.
    StreamClosed,
}

pub trait TdmSource {
    fn next_event(&mut self) -> Result<SourceEvent, BridgeError>;

    /// Re-establish the source after [`SourceEvent::StreamClosed`].
    fn reopen(&mut self, session: &Session) -> Result<(), BridgeError>;
}

/// Messages from any reader; end of input is [`SourceEvent::EndOfStream`].
pub struct ReaderSource<R> {
    inner: BufReader<R>,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(inner: R) -> Self {
        ReaderSource {
            inner: BufReader::new(inner),
        }
    }
}

impl ReaderSource<File> {
    pub fn open(path: &Path) -> Result<Self, BridgeError> {
        tracing::info!(file = %path.display(), "reading from file");
        Ok(ReaderSource::new(File::open(path)?))
    }
}

impl<R: Read> TdmSource for ReaderSource<R> {
    fn next_event(&mut self) -> Result<SourceEvent, BridgeError> {
        match read_raw_message(&mut self.inner)? {
            Some(m) => Ok(SourceEvent::Message(m)),
            None => Ok(SourceEvent::EndOfStream),
        }
    }

    fn reopen(&mut self, _session: &Session) -> Result<(), BridgeError> {
        Ok(())
    }
}

/// Named pipe source. End of input (clean or mid-message) means the writer closed.
pub struct PipeSource {
    path: PathBuf,
    inner: Option<BufReader<File>>,
}

impl PipeSource {
    /// Create the pipe if needed and wait for a writer.
    pub fn open(path: &Path) -> Result<Self, BridgeError> {
        fifo::ensure(path)?;
        let file = fifo::open_reader(path)?;
        Ok(PipeSource {
            path: path.to_path_buf(),
            inner: Some(BufReader::new(file)),
        })
    }
}

impl TdmSource for PipeSource {
    fn next_event(&mut self) -> Result<SourceEvent, BridgeError> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(SourceEvent::StreamClosed);
        };
        match read_raw_message(inner) {
            Ok(Some(m)) => Ok(SourceEvent::Message(m)),
            Ok(None) => {
                self.inner = None;
                Ok(SourceEvent::StreamClosed)
            }
            Err(ProtocolError::Truncated { context, got, .. }) => {
                tracing::warn!(context, got, "writer closed mid-message; partial message dropped");
                self.inner = None;
                Ok(SourceEvent::StreamClosed)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn reopen(&mut self, session: &Session) -> Result<(), BridgeError> {
        self.inner = None;
        if session.is_shutdown() {
            return Err(BridgeError::Interrupted);
        }
        fifo::recreate(&self.path)?;
        self.inner = Some(BufReader::new(fifo::open_reader(&self.path)?));
        Ok(())
    }
}

/// Open a source at `path`: a pipe when a FIFO exists there or `pipe` is set, a file otherwise.
pub fn open_source(path: &Path, pipe: bool) -> Result<Box<dyn TdmSource>, BridgeError> {
    use std::os::unix::fs::FileTypeExt;
    let is_fifo = std::fs::metadata(path)
        .map(|m| m.file_type().is_fifo())
        .unwrap_or(false);
    if pipe || is_fifo {
        Ok(Box::new(PipeSource::open(path)?))
    } else {
        Ok(Box::new(ReaderSource::open(path)?))
    }
}
