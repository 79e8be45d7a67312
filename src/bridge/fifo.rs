//! Named pipe helpers.

use crate::bridge::Session;
use crate::error::BridgeError;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::stat::Mode;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::thread;
use std::time::Duration;

const OPEN_RETRY: Duration = Duration::from_millis(50);

/// Create a FIFO at `path` unless one already exists there.
pub fn ensure(path: &Path) -> Result<(), BridgeError> {
    match std::fs::metadata(path) {
        Ok(m) if m.file_type().is_fifo() => Ok(()),
        Ok(_) => Err(BridgeError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a named pipe", path.display()),
        ))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => make(path),
        Err(e) => Err(e.into()),
    }
}

/// Replace whatever is at `path` with a fresh FIFO.
pub fn recreate(path: &Path) -> Result<(), BridgeError> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    make(path)
}

fn make(path: &Path) -> Result<(), BridgeError> {
    nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o644)).map_err(|e| BridgeError::Io(e.into()))?;
    tracing::info!(pipe = %path.display(), "created named pipe");
    Ok(())
}

/// Open the write end, waiting for a reader. Polls the shutdown flag while waiting.
/// The returned handle is in blocking mode.
pub fn open_writer(path: &Path, session: &Session) -> Result<File, BridgeError> {
    let mut logged = false;
    loop {
        if session.is_shutdown() {
            return Err(BridgeError::Interrupted);
        }
        let attempt = OpenOptions::new()
            .write(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(path);
        match attempt {
            Ok(file) => {
                fcntl(file.as_raw_fd(), FcntlArg::F_SETFL(OFlag::empty())).map_err(|e| BridgeError::Io(e.into()))?;
                tracing::info!(pipe = %path.display(), "reader connected");
                return Ok(file);
            }
            // ENXIO: no reader yet
            Err(e) if e.raw_os_error() == Some(nix::errno::Errno::ENXIO as i32) => {
                if !logged {
                    tracing::info!(pipe = %path.display(), "waiting for a reader");
                    logged = true;
                }
                thread::sleep(OPEN_RETRY);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Open the read end. Blocks until a writer attaches.
pub fn open_reader(path: &Path) -> Result<File, BridgeError> {
    tracing::info!(pipe = %path.display(), "waiting for a writer");
    let file = File::open(path)?;
    tracing::info!(pipe = %path.display(), "writer connected");
    Ok(file)
}
