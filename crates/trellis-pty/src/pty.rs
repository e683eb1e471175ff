use std::io::{Read, Write};
use std::path::Path;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

/// Errors from PTY operations.
#[derive(Debug)]
pub enum PtyError {
    SpawnFailed(String),
    IoError(std::io::Error),
    ResizeFailed(String),
}

impl std::fmt::Display for PtyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PtyError::SpawnFailed(msg) => write!(f, "PTY spawn failed: {msg}"),
            PtyError::IoError(err) => write!(f, "PTY I/O error: {err}"),
            PtyError::ResizeFailed(msg) => write!(f, "PTY resize failed: {msg}"),
        }
    }
}

impl std::error::Error for PtyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PtyError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PtyError {
    fn from(err: std::io::Error) -> Self {
        PtyError::IoError(err)
    }
}

/// Owns a portable-pty child process, master pair, reader, and writer.
///
/// The reader is usually extracted with [`PtyHandle::take_reader`] and
/// handed to a dedicated I/O thread, since PTY reads are blocking.
/// [`PtyHandle::close`] drops the master side, which signals the child
/// with hangup/EOF and unblocks any pending read; [`PtyHandle::force_kill`]
/// is the hard fallback when the child ignores that.
pub struct PtyHandle {
    master: Option<Box<dyn MasterPty + Send>>,
    reader: Option<Box<dyn Read + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtyHandle {
    /// Spawn a new PTY running `shell` (or the user's default shell) with
    /// `working_dir` as its working directory.
    ///
    /// The working directory is validated up front so a bad path surfaces
    /// as a spawn failure rather than a shell that exits immediately.
    pub fn spawn(
        shell: Option<&str>,
        working_dir: &Path,
        cols: u16,
        rows: u16,
    ) -> Result<Self, PtyError> {
        if !working_dir.is_dir() {
            return Err(PtyError::SpawnFailed(format!(
                "working directory is not usable: {}",
                working_dir.display()
            )));
        }

        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let mut cmd = match shell {
            Some(s) => CommandBuilder::new(s),
            None => CommandBuilder::new(default_shell()),
        };
        cmd.cwd(working_dir);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(format!("failed to spawn command: {e}")))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to take writer: {e}")))?;

        Ok(Self {
            master: Some(pair.master),
            reader: Some(reader),
            writer: Some(writer),
            child,
        })
    }

    /// Extract the PTY reader for use in a dedicated I/O thread.
    ///
    /// Returns `None` if the reader was already taken or the PTY closed.
    pub fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    /// Resize the PTY to new dimensions.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        let master = self
            .master
            .as_ref()
            .ok_or_else(|| PtyError::ResizeFailed("PTY is closed".to_string()))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(format!("{e}")))
    }

    /// Write bytes to the PTY master (user input -> shell).
    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            PtyError::IoError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "PTY is closed",
            ))
        })?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Close the master side of the PTY.
    ///
    /// The child sees hangup/EOF and a blocked reader thread is released.
    /// The child process itself keeps running until it reacts to the
    /// hangup or is force-killed.
    pub fn close(&mut self) {
        self.writer.take();
        self.reader.take();
        self.master.take();
    }

    /// Kill the child process outright.
    pub fn force_kill(&mut self) {
        if let Err(e) = self.child.kill() {
            log::warn!("failed to kill PTY child: {e}");
        }
    }

    /// Check if the child process is still alive.
    pub fn is_alive(&mut self) -> bool {
        self.try_wait().is_none()
    }

    /// Get the child process exit status if it has exited.
    ///
    /// Returns `None` if the process is still running.
    pub fn try_wait(&mut self) -> Option<u32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }

    /// Block until the child exits and return its exit code.
    pub fn wait(&mut self) -> Option<u32> {
        self.child.wait().ok().map(|status| status.exit_code())
    }
}

/// Returns the user's default shell, falling back to `/bin/sh`.
fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}
