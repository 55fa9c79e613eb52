use std::io::{self, Read, Write};
use std::os::unix::io::RawFd;
use std::path::Path;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

/// Errors from PTY operations.
#[derive(Debug)]
pub enum PtyError {
    SpawnFailed(String),
    IoError(io::Error),
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

impl From<io::Error> for PtyError {
    fn from(err: io::Error) -> Self {
        PtyError::IoError(err)
    }
}

/// Owns a PTY child process, master pair, reader, and writer.
///
/// The master descriptor is switched to non-blocking mode at spawn time, so
/// reads and writes return `WouldBlock` instead of stalling the event loop.
pub struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    raw_fd: RawFd,
}

impl PtyHandle {
    /// Spawn a new PTY running the given shell with the given dimensions.
    ///
    /// If `shell` is `None`, uses the user's default shell (`$SHELL` or
    /// `/bin/sh`). An explicit shell path that does not exist is reported
    /// as a spawn failure without forking.
    pub fn spawn(shell: Option<&str>, rows: u16, cols: u16) -> Result<Self, PtyError> {
        if let Some(path) = shell {
            if !Path::new(path).exists() {
                return Err(PtyError::SpawnFailed(format!("no such shell: {path}")));
            }
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
        // The session buffer is line-oriented, not a terminal emulator.
        cmd.env("TERM", "dumb");

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

        let raw_fd = pair
            .master
            .as_raw_fd()
            .ok_or_else(|| PtyError::SpawnFailed("PTY master has no descriptor".to_string()))?;
        set_nonblocking(raw_fd)?;

        Ok(Self {
            master: pair.master,
            reader,
            writer,
            child,
            raw_fd,
        })
    }

    /// The pollable master descriptor. Valid for the lifetime of the handle.
    pub fn raw_fd(&self) -> RawFd {
        self.raw_fd
    }

    /// Resize the PTY to new dimensions. The kernel notifies the child's
    /// foreground process group of the change.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(format!("{e}")))
    }

    /// Write bytes to the PTY master (user input -> shell). Non-blocking:
    /// a full kernel buffer surfaces as `WouldBlock`.
    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.writer.write(data)
    }

    /// Read available bytes from the PTY master (shell output -> us).
    /// Non-blocking: returns `WouldBlock` when nothing is pending.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }

    /// The child process id, if the platform reports one.
    pub fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Reap the child if it has exited. Returns the exit code without
    /// blocking, or `None` while the process is still running.
    pub fn try_wait(&mut self) -> Option<u32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }
}

/// Switch a descriptor to non-blocking mode.
fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fd is a valid open descriptor owned by the PTY master for the
    // lifetime of the handle.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Returns the user's default shell, falling back to `/bin/sh`.
fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_spawn_pty() {
        let handle = PtyHandle::spawn(Some("/bin/sh"), 24, 80);
        assert!(handle.is_ok(), "failed to spawn PTY: {:?}", handle.err());
    }

    #[test]
    fn test_spawn_missing_shell_fails() {
        let result = PtyHandle::spawn(Some("/no/such/shell/anywhere"), 24, 80);
        assert!(matches!(result, Err(PtyError::SpawnFailed(_))));
    }

    #[test]
    fn test_nonblocking_read_and_echo() {
        let mut handle = PtyHandle::spawn(Some("/bin/sh"), 24, 80).unwrap();
        handle.write(b"echo SABLE_PTY_OK\n").unwrap();

        let mut output = Vec::new();
        let mut buf = [0u8; 4096];
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            match handle.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    output.extend_from_slice(&buf[..n]);
                    if String::from_utf8_lossy(&output).contains("SABLE_PTY_OK") {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(20));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }

        let text = String::from_utf8_lossy(&output);
        assert!(
            text.contains("SABLE_PTY_OK"),
            "expected echoed marker, got: {text}"
        );
    }

    #[test]
    fn test_resize() {
        let handle = PtyHandle::spawn(Some("/bin/sh"), 24, 80).unwrap();
        assert!(handle.resize(40, 120).is_ok());
    }

    #[test]
    fn test_child_exit_is_reaped() {
        let mut handle = PtyHandle::spawn(Some("/bin/sh"), 24, 80).unwrap();
        handle.write(b"exit 3\n").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut code = None;
        while Instant::now() < deadline {
            // Drain any pending output so the child can finish.
            let mut buf = [0u8; 4096];
            let _ = handle.read(&mut buf);
            code = handle.try_wait();
            if code.is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(code, Some(3));
    }

    #[test]
    fn test_default_shell_is_absolute() {
        let shell = default_shell();
        assert!(shell.starts_with('/'), "got: {shell}");
    }
}
