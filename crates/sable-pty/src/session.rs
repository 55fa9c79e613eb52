use std::io;
use std::os::unix::io::RawFd;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use sable_buffer::TextBuffer;

use crate::pty::{PtyError, PtyHandle};

/// Notice appended to the buffer when the child goes away.
const EXIT_NOTICE: &[u8] = b"\n[Process exited]\n";

/// Bounded retries for a stalled PTY writer before input is dropped.
const WRITE_RETRIES: u32 = 16;

/// A shell session feeding a text buffer.
///
/// Owns the PTY transport for one child process. Output is drained into the
/// owning buffer via [`TextBuffer::append_bytes`]; input is written back
/// best-effort. Death is detected lazily on the next drain, never by an
/// asynchronous signal.
pub struct ShellSession {
    pty: PtyHandle,
    alive: bool,
}

impl ShellSession {
    /// Spawn a shell attached to a fresh PTY of the given viewport size.
    ///
    /// On failure nothing is retained; the caller tears down whatever
    /// surrounding state it created for the session.
    pub fn spawn(shell: Option<&str>, rows: u16, cols: u16) -> Result<Self, PtyError> {
        let pty = PtyHandle::spawn(shell, rows, cols)?;
        log::info!(
            "spawned shell session (pid {:?}, {rows}x{cols})",
            pty.pid()
        );
        Ok(Self { pty, alive: true })
    }

    /// Whether the channel is still open. Flips to `false` on the drain
    /// that observes end-of-stream or an unrecoverable error.
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn pid(&self) -> Option<u32> {
        self.pty.pid()
    }

    /// Descriptor to include in the event loop's readiness set, or `None`
    /// once the session is dead.
    pub fn pollable_fd(&self) -> Option<RawFd> {
        self.alive.then(|| self.pty.raw_fd())
    }

    /// Write input to the shell, best-effort.
    ///
    /// Retries on interrupt and briefly on a full kernel buffer, then
    /// silently drops the remainder; no backpressure reaches the caller.
    pub fn write(&mut self, bytes: &[u8]) {
        if !self.alive {
            return;
        }
        let mut rest = bytes;
        let mut retries = WRITE_RETRIES;
        while !rest.is_empty() {
            match self.pty.write(rest) {
                Ok(0) => break,
                Ok(n) => rest = &rest[n..],
                Err(e)
                    if e.kind() == io::ErrorKind::Interrupted
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    if retries == 0 {
                        log::warn!("dropping {} bytes of shell input", rest.len());
                        break;
                    }
                    retries -= 1;
                }
                Err(e) => {
                    log::warn!("shell write error: {e}");
                    break;
                }
            }
        }
    }

    /// Drain all pending shell output into `text`.
    ///
    /// Reads until the channel would block. End-of-stream or an
    /// unrecoverable error appends the exit notice, marks the session dead,
    /// and reaps the child without blocking. Returns `true` when the buffer
    /// changed.
    pub fn drain(&mut self, text: &mut TextBuffer) -> bool {
        if !self.alive {
            return false;
        }
        let mut changed = false;
        let mut buf = [0u8; 4096];
        loop {
            match self.pty.read(&mut buf) {
                Ok(0) => {
                    self.finish(text);
                    return true;
                }
                Ok(n) => {
                    text.append_bytes(&buf[..n]);
                    changed = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return changed,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::warn!("shell read error: {e}");
                    self.finish(text);
                    return true;
                }
            }
        }
    }

    fn finish(&mut self, text: &mut TextBuffer) {
        text.append_bytes(EXIT_NOTICE);
        self.alive = false;
        match self.pty.try_wait() {
            Some(code) => log::info!("shell exited with status {code}"),
            None => log::debug!("shell channel closed before child exit was visible"),
        }
    }

    /// Propagate new viewport geometry to the PTY. No-op when dead.
    pub fn resize(&mut self, rows: u16, cols: u16) {
        if !self.alive {
            return;
        }
        if let Err(e) = self.pty.resize(rows, cols) {
            log::warn!("shell resize failed: {e}");
        }
    }

    /// Fire-and-forget termination signal for shutdown. Does not wait for
    /// the child to acknowledge.
    pub fn terminate(&mut self) {
        if !self.alive {
            return;
        }
        if let Some(pid) = self.pty.pid() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            log::info!("sent SIGTERM to shell pid {pid}");
        }
        self.alive = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    fn drain_until<F: Fn(&TextBuffer) -> bool>(
        session: &mut ShellSession,
        text: &mut TextBuffer,
        done: F,
    ) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            session.drain(text);
            if done(text) {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_spawn_and_echo_into_buffer() {
        let mut session = ShellSession::spawn(Some("/bin/sh"), 24, 80).unwrap();
        let mut text = TextBuffer::new("*shell-1*");
        assert!(session.is_alive());

        session.write(b"echo SABLE_SESSION_OK\n");
        let ok = drain_until(&mut session, &mut text, |t| {
            t.content().contains("SABLE_SESSION_OK")
        });
        assert!(ok, "marker never arrived: {:?}", text.content());
        // Drains leave the cursor at the end of the buffer.
        let (line, _) = text.cursor();
        assert_eq!(line, text.line_count() - 1);
    }

    #[test]
    fn test_spawn_failure_reports() {
        let result = ShellSession::spawn(Some("/definitely/not/a/shell"), 24, 80);
        assert!(matches!(result, Err(PtyError::SpawnFailed(_))));
    }

    #[test]
    fn test_exit_appends_notice_and_marks_dead() {
        let mut session = ShellSession::spawn(Some("/bin/sh"), 24, 80).unwrap();
        let mut text = TextBuffer::new("*shell-1*");

        session.write(b"exit 0\n");
        let ok = drain_until(&mut session, &mut text, |t| {
            t.content().contains("[Process exited]")
        });
        assert!(ok, "exit notice never appeared: {:?}", text.content());
        assert!(!session.is_alive());
        assert_eq!(session.pollable_fd(), None);

        // Dead sessions ignore writes and report no further output.
        session.write(b"echo after\n");
        assert!(!session.drain(&mut text));
    }

    #[test]
    fn test_resize_live_session() {
        let mut session = ShellSession::spawn(Some("/bin/sh"), 24, 80).unwrap();
        session.resize(40, 120);
        assert!(session.is_alive());
    }

    #[test]
    fn test_terminate_is_fire_and_forget() {
        let mut session = ShellSession::spawn(Some("/bin/sh"), 24, 80).unwrap();
        session.terminate();
        assert!(!session.is_alive());
        // Second call is a no-op.
        session.terminate();
    }
}
