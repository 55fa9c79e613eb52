use std::io::Read;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::input::{Key, KeyDecoder};
use crate::workspace::Workspace;

/// Bounded wait per polling step: long enough to avoid busy-spinning on
/// idle sessions, short enough that keyboard latency is imperceptible.
pub const POLL_INTERVAL_MS: u16 = 30;

/// Result of one polling step.
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// One decoded key event; all session output that was ready at the
    /// same polling instant has already been applied.
    Key(Key),
    /// Nothing for the dispatcher; the caller redraws and loops.
    Quiet,
}

/// The event loop's single blocking point.
///
/// Each [`poll_step`](Self::poll_step) builds one readiness set over the
/// keyboard and every live shell channel, drains every ready session into
/// its buffer, and only then delivers at most one key event. No fairness is
/// guaranteed among simultaneously-ready sessions beyond drain-before-key.
pub struct InputMultiplexer {
    decoder: KeyDecoder,
}

impl InputMultiplexer {
    pub fn new() -> Self {
        Self {
            decoder: KeyDecoder::new(),
        }
    }

    /// Run one polling step.
    ///
    /// `keyboard` is any pollable byte source (stdin in production). When
    /// decoded keys are already queued the wait is zero so session output
    /// still catches up before the next key is interpreted.
    pub fn poll_step<K: AsFd + Read>(
        &mut self,
        workspace: &mut Workspace,
        keyboard: &mut K,
    ) -> PollOutcome {
        let timeout = if self.decoder.has_pending() {
            PollTimeout::ZERO
        } else {
            PollTimeout::from(POLL_INTERVAL_MS)
        };

        let session_fds: Vec<(usize, RawFd)> = workspace
            .buffers()
            .iter()
            .enumerate()
            .filter_map(|(i, b)| {
                b.shell
                    .as_ref()
                    .and_then(|s| s.pollable_fd())
                    .map(|fd| (i, fd))
            })
            .collect();

        let mut ready = vec![false; session_fds.len() + 1];
        {
            let keyboard_fd = keyboard.as_fd();
            let mut fds: Vec<PollFd> = Vec::with_capacity(session_fds.len() + 1);
            fds.push(PollFd::new(keyboard_fd, PollFlags::POLLIN));
            for (_, raw) in &session_fds {
                // SAFETY: the descriptor belongs to a live session in
                // `workspace`, which outlives this poll call.
                let fd = unsafe { BorrowedFd::borrow_raw(*raw) };
                fds.push(PollFd::new(fd, PollFlags::POLLIN));
            }
            match poll(&mut fds, timeout) {
                Ok(0) | Err(Errno::EINTR) => {}
                Ok(_) => {
                    for (slot, fd) in ready.iter_mut().zip(fds.iter()) {
                        *slot = fd.revents().is_some_and(|r| {
                            r.intersects(
                                PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR,
                            )
                        });
                    }
                }
                Err(e) => log::warn!("poll failed: {e}"),
            }
        }

        // Drain every ready session before any key is delivered, so a
        // redraw after this step reflects a caught-up state.
        for (k, (idx, _)) in session_fds.iter().enumerate() {
            if !ready[k + 1] {
                continue;
            }
            if let Some(buf) = workspace.buffer_mut(*idx) {
                if let Some(session) = buf.shell.as_mut() {
                    session.drain(&mut buf.text);
                }
            }
        }

        if ready[0] {
            // At least as large as stdin's internal buffer, so a buffered
            // reader never strands bytes where poll cannot see them.
            let mut chunk = [0u8; 8192];
            match keyboard.read(&mut chunk) {
                Ok(n) if n > 0 => self.decoder.feed(&chunk[..n]),
                Ok(_) => {}
                Err(e) => log::warn!("keyboard read failed: {e}"),
            }
        }

        match self.decoder.pop() {
            Some(key) => PollOutcome::Key(key),
            None => PollOutcome::Quiet,
        }
    }
}

impl Default for InputMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}
