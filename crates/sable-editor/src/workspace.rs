use std::io;
use std::path::Path;

use sable_buffer::TextBuffer;
use sable_pty::{PtyError, ShellSession};

/// Fixed upper bound on open buffers.
pub const MAX_BUFFERS: usize = 32;

/// Name of the default buffer that always exists.
pub const SCRATCH_NAME: &str = "*scratch*";

const WELCOME: &str = "\
;; Welcome to sable
;; C-x C-f: open file  C-x C-s: save  C-x b: switch buffer
;; C-x C-c: quit       C-x s: shell   M-x: execute command
;; M-x run-buffer: evaluate buffer    M-x eval <code>: evaluate code
";

/// Errors from workspace-level operations.
#[derive(Debug)]
pub enum EditorError {
    /// The fixed buffer limit was reached.
    BufferLimit,
    /// Spawning a shell session failed.
    Pty(PtyError),
}

impl std::fmt::Display for EditorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditorError::BufferLimit => write!(f, "too many buffers open (max {MAX_BUFFERS})"),
            EditorError::Pty(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for EditorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EditorError::Pty(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PtyError> for EditorError {
    fn from(err: PtyError) -> Self {
        EditorError::Pty(err)
    }
}

/// One workspace entry: a text buffer, optionally backed by a live shell.
pub struct Buffer {
    pub text: TextBuffer,
    pub shell: Option<ShellSession>,
}

impl Buffer {
    fn plain(text: TextBuffer) -> Self {
        Self { text, shell: None }
    }

    pub fn name(&self) -> &str {
        self.text.name()
    }

    /// Whether this buffer was created as a shell buffer (live or not).
    pub fn is_shell(&self) -> bool {
        self.shell.is_some()
    }

    /// Whether the backing shell is still attached to a live channel.
    pub fn is_live_shell(&self) -> bool {
        self.shell.as_ref().is_some_and(|s| s.is_alive())
    }
}

/// The bounded, ordered buffer collection plus the state shared across
/// buffers: current index, kill-ring, and the transient status message.
///
/// The collection is never empty; killing the last buffer immediately
/// repopulates a fresh scratch buffer.
pub struct Workspace {
    buffers: Vec<Buffer>,
    current: usize,
    kill_ring: Option<String>,
    status: String,
    shell_count: usize,
}

impl Workspace {
    /// Create a workspace holding the scratch buffer with the welcome text.
    pub fn new() -> Self {
        let mut scratch = TextBuffer::new(SCRATCH_NAME);
        scratch.insert_str(WELCOME);
        scratch.set_modified(false);
        Self {
            buffers: vec![Buffer::plain(scratch)],
            current: 0,
            kill_ring: None,
            status: String::new(),
            shell_count: 0,
        }
    }

    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    pub fn buffer_mut(&mut self, idx: usize) -> Option<&mut Buffer> {
        self.buffers.get_mut(idx)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &Buffer {
        &self.buffers[self.current]
    }

    pub fn current_mut(&mut self) -> &mut Buffer {
        &mut self.buffers[self.current]
    }

    pub fn find_index(&self, name: &str) -> Option<usize> {
        self.buffers.iter().position(|b| b.name() == name)
    }

    pub fn buffer_names(&self) -> Vec<String> {
        self.buffers.iter().map(|b| b.name().to_string()).collect()
    }

    /// Append a new plain buffer. Does not change the current buffer.
    pub fn create_buffer(&mut self, name: &str) -> Result<usize, EditorError> {
        if self.buffers.len() >= MAX_BUFFERS {
            return Err(EditorError::BufferLimit);
        }
        self.buffers.push(Buffer::plain(TextBuffer::new(name)));
        Ok(self.buffers.len() - 1)
    }

    /// Destroy the buffer at `idx`, terminating its shell if one is live.
    /// The collection is repopulated with a scratch buffer when it would
    /// become empty, and the current index stays valid.
    pub fn kill_buffer(&mut self, idx: usize) {
        if idx >= self.buffers.len() {
            return;
        }
        let mut removed = self.buffers.remove(idx);
        if let Some(shell) = removed.shell.as_mut() {
            shell.terminate();
        }
        if self.buffers.is_empty() {
            self.buffers.push(Buffer::plain(TextBuffer::new(SCRATCH_NAME)));
        }
        if self.current >= self.buffers.len() {
            self.current = self.buffers.len() - 1;
        }
    }

    /// Switch to the named buffer, creating it when absent.
    pub fn switch_to(&mut self, name: &str) {
        if name.is_empty() {
            return;
        }
        if let Some(idx) = self.find_index(name) {
            self.current = idx;
            self.set_status(format!("Switched to buffer: {name}"));
            return;
        }
        match self.create_buffer(name) {
            Ok(idx) => {
                self.current = idx;
                self.set_status(format!("Created new buffer: {name}"));
            }
            Err(e) => self.set_status(format!("{e}")),
        }
    }

    /// Select an existing buffer by index.
    pub fn switch_to_index(&mut self, idx: usize) {
        if idx < self.buffers.len() {
            self.current = idx;
        }
    }

    /// Open a file into a buffer, reusing any buffer already visiting the
    /// same path. A missing file becomes a fresh "New file" buffer; any
    /// other I/O failure is reported and leaves the workspace unchanged.
    pub fn open_file(&mut self, path: &str) {
        if path.is_empty() {
            return;
        }
        if let Some(idx) = self
            .buffers
            .iter()
            .position(|b| b.text.path().is_some_and(|p| p == Path::new(path)))
        {
            self.current = idx;
            self.set_status(format!("Switched to existing buffer for {path}"));
            return;
        }

        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        let idx = match self.create_buffer(&name) {
            Ok(idx) => idx,
            Err(e) => {
                self.set_status(format!("{e}"));
                return;
            }
        };

        match self.buffers[idx].text.load_from_file(Path::new(path)) {
            Ok(()) => {
                self.current = idx;
                self.set_status(format!("Opened {path}"));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.buffers[idx].text.set_path(path);
                self.current = idx;
                self.set_status(format!("New file: {path}"));
            }
            Err(e) => {
                self.buffers.remove(idx);
                if self.current >= self.buffers.len() {
                    self.current = self.buffers.len() - 1;
                }
                self.set_status(format!("Error opening {path}: {e}"));
            }
        }
    }

    /// Save the current buffer to its backing file, reporting the outcome
    /// in the status message.
    pub fn save_current(&mut self) {
        if self.buffers[self.current].is_shell() {
            self.set_status("Cannot save shell buffer");
            return;
        }
        let path = self.buffers[self.current]
            .text
            .path()
            .map(|p| p.display().to_string());
        let Some(path) = path else {
            self.set_status("Buffer has no file name");
            return;
        };
        match self.buffers[self.current].text.save_to_file() {
            Ok(()) => self.set_status(format!("Wrote {path}")),
            Err(e) => self.set_status(format!("Error saving {path}: {e}")),
        }
    }

    /// Create a shell-backed buffer and switch to it.
    ///
    /// On spawn failure the half-created buffer is removed again, so a
    /// failed attempt leaves the buffer count exactly as it was.
    pub fn create_shell(
        &mut self,
        shell: Option<&str>,
        rows: u16,
        cols: u16,
    ) -> Result<(), EditorError> {
        self.shell_count += 1;
        let name = format!("*shell-{}*", self.shell_count);
        let idx = self.create_buffer(&name)?;
        match ShellSession::spawn(shell, rows, cols) {
            Ok(session) => {
                let pid = session.pid();
                self.buffers[idx].shell = Some(session);
                self.current = idx;
                self.set_status(match pid {
                    Some(pid) => format!("Shell started in {name} (pid {pid})"),
                    None => format!("Shell started in {name}"),
                });
                Ok(())
            }
            Err(e) => {
                self.buffers.remove(idx);
                if self.current >= self.buffers.len() {
                    self.current = self.buffers.len() - 1;
                }
                Err(e.into())
            }
        }
    }

    /// Most recent kill, shared across all buffers. Last write wins.
    pub fn kill_ring(&self) -> Option<&str> {
        self.kill_ring.as_deref()
    }

    pub fn set_kill_ring(&mut self, text: String) {
        self.kill_ring = Some(text);
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
    }

    pub fn clear_status(&mut self) {
        self.status.clear();
    }

    /// Propagate a new viewport size to every live shell.
    pub fn resize_sessions(&mut self, rows: u16, cols: u16) {
        for buf in &mut self.buffers {
            if let Some(shell) = buf.shell.as_mut() {
                shell.resize(rows, cols);
            }
        }
    }

    /// Fire-and-forget termination of every live shell; does not wait.
    pub fn shutdown(&mut self) {
        for buf in &mut self.buffers {
            if let Some(shell) = buf.shell.as_mut() {
                shell.terminate();
            }
        }
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_new_workspace_has_scratch() {
        let ws = Workspace::new();
        assert_eq!(ws.len(), 1);
        assert_eq!(ws.current().name(), SCRATCH_NAME);
        assert!(!ws.current().text.modified());
        assert!(ws.current().text.content().contains("Welcome to sable"));
    }

    #[test]
    fn test_create_and_switch() {
        let mut ws = Workspace::new();
        ws.switch_to("notes");
        assert_eq!(ws.len(), 2);
        assert_eq!(ws.current().name(), "notes");
        ws.switch_to(SCRATCH_NAME);
        assert_eq!(ws.current().name(), SCRATCH_NAME);
    }

    #[test]
    fn test_buffer_limit() {
        let mut ws = Workspace::new();
        for i in 1..MAX_BUFFERS {
            ws.create_buffer(&format!("b{i}")).unwrap();
        }
        assert!(matches!(
            ws.create_buffer("overflow"),
            Err(EditorError::BufferLimit)
        ));
        assert_eq!(ws.len(), MAX_BUFFERS);
    }

    #[test]
    fn test_kill_last_buffer_repopulates_scratch() {
        let mut ws = Workspace::new();
        ws.kill_buffer(0);
        assert_eq!(ws.len(), 1);
        assert_eq!(ws.current().name(), SCRATCH_NAME);
        // The replacement scratch is empty, not the welcome text.
        assert_eq!(ws.current().text.lines(), &[String::new()]);
    }

    #[test]
    fn test_kill_buffer_clamps_current() {
        let mut ws = Workspace::new();
        ws.switch_to("a");
        ws.switch_to("b");
        assert_eq!(ws.current_index(), 2);
        ws.kill_buffer(2);
        assert_eq!(ws.current_index(), 1);
        assert_eq!(ws.current().name(), "a");
    }

    #[test]
    fn test_open_missing_file_is_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.txt");
        let mut ws = Workspace::new();
        ws.open_file(&path.display().to_string());
        assert_eq!(ws.len(), 2);
        assert_eq!(ws.current().name(), "fresh.txt");
        assert!(ws.status().starts_with("New file:"));
        assert_eq!(ws.current().text.path(), Some(path.as_path()));
    }

    #[test]
    fn test_open_file_reuses_existing_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.txt");
        fs::write(&path, "hello\n").unwrap();
        let p = path.display().to_string();

        let mut ws = Workspace::new();
        ws.open_file(&p);
        assert_eq!(ws.len(), 2);
        ws.switch_to(SCRATCH_NAME);
        ws.open_file(&p);
        assert_eq!(ws.len(), 2);
        assert_eq!(ws.current().name(), "x.txt");
        assert_eq!(ws.current().text.line(0), Some("hello"));
    }

    #[test]
    fn test_save_current_without_path_reports() {
        let mut ws = Workspace::new();
        ws.save_current();
        assert_eq!(ws.status(), "Buffer has no file name");
    }

    #[test]
    fn test_save_current_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut ws = Workspace::new();
        ws.switch_to("doc");
        ws.current_mut().text.insert_str("contents");
        ws.current_mut().text.set_path(&path);
        ws.save_current();
        assert!(ws.status().starts_with("Wrote"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "contents\n");
    }

    #[test]
    fn test_create_shell_failure_leaves_count_unchanged() {
        let mut ws = Workspace::new();
        let before = ws.len();
        let result = ws.create_shell(Some("/no/such/shell/at/all"), 24, 80);
        assert!(result.is_err());
        assert_eq!(ws.len(), before);
        assert_eq!(ws.current().name(), SCRATCH_NAME);
    }

    #[test]
    fn test_create_shell_switches_current() {
        let mut ws = Workspace::new();
        ws.create_shell(Some("/bin/sh"), 24, 80).unwrap();
        assert_eq!(ws.len(), 2);
        assert!(ws.current().is_live_shell());
        assert_eq!(ws.current().name(), "*shell-1*");
        ws.shutdown();
        assert!(!ws.current().is_live_shell());
    }

    #[test]
    fn test_kill_ring_last_write_wins() {
        let mut ws = Workspace::new();
        assert_eq!(ws.kill_ring(), None);
        ws.set_kill_ring("first".to_string());
        ws.set_kill_ring("second".to_string());
        assert_eq!(ws.kill_ring(), Some("second"));
    }
}
