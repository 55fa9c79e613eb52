//! The modal key-dispatch state machine.
//!
//! Keys arrive one at a time from the input multiplexer and are routed by
//! the current mode: Normal editing, a pending `C-x` or ESC prefix, or the
//! minibuffer accumulator. When the current buffer is a live shell buffer,
//! Normal-mode keys are forwarded to the shell verbatim instead -- except
//! `C-x`, so the editor's own commands stay reachable.

use sable_buffer::TextBuffer;
use sable_editor::{Key, Workspace};
use sable_script::ScriptHost;

/// Upper bound on accumulated minibuffer input.
pub const MINIBUF_MAX: usize = 512;

const BUFFER_LIST_NAME: &str = "*Buffer List*";

/// Dispatch modes. Process-wide, not per-buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    /// `C-x` was pressed; the next key selects a command.
    PrefixCtrlX,
    /// ESC was pressed; the next key selects a meta command.
    PrefixMeta,
    /// The minibuffer is collecting a line of input.
    Minibuffer,
}

/// Pending minibuffer continuation, resolved when Enter is pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MinibufAction {
    FindFile,
    SwitchBuffer,
    KillBuffer,
    Command,
}

/// What the host loop should do after a dispatched key.
#[derive(Debug, PartialEq, Eq)]
pub enum Control {
    Continue,
    Quit,
}

pub struct KeyDispatcher {
    mode: Mode,
    minibuf_prompt: String,
    minibuf_input: String,
    minibuf_action: Option<MinibufAction>,
    /// Shell to launch for new shell buffers; `None` picks the default.
    shell: Option<String>,
}

fn text(ws: &mut Workspace) -> &mut TextBuffer {
    &mut ws.current_mut().text
}

impl KeyDispatcher {
    pub fn new(shell: Option<String>) -> Self {
        Self {
            mode: Mode::Normal,
            minibuf_prompt: String::new(),
            minibuf_input: String::new(),
            minibuf_action: None,
            shell,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn minibuf_prompt(&self) -> &str {
        &self.minibuf_prompt
    }

    pub fn minibuf_input(&self) -> &str {
        &self.minibuf_input
    }

    /// Route one key event. `edit_rows`/`edit_cols` describe the edit
    /// viewport, used for page motions and new shell geometry.
    pub fn dispatch(
        &mut self,
        ws: &mut Workspace,
        host: &ScriptHost,
        key: Key,
        edit_rows: u16,
        edit_cols: u16,
    ) -> Control {
        match self.mode {
            Mode::Minibuffer => {
                self.minibuf_key(ws, host, key, edit_rows, edit_cols);
                Control::Continue
            }
            Mode::PrefixCtrlX => self.ctrl_x_key(ws, key, edit_rows, edit_cols),
            Mode::PrefixMeta => {
                self.meta_key(ws, key);
                Control::Continue
            }
            Mode::Normal => self.normal_key(ws, key, edit_rows),
        }
    }

    fn start_minibuf(&mut self, prompt: &str, action: MinibufAction) {
        self.mode = Mode::Minibuffer;
        self.minibuf_prompt = prompt.to_string();
        self.minibuf_input.clear();
        self.minibuf_action = Some(action);
    }

    fn cancel(&mut self, ws: &mut Workspace) {
        self.mode = Mode::Normal;
        self.minibuf_input.clear();
        self.minibuf_action = None;
        ws.set_status("Quit");
    }

    fn minibuf_key(
        &mut self,
        ws: &mut Workspace,
        host: &ScriptHost,
        key: Key,
        edit_rows: u16,
        edit_cols: u16,
    ) {
        match key {
            Key::Ctrl('g') | Key::Escape => self.cancel(ws),
            Key::Enter => {
                self.mode = Mode::Normal;
                let input = std::mem::take(&mut self.minibuf_input);
                let Some(action) = self.minibuf_action.take() else {
                    return;
                };
                match action {
                    MinibufAction::FindFile => ws.open_file(&input),
                    MinibufAction::SwitchBuffer => ws.switch_to(&input),
                    MinibufAction::KillBuffer => match ws.find_index(&input) {
                        Some(idx) => {
                            ws.kill_buffer(idx);
                            ws.set_status(format!("Killed buffer: {input}"));
                        }
                        None => ws.set_status(format!("No buffer named: {input}")),
                    },
                    MinibufAction::Command => {
                        self.run_command(ws, host, &input, edit_rows, edit_cols)
                    }
                }
            }
            Key::Backspace => {
                self.minibuf_input.pop();
            }
            Key::Char(c) if !c.is_control() && self.minibuf_input.len() < MINIBUF_MAX => {
                self.minibuf_input.push(c);
            }
            _ => {}
        }
    }

    fn ctrl_x_key(
        &mut self,
        ws: &mut Workspace,
        key: Key,
        edit_rows: u16,
        edit_cols: u16,
    ) -> Control {
        self.mode = Mode::Normal;
        match key {
            Key::Ctrl('s') => ws.save_current(),
            Key::Ctrl('f') => self.start_minibuf("Find file: ", MinibufAction::FindFile),
            Key::Ctrl('c') => return Control::Quit,
            Key::Char('b') => self.start_minibuf("Switch to buffer: ", MinibufAction::SwitchBuffer),
            Key::Char('k') => self.start_minibuf("Kill buffer: ", MinibufAction::KillBuffer),
            Key::Char('s') => self.open_shell(ws, edit_rows, edit_cols),
            Key::Ctrl('g') => self.cancel(ws),
            other => ws.set_status(format!("C-x {other} is undefined")),
        }
        Control::Continue
    }

    fn meta_key(&mut self, ws: &mut Workspace, key: Key) {
        self.mode = Mode::Normal;
        match key {
            Key::Char('x') | Key::Char('X') => self.start_minibuf("M-x ", MinibufAction::Command),
            Key::Char('f') => text(ws).forward_word(),
            Key::Char('b') => text(ws).backward_word(),
            Key::Char('<') => text(ws).move_buffer_start(),
            Key::Char('>') => text(ws).move_buffer_end(),
            Key::Char('d') => text(ws).delete_word_forward(),
            Key::Ctrl('g') => self.cancel(ws),
            other => ws.set_status(format!("M-{other} is undefined")),
        }
    }

    fn normal_key(&mut self, ws: &mut Workspace, key: Key, edit_rows: u16) -> Control {
        // Live shell buffers get raw passthrough; only C-x is kept for the
        // editor itself.
        if ws.current().is_live_shell() {
            match key {
                Key::Ctrl('x') => {
                    self.mode = Mode::PrefixCtrlX;
                    ws.set_status("C-x-");
                }
                _ => {
                    if let Some(bytes) = shell_bytes(key) {
                        let buf = ws.current_mut();
                        if let Some(session) = buf.shell.as_mut() {
                            session.write(&bytes);
                        }
                    }
                }
            }
            return Control::Continue;
        }

        let page = edit_rows.max(1) as usize;
        match key {
            Key::Up | Key::Ctrl('p') => text(ws).move_cursor(-1, 0),
            Key::Down | Key::Ctrl('n') => text(ws).move_cursor(1, 0),
            Key::Left | Key::Ctrl('b') => text(ws).move_left(),
            Key::Right | Key::Ctrl('f') => text(ws).move_right(),
            Key::Home | Key::Ctrl('a') => text(ws).move_bol(),
            Key::End | Key::Ctrl('e') => text(ws).move_eol(),
            Key::PageUp => text(ws).page_up(page),
            Key::PageDown => text(ws).page_down(page),
            Key::Backspace => text(ws).delete_backward(),
            Key::Delete | Key::Ctrl('d') => text(ws).delete_forward(),
            Key::Ctrl('k') => {
                if let Some(killed) = text(ws).kill_line() {
                    ws.set_kill_ring(killed);
                }
            }
            Key::Ctrl('y') => {
                if let Some(source) = ws.kill_ring().map(str::to_string) {
                    text(ws).yank(&source);
                }
            }
            Key::Tab => text(ws).insert_char('\t'),
            Key::Enter => text(ws).insert_char('\n'),
            Key::Ctrl('x') => {
                self.mode = Mode::PrefixCtrlX;
                ws.set_status("C-x-");
            }
            Key::Escape => self.mode = Mode::PrefixMeta,
            Key::Ctrl('g') => ws.set_status("Quit"),
            Key::Ctrl('l') => ws.clear_status(),
            Key::Char(c) => {
                text(ws).insert_char(c);
                ws.clear_status();
            }
            _ => {}
        }
        Control::Continue
    }

    fn open_shell(&self, ws: &mut Workspace, edit_rows: u16, edit_cols: u16) {
        if let Err(e) = ws.create_shell(self.shell.as_deref(), edit_rows.max(1), edit_cols.max(1)) {
            ws.set_status(format!("Cannot open shell: {e}"));
        }
    }

    /// Resolve an `M-x` command name against the fixed table.
    fn run_command(
        &mut self,
        ws: &mut Workspace,
        host: &ScriptHost,
        input: &str,
        edit_rows: u16,
        edit_cols: u16,
    ) {
        if input == "open-shell" {
            self.open_shell(ws, edit_rows, edit_cols);
        } else if input == "list-buffers" {
            list_buffers(ws);
        } else if input == "run-buffer" {
            let source = ws.current().text.content();
            let (_, out) = host.evaluate(ws, &source);
            ws.set_status(out);
        } else if input == "eval" {
            ws.set_status("Usage: M-x eval <code>  e.g.: eval message(\"hi\")");
        } else if let Some(code) = input.strip_prefix("eval ") {
            let (ok, out) = host.evaluate(ws, code);
            ws.set_status(if ok { format!("=> {out}") } else { out });
        } else {
            ws.set_status(format!("Unknown command: {input}"));
        }
    }
}

/// Rebuild the buffer listing and switch to it.
fn list_buffers(ws: &mut Workspace) {
    let idx = match ws.find_index(BUFFER_LIST_NAME) {
        Some(idx) => idx,
        None => match ws.create_buffer(BUFFER_LIST_NAME) {
            Ok(idx) => idx,
            Err(e) => {
                ws.set_status(format!("{e}"));
                return;
            }
        },
    };

    let mut lines = vec!["Buffer List:".to_string()];
    for (i, buf) in ws.buffers().iter().enumerate() {
        let mut line = format!(
            "  [{}] {}{}",
            i + 1,
            buf.name(),
            if buf.text.modified() { " (modified)" } else { "" }
        );
        if let Some(path) = buf.text.path() {
            line.push_str(&format!(" -- {}", path.display()));
        }
        lines.push(line);
    }

    if let Some(buf) = ws.buffer_mut(idx) {
        buf.text.set_content(&lines.join("\n"));
        buf.text.set_modified(false);
        buf.text.move_buffer_start();
    }
    ws.switch_to_index(idx);
}

/// Translate a key to the bytes a shell expects, or `None` for keys that
/// are not forwarded.
fn shell_bytes(key: Key) -> Option<Vec<u8>> {
    match key {
        Key::Up => Some(b"\x1b[A".to_vec()),
        Key::Down => Some(b"\x1b[B".to_vec()),
        Key::Right => Some(b"\x1b[C".to_vec()),
        Key::Left => Some(b"\x1b[D".to_vec()),
        Key::Backspace => Some(vec![0x7f]),
        Key::Enter => Some(vec![b'\r']),
        Key::Tab => Some(vec![b'\t']),
        Key::Escape => Some(vec![0x1b]),
        Key::Ctrl(c) => Some(vec![c as u8 - 0x60]),
        Key::Char(c) => {
            let mut buf = [0u8; 4];
            Some(c.encode_utf8(&mut buf).as_bytes().to_vec())
        }
        // Keys with no single-byte shell encoding are dropped.
        Key::Delete | Key::Home | Key::End | Key::PageUp | Key::PageDown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn fresh() -> (KeyDispatcher, Workspace, ScriptHost) {
        (
            KeyDispatcher::new(Some("/bin/sh".to_string())),
            Workspace::new(),
            ScriptHost::new(),
        )
    }

    fn press(
        disp: &mut KeyDispatcher,
        ws: &mut Workspace,
        host: &ScriptHost,
        keys: &[Key],
    ) -> Control {
        let mut last = Control::Continue;
        for &key in keys {
            last = disp.dispatch(ws, host, key, 24, 80);
        }
        last
    }

    fn type_str(disp: &mut KeyDispatcher, ws: &mut Workspace, host: &ScriptHost, s: &str) {
        for c in s.chars() {
            let key = if c == '\n' { Key::Enter } else { Key::Char(c) };
            disp.dispatch(ws, host, key, 24, 80);
        }
    }

    #[test]
    fn test_typing_inserts_into_buffer() {
        let (mut disp, mut ws, host) = fresh();
        ws.switch_to("t");
        type_str(&mut disp, &mut ws, &host, "abc\nd");
        assert_eq!(ws.current().text.lines(), &["abc".to_string(), "d".to_string()]);
        assert_eq!(ws.current().text.cursor(), (1, 1));
    }

    #[test]
    fn test_quit_via_ctrl_x_ctrl_c() {
        let (mut disp, mut ws, host) = fresh();
        let control = press(&mut disp, &mut ws, &host, &[Key::Ctrl('x'), Key::Ctrl('c')]);
        assert_eq!(control, Control::Quit);
    }

    #[test]
    fn test_prefix_shows_pending_status() {
        let (mut disp, mut ws, host) = fresh();
        press(&mut disp, &mut ws, &host, &[Key::Ctrl('x')]);
        assert_eq!(disp.mode(), Mode::PrefixCtrlX);
        assert_eq!(ws.status(), "C-x-");
    }

    #[test]
    fn test_unbound_prefix_key_reports_undefined() {
        let (mut disp, mut ws, host) = fresh();
        press(&mut disp, &mut ws, &host, &[Key::Ctrl('x'), Key::Char('z')]);
        assert_eq!(disp.mode(), Mode::Normal);
        assert_eq!(ws.status(), "C-x z is undefined");

        press(&mut disp, &mut ws, &host, &[Key::Escape, Key::Char('q')]);
        assert_eq!(ws.status(), "M-q is undefined");
    }

    #[test]
    fn test_cancel_aborts_prefix() {
        let (mut disp, mut ws, host) = fresh();
        press(&mut disp, &mut ws, &host, &[Key::Ctrl('x'), Key::Ctrl('g')]);
        assert_eq!(disp.mode(), Mode::Normal);
        assert_eq!(ws.status(), "Quit");
    }

    #[test]
    fn test_minibuffer_accumulates_and_invokes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opened.txt");
        std::fs::write(&path, "content\n").unwrap();

        let (mut disp, mut ws, host) = fresh();
        press(&mut disp, &mut ws, &host, &[Key::Ctrl('x'), Key::Ctrl('f')]);
        assert_eq!(disp.mode(), Mode::Minibuffer);
        assert_eq!(disp.minibuf_prompt(), "Find file: ");
        type_str(&mut disp, &mut ws, &host, &path.display().to_string());
        press(&mut disp, &mut ws, &host, &[Key::Enter]);
        assert_eq!(disp.mode(), Mode::Normal);
        assert_eq!(ws.current().name(), "opened.txt");
        assert_eq!(ws.current().text.line(0), Some("content"));
    }

    #[test]
    fn test_minibuffer_backspace_and_cancel() {
        let (mut disp, mut ws, host) = fresh();
        press(&mut disp, &mut ws, &host, &[Key::Ctrl('x'), Key::Char('b')]);
        type_str(&mut disp, &mut ws, &host, "abc");
        press(&mut disp, &mut ws, &host, &[Key::Backspace]);
        assert_eq!(disp.minibuf_input(), "ab");
        press(&mut disp, &mut ws, &host, &[Key::Ctrl('g')]);
        assert_eq!(disp.mode(), Mode::Normal);
        assert_eq!(disp.minibuf_input(), "");
        // Cancelled continuation must not run: no buffer was created.
        assert_eq!(ws.len(), 1);
    }

    #[test]
    fn test_minibuffer_input_is_bounded() {
        let (mut disp, mut ws, host) = fresh();
        press(&mut disp, &mut ws, &host, &[Key::Ctrl('x'), Key::Char('b')]);
        for _ in 0..(MINIBUF_MAX + 50) {
            press(&mut disp, &mut ws, &host, &[Key::Char('a')]);
        }
        assert_eq!(disp.minibuf_input().len(), MINIBUF_MAX);
        press(&mut disp, &mut ws, &host, &[Key::Ctrl('g')]);
    }

    #[test]
    fn test_kill_buffer_continuation() {
        let (mut disp, mut ws, host) = fresh();
        ws.switch_to("doomed");
        press(&mut disp, &mut ws, &host, &[Key::Ctrl('x'), Key::Char('k')]);
        type_str(&mut disp, &mut ws, &host, "doomed");
        press(&mut disp, &mut ws, &host, &[Key::Enter]);
        assert_eq!(ws.status(), "Killed buffer: doomed");
        assert!(ws.find_index("doomed").is_none());

        press(&mut disp, &mut ws, &host, &[Key::Ctrl('x'), Key::Char('k')]);
        type_str(&mut disp, &mut ws, &host, "missing");
        press(&mut disp, &mut ws, &host, &[Key::Enter]);
        assert_eq!(ws.status(), "No buffer named: missing");
    }

    #[test]
    fn test_meta_motions() {
        let (mut disp, mut ws, host) = fresh();
        ws.switch_to("t");
        ws.current_mut().text.insert_str("foo bar\nbaz");
        ws.current_mut().text.set_cursor(0, 0);
        press(&mut disp, &mut ws, &host, &[Key::Escape, Key::Char('f')]);
        assert_eq!(ws.current().text.cursor(), (0, 3));
        press(&mut disp, &mut ws, &host, &[Key::Escape, Key::Char('>')]);
        assert_eq!(ws.current().text.cursor(), (1, 3));
        press(&mut disp, &mut ws, &host, &[Key::Escape, Key::Char('<')]);
        assert_eq!(ws.current().text.cursor(), (0, 0));
    }

    #[test]
    fn test_kill_line_and_yank_through_kill_ring() {
        let (mut disp, mut ws, host) = fresh();
        ws.switch_to("t");
        ws.current_mut().text.insert_str("hello world");
        ws.current_mut().text.set_cursor(0, 5);
        press(&mut disp, &mut ws, &host, &[Key::Ctrl('k')]);
        assert_eq!(ws.kill_ring(), Some(" world"));
        press(&mut disp, &mut ws, &host, &[Key::Ctrl('y')]);
        assert_eq!(ws.current().text.content(), "hello world");
    }

    #[test]
    fn test_mx_unknown_command() {
        let (mut disp, mut ws, host) = fresh();
        press(&mut disp, &mut ws, &host, &[Key::Escape, Key::Char('x')]);
        assert_eq!(disp.minibuf_prompt(), "M-x ");
        type_str(&mut disp, &mut ws, &host, "frobnicate");
        press(&mut disp, &mut ws, &host, &[Key::Enter]);
        assert_eq!(ws.status(), "Unknown command: frobnicate");
    }

    #[test]
    fn test_mx_eval_runs_script() {
        let (mut disp, mut ws, host) = fresh();
        press(&mut disp, &mut ws, &host, &[Key::Escape, Key::Char('x')]);
        type_str(&mut disp, &mut ws, &host, "eval getCurrentBufferName()");
        press(&mut disp, &mut ws, &host, &[Key::Enter]);
        assert_eq!(ws.status(), "=> *scratch*");
    }

    #[test]
    fn test_mx_list_buffers() {
        let (mut disp, mut ws, host) = fresh();
        ws.switch_to("alpha");
        press(&mut disp, &mut ws, &host, &[Key::Escape, Key::Char('x')]);
        type_str(&mut disp, &mut ws, &host, "list-buffers");
        press(&mut disp, &mut ws, &host, &[Key::Enter]);
        assert_eq!(ws.current().name(), BUFFER_LIST_NAME);
        let content = ws.current().text.content();
        assert!(content.starts_with("Buffer List:"), "got: {content}");
        assert!(content.contains("*scratch*"));
        assert!(content.contains("alpha"));
        assert!(content.contains(BUFFER_LIST_NAME));
        assert!(!ws.current().text.modified());
    }

    #[test]
    fn test_shell_passthrough_reaches_child() {
        let (mut disp, mut ws, host) = fresh();
        ws.create_shell(Some("/bin/sh"), 24, 80).unwrap();
        let idx = ws.current_index();

        type_str(&mut disp, &mut ws, &host, "echo DISPATCH_OK");
        press(&mut disp, &mut ws, &host, &[Key::Enter]);
        // Keys went to the shell, not the buffer.
        assert!(!ws.current().text.content().contains("DISPATCH_OK"));

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = false;
        while Instant::now() < deadline {
            let buf = ws.buffer_mut(idx).unwrap();
            if let Some(session) = buf.shell.as_mut() {
                session.drain(&mut buf.text);
            }
            if ws.buffers()[idx].text.content().contains("DISPATCH_OK") {
                seen = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(seen, "shell never echoed the dispatched input");
        ws.shutdown();
    }

    #[test]
    fn test_ctrl_x_still_works_in_shell_buffer() {
        let (mut disp, mut ws, host) = fresh();
        ws.create_shell(Some("/bin/sh"), 24, 80).unwrap();
        press(&mut disp, &mut ws, &host, &[Key::Ctrl('x')]);
        assert_eq!(disp.mode(), Mode::PrefixCtrlX);
        press(&mut disp, &mut ws, &host, &[Key::Char('b')]);
        assert_eq!(disp.mode(), Mode::Minibuffer);
        type_str(&mut disp, &mut ws, &host, "*scratch*");
        press(&mut disp, &mut ws, &host, &[Key::Enter]);
        assert_eq!(ws.current().name(), "*scratch*");
        ws.shutdown();
    }

    #[test]
    fn test_open_shell_failure_reports() {
        let mut disp = KeyDispatcher::new(Some("/no/such/shell".to_string()));
        let mut ws = Workspace::new();
        let host = ScriptHost::new();
        let before = ws.len();
        press(&mut disp, &mut ws, &host, &[Key::Ctrl('x'), Key::Char('s')]);
        assert_eq!(ws.len(), before);
        assert!(
            ws.status().starts_with("Cannot open shell:"),
            "got: {}",
            ws.status()
        );
    }
}
