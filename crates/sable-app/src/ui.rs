//! The crossterm frontend: raw-mode lifecycle and frame painting.
//!
//! Painting consumes a read-only view of the editor once per loop
//! iteration: the visible slice of the current buffer, the cursor, the
//! mode/status text, and whether the buffer is shell-backed (tinted for
//! visual distinction). Layout is the edit area on top, one modeline, and
//! one minibuffer/status line at the bottom.

use std::io::{self, Write};

use crossterm::{
    cursor, execute, queue,
    style::{self, Color},
    terminal,
};
use sable_editor::Workspace;

use crate::keys::{KeyDispatcher, Mode};

/// Rows reserved below the edit area (modeline + minibuffer).
pub const CHROME_ROWS: u16 = 2;

/// Raw-mode/alternate-screen guard; restores the terminal on drop.
pub struct TerminalGuard;

impl TerminalGuard {
    pub fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        execute!(io::stdout(), terminal::EnterAlternateScreen)?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), terminal::LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

/// Restore the terminal before the default panic output, so a panic
/// message is readable instead of vanishing with the alternate screen.
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = execute!(io::stdout(), terminal::LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
        default_hook(info);
    }));
}

/// Paint one frame.
pub fn draw(
    out: &mut impl Write,
    ws: &mut Workspace,
    disp: &KeyDispatcher,
    cols: u16,
    rows: u16,
) -> io::Result<()> {
    let edit_rows = rows.saturating_sub(CHROME_ROWS).max(1);
    let width = cols.max(1) as usize;

    ws.current_mut().text.scroll_into_view(edit_rows as usize);

    let is_shell = ws.current().is_shell();
    let top = ws.current().text.top_line();
    let (cur_line, cur_col) = ws.current().text.cursor();

    queue!(out, cursor::Hide)?;
    if is_shell {
        queue!(out, style::SetForegroundColor(Color::Cyan))?;
    }
    for row in 0..edit_rows {
        queue!(
            out,
            cursor::MoveTo(0, row),
            terminal::Clear(terminal::ClearType::UntilNewLine)
        )?;
        if let Some(line) = ws.current().text.line(top + row as usize) {
            let clipped: String = line.chars().take(width.saturating_sub(1)).collect();
            queue!(out, style::Print(clipped))?;
        }
    }
    if is_shell {
        queue!(out, style::ResetColor)?;
    }

    draw_modeline(out, ws, cols, rows)?;
    draw_minibuf(out, ws, disp, cols, rows)?;

    // Park the cursor where editing happens.
    if disp.mode() == Mode::Minibuffer {
        let x = (disp.minibuf_prompt().chars().count() + disp.minibuf_input().chars().count())
            .min(width - 1) as u16;
        queue!(out, cursor::MoveTo(x, rows.saturating_sub(1)))?;
    } else {
        let y = cur_line.saturating_sub(top).min(edit_rows as usize - 1) as u16;
        let x = cur_col.min(width - 1) as u16;
        queue!(out, cursor::MoveTo(x, y))?;
    }
    queue!(out, cursor::Show)?;
    out.flush()
}

fn draw_modeline(out: &mut impl Write, ws: &Workspace, cols: u16, rows: u16) -> io::Result<()> {
    let buf = ws.current();
    let file = buf
        .text
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "no file".to_string());
    let (line, col) = buf.text.cursor();
    let modeline = format!(
        "  {}{:<20}  {}  {}  L{} C{}  [{}/{}]",
        if buf.is_shell() { "[shell] " } else { "" },
        buf.name(),
        if buf.text.modified() { "**" } else { "--" },
        file,
        line + 1,
        col + 1,
        ws.current_index() + 1,
        ws.len(),
    );
    let mut padded: String = modeline.chars().take(cols as usize).collect();
    while padded.chars().count() < cols as usize {
        padded.push(' ');
    }
    queue!(
        out,
        cursor::MoveTo(0, rows.saturating_sub(2)),
        style::SetAttribute(style::Attribute::Reverse),
        style::Print(padded),
        style::SetAttribute(style::Attribute::Reset)
    )
}

fn draw_minibuf(
    out: &mut impl Write,
    ws: &Workspace,
    disp: &KeyDispatcher,
    cols: u16,
    rows: u16,
) -> io::Result<()> {
    queue!(
        out,
        cursor::MoveTo(0, rows.saturating_sub(1)),
        terminal::Clear(terminal::ClearType::UntilNewLine)
    )?;
    let text = if disp.mode() == Mode::Minibuffer {
        format!("{}{}", disp.minibuf_prompt(), disp.minibuf_input())
    } else {
        ws.status().to_string()
    };
    let clipped: String = text.chars().take(cols.saturating_sub(1) as usize).collect();
    queue!(out, style::Print(clipped))
}
