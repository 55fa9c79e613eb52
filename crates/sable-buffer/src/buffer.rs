use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Longest line accepted when loading a file; longer input is split into
/// chunks of this many characters.
pub const MAX_LINE_LEN: usize = 4096;

/// A line-oriented text buffer.
///
/// Holds at least one line at all times. The cursor is a (line, column)
/// pair with the column counted in characters; it always satisfies
/// `line < line_count()` and `column <= line length`. Lines never contain
/// an embedded `\n`.
pub struct TextBuffer {
    name: String,
    lines: Vec<String>,
    cursor_line: usize,
    cursor_col: usize,
    top_line: usize,
    modified: bool,
    path: Option<PathBuf>,
    mark: Option<(usize, usize)>,
}

/// Byte offset of character `col` in `line` (the line length if `col` is
/// past the end).
fn byte_index(line: &str, col: usize) -> usize {
    line.char_indices()
        .nth(col)
        .map(|(i, _)| i)
        .unwrap_or(line.len())
}

fn char_len(line: &str) -> usize {
    line.chars().count()
}

impl TextBuffer {
    /// Create an empty buffer holding a single zero-length line.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            lines: vec![String::new()],
            cursor_line: 0,
            cursor_col: 0,
            top_line: 0,
            modified: false,
            path: None,
            mark: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn line(&self, idx: usize) -> Option<&str> {
        self.lines.get(idx).map(|l| l.as_str())
    }

    /// Current cursor position as (line, column).
    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_line, self.cursor_col)
    }

    /// Move the cursor to the given position, clamped to the buffer.
    pub fn set_cursor(&mut self, line: usize, col: usize) {
        self.cursor_line = line;
        self.cursor_col = col;
        self.clamp_cursor();
    }

    pub fn top_line(&self) -> usize {
        self.top_line
    }

    pub fn modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = Some(path.into());
    }

    pub fn mark(&self) -> Option<(usize, usize)> {
        self.mark
    }

    fn clamp_cursor(&mut self) {
        if self.cursor_line >= self.lines.len() {
            self.cursor_line = self.lines.len() - 1;
        }
        let len = char_len(&self.lines[self.cursor_line]);
        if self.cursor_col > len {
            self.cursor_col = len;
        }
    }

    /// Insert a character at the cursor. A `\n` splits the current line,
    /// leaving the cursor at column 0 of the new line.
    pub fn insert_char(&mut self, c: char) {
        self.clamp_cursor();
        if c == '\n' {
            let at = byte_index(&self.lines[self.cursor_line], self.cursor_col);
            let rest = self.lines[self.cursor_line].split_off(at);
            self.lines.insert(self.cursor_line + 1, rest);
            self.cursor_line += 1;
            self.cursor_col = 0;
        } else {
            let at = byte_index(&self.lines[self.cursor_line], self.cursor_col);
            self.lines[self.cursor_line].insert(at, c);
            self.cursor_col += 1;
        }
        self.modified = true;
    }

    /// Insert a string at the cursor, character by character.
    pub fn insert_str(&mut self, s: &str) {
        for c in s.chars() {
            self.insert_char(c);
        }
    }

    /// Delete the character before the cursor, merging with the previous
    /// line at column 0. No-op at the start of the buffer.
    pub fn delete_backward(&mut self) {
        self.clamp_cursor();
        if self.cursor_col > 0 {
            let at = byte_index(&self.lines[self.cursor_line], self.cursor_col - 1);
            self.lines[self.cursor_line].remove(at);
            self.cursor_col -= 1;
            self.modified = true;
        } else if self.cursor_line > 0 {
            let removed = self.lines.remove(self.cursor_line);
            self.cursor_line -= 1;
            self.cursor_col = char_len(&self.lines[self.cursor_line]);
            self.lines[self.cursor_line].push_str(&removed);
            self.modified = true;
        }
    }

    /// Delete the character under the cursor, merging with the next line
    /// at end of line. No-op at the end of the last line.
    pub fn delete_forward(&mut self) {
        self.clamp_cursor();
        let len = char_len(&self.lines[self.cursor_line]);
        if self.cursor_col < len {
            let at = byte_index(&self.lines[self.cursor_line], self.cursor_col);
            self.lines[self.cursor_line].remove(at);
            self.modified = true;
        } else if self.cursor_line + 1 < self.lines.len() {
            let next = self.lines.remove(self.cursor_line + 1);
            self.lines[self.cursor_line].push_str(&next);
            self.modified = true;
        }
    }

    /// Kill from the cursor to the end of the line, or kill the line
    /// terminator when already at end of line. Returns the killed text
    /// (`"\n"` for a killed terminator), or `None` at the true end of the
    /// buffer.
    pub fn kill_line(&mut self) -> Option<String> {
        self.clamp_cursor();
        let len = char_len(&self.lines[self.cursor_line]);
        if self.cursor_col < len {
            let at = byte_index(&self.lines[self.cursor_line], self.cursor_col);
            let killed = self.lines[self.cursor_line].split_off(at);
            self.modified = true;
            Some(killed)
        } else if self.cursor_line + 1 < self.lines.len() {
            let next = self.lines.remove(self.cursor_line + 1);
            self.lines[self.cursor_line].push_str(&next);
            self.modified = true;
            Some("\n".to_string())
        } else {
            None
        }
    }

    /// Re-insert killed text at the cursor. A `\n` in the source opens a
    /// new line exactly as typing would.
    pub fn yank(&mut self, source: &str) {
        self.insert_str(source);
    }

    /// Record the current cursor position as the mark.
    pub fn set_mark(&mut self) {
        self.clamp_cursor();
        self.mark = Some((self.cursor_line, self.cursor_col));
    }

    /// Region endpoints ordered (start, end), with the mark clamped to the
    /// current buffer bounds. `None` without an active mark.
    fn region_bounds(&self) -> Option<((usize, usize), (usize, usize))> {
        let (ml, mc) = self.mark?;
        let ml = ml.min(self.lines.len() - 1);
        let mc = mc.min(char_len(&self.lines[ml]));
        let cl = self.cursor_line.min(self.lines.len() - 1);
        let cc = self.cursor_col.min(char_len(&self.lines[cl]));
        if (ml, mc) <= (cl, cc) {
            Some(((ml, mc), (cl, cc)))
        } else {
            Some(((cl, cc), (ml, mc)))
        }
    }

    /// Text between mark and cursor, multi-line spans joined by `\n`.
    pub fn region_text(&self) -> Option<String> {
        let ((sl, sc), (el, ec)) = self.region_bounds()?;
        if sl == el {
            let line = &self.lines[sl];
            let a = byte_index(line, sc);
            let b = byte_index(line, ec);
            return Some(line[a..b].to_string());
        }
        let mut text = String::new();
        text.push_str(&self.lines[sl][byte_index(&self.lines[sl], sc)..]);
        for line in &self.lines[sl + 1..el] {
            text.push('\n');
            text.push_str(line);
        }
        text.push('\n');
        text.push_str(&self.lines[el][..byte_index(&self.lines[el], ec)]);
        Some(text)
    }

    /// Copy the region, leaving the buffer unchanged and deactivating the
    /// mark. Returns the copied text.
    pub fn copy_region(&mut self) -> Option<String> {
        let text = self.region_text()?;
        self.mark = None;
        Some(text)
    }

    /// Remove the region, splicing the line before the start to the line
    /// after the end, and move the cursor to the region start. Returns the
    /// removed text.
    pub fn kill_region(&mut self) -> Option<String> {
        let ((sl, sc), (el, ec)) = self.region_bounds()?;
        let text = self.region_text()?;
        if sl == el {
            let a = byte_index(&self.lines[sl], sc);
            let b = byte_index(&self.lines[sl], ec);
            self.lines[sl].replace_range(a..b, "");
        } else {
            let head = self.lines[sl][..byte_index(&self.lines[sl], sc)].to_string();
            let tail = self.lines[el][byte_index(&self.lines[el], ec)..].to_string();
            self.lines[sl] = head + &tail;
            self.lines.drain(sl + 1..=el);
        }
        self.cursor_line = sl;
        self.cursor_col = sc;
        self.mark = None;
        self.modified = true;
        Some(text)
    }

    /// Search forward for a literal substring, starting one character past
    /// the cursor and wrapping cyclically through the whole buffer
    /// (re-scanning the current line from its start on a full wrap). Moves
    /// the cursor to the match start and returns `true`; leaves the cursor
    /// unmoved and returns `false` when the query does not occur. An empty
    /// query never matches.
    pub fn search_forward(&mut self, query: &str) -> bool {
        if query.is_empty() {
            return false;
        }
        self.clamp_cursor();
        let line = &self.lines[self.cursor_line];
        let from = byte_index(line, self.cursor_col + 1);
        if let Some(pos) = line[from..].find(query) {
            self.cursor_col = char_len(&line[..from + pos]);
            return true;
        }
        let count = self.lines.len();
        for off in 1..=count {
            let li = (self.cursor_line + off) % count;
            if let Some(pos) = self.lines[li].find(query) {
                self.cursor_col = char_len(&self.lines[li][..pos]);
                self.cursor_line = li;
                return true;
            }
        }
        false
    }

    /// Replace every non-overlapping, left-to-right occurrence of `search`
    /// on every line. Returns the total occurrence count. An empty search
    /// string is a no-op returning 0.
    pub fn replace_all(&mut self, search: &str, replacement: &str) -> usize {
        if search.is_empty() {
            return 0;
        }
        let mut count = 0;
        for line in &mut self.lines {
            let n = line.matches(search).count();
            if n > 0 {
                *line = line.replace(search, replacement);
                count += n;
            }
        }
        if count > 0 {
            self.modified = true;
            self.clamp_cursor();
        }
        count
    }

    /// Replace the buffer content with the lines of the file at `path`.
    ///
    /// The file is read in full before any content is replaced, so the
    /// buffer is unchanged on failure. One trailing terminator is stripped
    /// per line; lines longer than [`MAX_LINE_LEN`] characters are split;
    /// an empty file yields a single empty line. Resets the cursor and
    /// viewport, records `path`, and clears the modified flag.
    pub fn load_from_file(&mut self, path: &Path) -> io::Result<()> {
        let raw = fs::read(path)?;
        let text = String::from_utf8_lossy(&raw);

        let mut lines: Vec<String> = Vec::new();
        for part in text.split('\n') {
            push_chunked(&mut lines, part);
        }
        if text.ends_with('\n') {
            // split() produces one empty trailing element for the final
            // terminator; it is not a line of the file.
            lines.pop();
        }
        if lines.is_empty() {
            lines.push(String::new());
        }

        log::debug!("loaded {} lines from {}", lines.len(), path.display());
        self.lines = lines;
        self.cursor_line = 0;
        self.cursor_col = 0;
        self.top_line = 0;
        self.mark = None;
        self.modified = false;
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    /// Write every line followed by one terminator to the backing path.
    /// Clears the modified flag on success.
    pub fn save_to_file(&mut self) -> io::Result<()> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "buffer has no file path"))?;
        let file = fs::File::create(&path)?;
        let mut out = BufWriter::new(file);
        for line in &self.lines {
            out.write_all(line.as_bytes())?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        log::debug!("wrote {} lines to {}", self.lines.len(), path.display());
        self.modified = false;
        Ok(())
    }

    /// Append raw subprocess output at the end of the buffer.
    ///
    /// Carriage returns are ignored, a line feed opens a new last line,
    /// backspace/DEL erases the last character of the last line (clamped at
    /// empty), and everything else is appended literally. Bytes are decoded
    /// lossily as UTF-8. The cursor is left at the end of the buffer.
    pub fn append_bytes(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        for c in String::from_utf8_lossy(bytes).chars() {
            match c {
                '\r' => {}
                '\n' => self.lines.push(String::new()),
                '\u{8}' | '\u{7f}' => {
                    if let Some(last) = self.lines.last_mut() {
                        last.pop();
                    }
                }
                _ => {
                    if let Some(last) = self.lines.last_mut() {
                        last.push(c);
                    }
                }
            }
        }
        self.cursor_line = self.lines.len() - 1;
        self.cursor_col = char_len(&self.lines[self.cursor_line]);
        self.modified = true;
    }

    /// Move the cursor by the given line/column deltas, clamping to the
    /// buffer.
    pub fn move_cursor(&mut self, dline: isize, dcol: isize) {
        self.cursor_line = self.cursor_line.saturating_add_signed(dline);
        self.cursor_col = self.cursor_col.saturating_add_signed(dcol);
        self.clamp_cursor();
    }

    /// Move one character left, wrapping to the end of the previous line.
    pub fn move_left(&mut self) {
        self.clamp_cursor();
        if self.cursor_col > 0 {
            self.cursor_col -= 1;
        } else if self.cursor_line > 0 {
            self.cursor_line -= 1;
            self.cursor_col = char_len(&self.lines[self.cursor_line]);
        }
    }

    /// Move one character right, wrapping to the start of the next line.
    pub fn move_right(&mut self) {
        self.clamp_cursor();
        if self.cursor_col < char_len(&self.lines[self.cursor_line]) {
            self.cursor_col += 1;
        } else if self.cursor_line + 1 < self.lines.len() {
            self.cursor_line += 1;
            self.cursor_col = 0;
        }
    }

    pub fn move_bol(&mut self) {
        self.cursor_col = 0;
    }

    pub fn move_eol(&mut self) {
        self.clamp_cursor();
        self.cursor_col = char_len(&self.lines[self.cursor_line]);
    }

    /// Move cursor and viewport down by one page of `height` lines.
    pub fn page_down(&mut self, height: usize) {
        self.cursor_line = (self.cursor_line + height).min(self.lines.len() - 1);
        self.top_line = (self.top_line + height).min(self.lines.len() - 1);
        self.clamp_cursor();
    }

    /// Move cursor and viewport up by one page of `height` lines.
    pub fn page_up(&mut self, height: usize) {
        self.cursor_line = self.cursor_line.saturating_sub(height);
        self.top_line = self.top_line.saturating_sub(height);
        self.clamp_cursor();
    }

    pub fn move_buffer_start(&mut self) {
        self.cursor_line = 0;
        self.cursor_col = 0;
        self.top_line = 0;
    }

    pub fn move_buffer_end(&mut self) {
        self.cursor_line = self.lines.len() - 1;
        self.move_eol();
    }

    /// Skip spaces, then skip to the end of the next run of non-space
    /// characters, staying on the current line.
    pub fn forward_word(&mut self) {
        self.clamp_cursor();
        let chars: Vec<char> = self.lines[self.cursor_line].chars().collect();
        let mut col = self.cursor_col;
        while col < chars.len() && chars[col] == ' ' {
            col += 1;
        }
        while col < chars.len() && chars[col] != ' ' {
            col += 1;
        }
        self.cursor_col = col;
    }

    /// Back over spaces, then to the start of the previous run of
    /// non-space characters, staying on the current line.
    pub fn backward_word(&mut self) {
        self.clamp_cursor();
        let chars: Vec<char> = self.lines[self.cursor_line].chars().collect();
        let mut col = self.cursor_col;
        if col > 0 {
            col -= 1;
        }
        while col > 0 && chars[col] == ' ' {
            col -= 1;
        }
        while col > 0 && chars[col - 1] != ' ' {
            col -= 1;
        }
        self.cursor_col = col;
    }

    /// Delete from the cursor to the end of the next word on the current
    /// line. The cursor stays put.
    pub fn delete_word_forward(&mut self) {
        self.clamp_cursor();
        let start = self.cursor_col;
        self.forward_word();
        let end = self.cursor_col;
        if end > start {
            let a = byte_index(&self.lines[self.cursor_line], start);
            let b = byte_index(&self.lines[self.cursor_line], end);
            self.lines[self.cursor_line].replace_range(a..b, "");
            self.modified = true;
        }
        self.cursor_col = start;
    }

    /// Whole buffer content, lines joined by `\n` (no trailing terminator).
    pub fn content(&self) -> String {
        self.lines.join("\n")
    }

    /// Replace the whole buffer content, leaving the cursor at the end of
    /// the inserted text.
    pub fn set_content(&mut self, content: &str) {
        self.lines = vec![String::new()];
        self.cursor_line = 0;
        self.cursor_col = 0;
        self.top_line = 0;
        self.mark = None;
        self.insert_str(content);
        self.modified = true;
    }

    /// Adjust the viewport offset so the cursor is inside a window of
    /// `height` lines.
    pub fn scroll_into_view(&mut self, height: usize) {
        if height == 0 {
            return;
        }
        if self.cursor_line < self.top_line {
            self.top_line = self.cursor_line;
        }
        if self.cursor_line >= self.top_line + height {
            self.top_line = self.cursor_line + 1 - height;
        }
    }
}

/// Push `part` onto `dst`, splitting it into [`MAX_LINE_LEN`]-char chunks
/// when it is too long.
fn push_chunked(dst: &mut Vec<String>, part: &str) {
    let mut rest = part;
    loop {
        match rest.char_indices().nth(MAX_LINE_LEN) {
            Some((at, _)) => {
                dst.push(rest[..at].to_string());
                rest = &rest[at..];
            }
            None => {
                dst.push(rest.to_string());
                return;
            }
        }
    }
}
