//! sable-script: the editor's scripting host surface.
//!
//! The embedded engine is a collaborator behind one entry point,
//! [`ScriptHost::evaluate`]. This crate owns the other half of the contract:
//! a registry of typed host functions, populated once at startup, through
//! which scripts drive the editor (`insertText("hi")`, `find("needle")`,
//! ...). Host functions never block indefinitely and never spawn processes;
//! every evaluation failure is caught here and rendered as an error string.

use std::collections::HashMap;

use sable_editor::Workspace;

/// Errors raised while evaluating script source.
#[derive(Debug)]
pub enum ScriptError {
    Parse(String),
    UnknownFunction(String),
    BadArgument(String),
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptError::Parse(msg) => write!(f, "parse error: {msg}"),
            ScriptError::UnknownFunction(name) => write!(f, "unknown function: {name}"),
            ScriptError::BadArgument(msg) => write!(f, "bad argument: {msg}"),
        }
    }
}

impl std::error::Error for ScriptError {}

/// A value passed to or returned from a host function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => write!(f, "{}", items.join(",")),
        }
    }
}

type HostFn = fn(&mut Workspace, &[Value]) -> Result<Value, ScriptError>;

/// The fixed host-function surface plus the evaluate boundary.
pub struct ScriptHost {
    registry: HashMap<&'static str, HostFn>,
}

impl ScriptHost {
    /// Build the host with its full function table.
    pub fn new() -> Self {
        let mut registry: HashMap<&'static str, HostFn> = HashMap::new();
        registry.insert("message", host_message);
        registry.insert("getCurrentBufferName", host_get_current_buffer_name);
        registry.insert("listBuffers", host_list_buffers);
        registry.insert("switchBuffer", host_switch_buffer);
        registry.insert("newBuffer", host_new_buffer);
        registry.insert("insertText", host_insert_text);
        registry.insert("getBufferContent", host_get_buffer_content);
        registry.insert("setBufferContent", host_set_buffer_content);
        registry.insert("openFile", host_open_file);
        registry.insert("saveFile", host_save_file);
        registry.insert("getCurrentLine", host_get_current_line);
        registry.insert("getCurrentCol", host_get_current_col);
        registry.insert("setMark", host_set_mark);
        registry.insert("copyRegion", host_copy_region);
        registry.insert("killRegion", host_kill_region);
        registry.insert("yank", host_yank);
        registry.insert("find", host_find);
        registry.insert("replace", host_replace);
        Self { registry }
    }

    /// Evaluate script source against the workspace.
    ///
    /// One call expression per line; blank lines and `//`/`;;`/`#` comment
    /// lines are skipped. Returns `(true, last value)` on success or
    /// `(false, "Error: ...")` at the first failing statement. Errors never
    /// propagate past this boundary.
    pub fn evaluate(&self, workspace: &mut Workspace, source: &str) -> (bool, String) {
        let mut last = Value::Null;
        for (lineno, line) in source.lines().enumerate() {
            match self.eval_line(workspace, line) {
                Ok(Some(value)) => last = value,
                Ok(None) => {}
                Err(e) => {
                    log::debug!("script error on line {}: {e}", lineno + 1);
                    return (false, format!("Error: line {}: {e}", lineno + 1));
                }
            }
        }
        (true, last.to_string())
    }

    fn eval_line(
        &self,
        workspace: &mut Workspace,
        line: &str,
    ) -> Result<Option<Value>, ScriptError> {
        let Some((name, args)) = parse_statement(line)? else {
            return Ok(None);
        };
        let handler = self
            .registry
            .get(name.as_str())
            .ok_or(ScriptError::UnknownFunction(name))?;
        handler(workspace, &args).map(Some)
    }
}

impl Default for ScriptHost {
    fn default() -> Self {
        Self::new()
    }
}

fn arg_str<'a>(args: &'a [Value], idx: usize, func: &str) -> Result<&'a str, ScriptError> {
    match args.get(idx) {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(ScriptError::BadArgument(format!(
            "{func}: argument {} must be a string, got {other:?}",
            idx + 1
        ))),
        None => Err(ScriptError::BadArgument(format!(
            "{func}: missing argument {}",
            idx + 1
        ))),
    }
}

fn host_message(ws: &mut Workspace, args: &[Value]) -> Result<Value, ScriptError> {
    ws.set_status(arg_str(args, 0, "message")?.to_string());
    Ok(Value::Null)
}

fn host_get_current_buffer_name(ws: &mut Workspace, _: &[Value]) -> Result<Value, ScriptError> {
    Ok(Value::Str(ws.current().name().to_string()))
}

fn host_list_buffers(ws: &mut Workspace, _: &[Value]) -> Result<Value, ScriptError> {
    Ok(Value::List(ws.buffer_names()))
}

fn host_switch_buffer(ws: &mut Workspace, args: &[Value]) -> Result<Value, ScriptError> {
    let name = arg_str(args, 0, "switchBuffer")?.to_string();
    ws.switch_to(&name);
    Ok(Value::Null)
}

fn host_new_buffer(ws: &mut Workspace, args: &[Value]) -> Result<Value, ScriptError> {
    let name = arg_str(args, 0, "newBuffer")?.to_string();
    // Hitting the buffer limit is not a script failure.
    let _ = ws.create_buffer(&name);
    Ok(Value::Null)
}

fn host_insert_text(ws: &mut Workspace, args: &[Value]) -> Result<Value, ScriptError> {
    let text = arg_str(args, 0, "insertText")?.to_string();
    ws.current_mut().text.insert_str(&text);
    Ok(Value::Null)
}

fn host_get_buffer_content(ws: &mut Workspace, _: &[Value]) -> Result<Value, ScriptError> {
    Ok(Value::Str(ws.current().text.content()))
}

fn host_set_buffer_content(ws: &mut Workspace, args: &[Value]) -> Result<Value, ScriptError> {
    let text = arg_str(args, 0, "setBufferContent")?.to_string();
    ws.current_mut().text.set_content(&text);
    Ok(Value::Null)
}

fn host_open_file(ws: &mut Workspace, args: &[Value]) -> Result<Value, ScriptError> {
    let path = arg_str(args, 0, "openFile")?.to_string();
    ws.open_file(&path);
    Ok(Value::Null)
}

fn host_save_file(ws: &mut Workspace, _: &[Value]) -> Result<Value, ScriptError> {
    ws.save_current();
    Ok(Value::Null)
}

fn host_get_current_line(ws: &mut Workspace, _: &[Value]) -> Result<Value, ScriptError> {
    Ok(Value::Int(ws.current().text.cursor().0 as i64 + 1))
}

fn host_get_current_col(ws: &mut Workspace, _: &[Value]) -> Result<Value, ScriptError> {
    Ok(Value::Int(ws.current().text.cursor().1 as i64 + 1))
}

fn host_set_mark(ws: &mut Workspace, _: &[Value]) -> Result<Value, ScriptError> {
    ws.current_mut().text.set_mark();
    Ok(Value::Null)
}

fn host_copy_region(ws: &mut Workspace, _: &[Value]) -> Result<Value, ScriptError> {
    if let Some(text) = ws.current_mut().text.copy_region() {
        ws.set_kill_ring(text);
    }
    Ok(Value::Null)
}

fn host_kill_region(ws: &mut Workspace, _: &[Value]) -> Result<Value, ScriptError> {
    if let Some(text) = ws.current_mut().text.kill_region() {
        ws.set_kill_ring(text);
    }
    Ok(Value::Null)
}

fn host_yank(ws: &mut Workspace, _: &[Value]) -> Result<Value, ScriptError> {
    if let Some(text) = ws.kill_ring().map(str::to_string) {
        ws.current_mut().text.yank(&text);
    }
    Ok(Value::Null)
}

fn host_find(ws: &mut Workspace, args: &[Value]) -> Result<Value, ScriptError> {
    let query = arg_str(args, 0, "find")?.to_string();
    Ok(Value::Bool(ws.current_mut().text.search_forward(&query)))
}

fn host_replace(ws: &mut Workspace, args: &[Value]) -> Result<Value, ScriptError> {
    let search = arg_str(args, 0, "replace")?.to_string();
    let replacement = arg_str(args, 1, "replace")?.to_string();
    Ok(Value::Int(
        ws.current_mut().text.replace_all(&search, &replacement) as i64,
    ))
}

/// Parse one statement line: `name("arg", 2)` with an optional trailing
/// `;`. Returns `None` for blank and comment lines.
fn parse_statement(line: &str) -> Result<Option<(String, Vec<Value>)>, ScriptError> {
    let src = line.trim();
    if src.is_empty() || src.starts_with("//") || src.starts_with(";;") || src.starts_with('#') {
        return Ok(None);
    }
    let mut p = Parser { src, pos: 0 };
    let name = p.ident()?;
    p.skip_ws();
    p.expect('(')?;
    let mut args = Vec::new();
    p.skip_ws();
    if !p.eat(')') {
        loop {
            args.push(p.value()?);
            p.skip_ws();
            if p.eat(')') {
                break;
            }
            p.expect(',')?;
            p.skip_ws();
        }
    }
    p.skip_ws();
    p.eat(';');
    p.skip_ws();
    if !p.at_end() {
        return Err(ScriptError::Parse(format!(
            "trailing input after call: {:?}",
            p.rest()
        )));
    }
    Ok(Some((name, args)))
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.bump();
        }
    }

    fn eat(&mut self, want: char) -> bool {
        if self.peek() == Some(want) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, want: char) -> Result<(), ScriptError> {
        if self.eat(want) {
            Ok(())
        } else {
            Err(ScriptError::Parse(format!(
                "expected {want:?} at {:?}",
                self.rest()
            )))
        }
    }

    fn ident(&mut self) -> Result<String, ScriptError> {
        self.skip_ws();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.bump();
        }
        if self.pos == start {
            return Err(ScriptError::Parse(format!(
                "expected a function name at {:?}",
                self.rest()
            )));
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn value(&mut self) -> Result<Value, ScriptError> {
        self.skip_ws();
        match self.peek() {
            Some('"') => self.string_literal(),
            Some(c) if c.is_ascii_digit() || c == '-' => self.int_literal(),
            other => Err(ScriptError::Parse(format!(
                "expected a string or integer, found {other:?}"
            ))),
        }
    }

    fn string_literal(&mut self) -> Result<Value, ScriptError> {
        self.bump(); // opening quote
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(ScriptError::Parse("unterminated string".to_string())),
                Some('"') => return Ok(Value::Str(out)),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some(c) => {
                        return Err(ScriptError::Parse(format!("unknown escape: \\{c}")));
                    }
                    None => return Err(ScriptError::Parse("unterminated escape".to_string())),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn int_literal(&mut self) -> Result<Value, ScriptError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        self.src[start..self.pos]
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| ScriptError::Parse(format!("bad integer: {:?}", &self.src[start..self.pos])))
    }
}
