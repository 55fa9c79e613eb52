//! sable-buffer: the line-oriented text buffer engine for sable.
//!
//! A [`TextBuffer`] owns an ordered sequence of lines plus a cursor, an
//! optional mark, and a viewport offset. Every edit, motion, search, and
//! file operation lives here; higher layers (the workspace, the key
//! dispatcher, shell sessions) mutate buffers exclusively through this API.

pub mod buffer;

pub use buffer::{TextBuffer, MAX_LINE_LEN};
