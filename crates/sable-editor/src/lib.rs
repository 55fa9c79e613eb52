//! sable-editor: the editor state shared by every component.
//!
//! # Architecture
//!
//! - [`Workspace`] — the bounded buffer collection, current-buffer index,
//!   shared kill-ring, and transient status message.
//! - [`Key`] / [`KeyDecoder`] — raw keyboard bytes decoded into key events
//!   (escape sequences, control bytes, UTF-8 accumulation).
//! - [`InputMultiplexer`] — the event loop's single blocking point: one
//!   bounded poll over the keyboard and every live shell channel, draining
//!   ready sessions before a key is delivered.

pub mod input;
pub mod poll;
pub mod workspace;

pub use input::{Key, KeyDecoder};
pub use poll::{InputMultiplexer, PollOutcome, POLL_INTERVAL_MS};
pub use workspace::{Buffer, EditorError, Workspace, MAX_BUFFERS, SCRATCH_NAME};
