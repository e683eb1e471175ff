//! trellis-pty: backing processes and session lifecycle for Trellis.
//!
//! A session is a PTY-backed shell process that outlives any particular
//! pane or client showing it. This crate owns process lifecycle end to
//! end: spawning, input, resize, bounded scrollback retention, output
//! fan-out to subscribers, and teardown.
//!
//! # Architecture
//!
//! - [`PtyHandle`] — low-level PTY process management (spawn, read,
//!   write, resize, close, kill).
//! - [`ScrollbackBuffer`] — bounded byte ring retaining recent output for
//!   replay to newly attaching subscribers.
//! - [`Session`] — one backing process plus its scrollback and
//!   subscriber set.
//! - [`SessionRegistry`] — the process-wide session table; the only
//!   component permitted to start or terminate backing processes.

pub mod pty;
pub mod registry;
pub mod scrollback;
pub mod session;

pub use pty::{PtyError, PtyHandle};
pub use registry::{Attachment, RegistryConfig, SessionRegistry, DEFAULT_COLS, DEFAULT_ROWS};
pub use scrollback::ScrollbackBuffer;
pub use session::{Session, SessionError, SessionEvent, SessionId, SessionStatus, SubscriberId};
