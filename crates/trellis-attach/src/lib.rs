//! trellis-attach: multiplexed client attachments for Trellis.
//!
//! One client (a desktop window, a browser tab, a phone) holds a single
//! transport connection but may show many panes. This crate multiplexes
//! any number of session subscriptions over that one connection: each
//! attach delivers the session's buffered scrollback first, then live
//! output, so a reconnecting client always sees a faithful, gap-free
//! pane.
//!
//! # Architecture
//!
//! - [`ServerFrame`] / [`ClientFrame`] — the tagged wire frames carried
//!   by the transport (which is owned by the embedding shell).
//! - [`AttachmentChannel`] — per-client state: subscriptions, pump tasks,
//!   and the outbound frame queue.

pub mod channel;
pub mod frame;

pub use channel::{AttachmentChannel, ClientId};
pub use frame::{decode_client_frame, encode_server_frame, ClientFrame, ServerFrame};
