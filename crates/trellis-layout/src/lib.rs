//! trellis-layout: pane layout tree for Trellis.
//!
//! A tab's on-screen layout is a binary tree: leaves are panes (each
//! showing one terminal session), internal nodes split the available
//! space between two children. All transforms are pure — they return a
//! new tree that shares untouched subtrees with the old one, so a
//! renderer holding the previous tree never observes a mutation.
//!
//! # Architecture
//!
//! - [`PaneNode`] — a leaf (pane) or a split (two children + ratio).
//! - [`PaneTree`] — the root node plus the counter that mints pane ids.

pub mod node;
pub mod tree;

pub use node::{PaneId, PaneNode, SessionId, SplitDirection};
pub use tree::{LayoutError, PaneTree};
