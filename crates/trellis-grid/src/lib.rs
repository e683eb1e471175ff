//! trellis-grid: the grid controller for Trellis.
//!
//! This is the one place the pure and stateful halves of the system
//! meet: user gestures (split, close, focus, ratio drags) are turned
//! into layout-tree transforms and session registry calls here, and the
//! resulting tree is what gets projected to UI clients. Tree mutations
//! are serialized through the controller — gestures and spawn
//! completions all apply on its event loop, so a tab's tree has exactly
//! one writer.

pub mod controller;
pub mod lifecycle;

pub use controller::{ControlEvent, GridController, GridError, TabId};
pub use lifecycle::PaneLifecycle;
