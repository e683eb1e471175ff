use std::sync::Arc;

use serde::Serialize;

/// Unique identifier for a node within one pane tree.
pub type PaneId = u64;

/// Identifier of a backing terminal session.
pub type SessionId = u64;

/// Default ratio for a fresh split.
pub const DEFAULT_RATIO: f32 = 0.5;

/// Split ratios are clamped into this open interval so neither child can
/// be squeezed to nothing by a drag gesture.
pub const MIN_RATIO: f32 = 0.05;
pub const MAX_RATIO: f32 = 0.95;

/// Direction of a split between two panes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitDirection {
    /// Side-by-side (left | right).
    Horizontal,
    /// Stacked (top / bottom).
    Vertical,
}

/// A layout node: either a leaf showing one session, or a split dividing
/// space between two children.
///
/// Children are `Arc`s so transforms can reuse untouched subtrees. A leaf
/// with `session: None` is a pane whose backing process has not been
/// spawned yet (panes can exist before their sessions do).
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PaneNode {
    Leaf {
        id: PaneId,
        session: Option<SessionId>,
    },
    Split {
        id: PaneId,
        direction: SplitDirection,
        first: Arc<PaneNode>,
        second: Arc<PaneNode>,
        /// Fraction of space given to `first`, in (0.05, 0.95).
        ratio: f32,
    },
}

impl PaneNode {
    /// Returns this node's id.
    pub fn id(&self) -> PaneId {
        match self {
            PaneNode::Leaf { id, .. } | PaneNode::Split { id, .. } => *id,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, PaneNode::Leaf { .. })
    }

    /// Clamp a requested ratio into the legal interval.
    pub fn clamp_ratio(ratio: f32) -> f32 {
        ratio.clamp(MIN_RATIO, MAX_RATIO)
    }
}
