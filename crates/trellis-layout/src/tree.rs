use std::sync::Arc;

use serde::Serialize;

use crate::node::{PaneId, PaneNode, SessionId, SplitDirection, DEFAULT_RATIO};

/// Errors from layout transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    /// The id does not name a leaf in this tree.
    NotFound(PaneId),
}

impl std::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutError::NotFound(id) => write!(f, "pane {id} not found in tree"),
        }
    }
}

impl std::error::Error for LayoutError {}

/// A tab's pane layout: the root node plus the counter that mints ids.
///
/// Transforms never mutate in place. Each returns a new tree whose root
/// shares every subtree not on the path to the target, so concurrent
/// readers of the old tree are unaffected. All transforms are O(depth).
#[derive(Clone, Debug, Serialize)]
pub struct PaneTree {
    root: Arc<PaneNode>,
    next_pane_seq: PaneId,
}

impl PaneTree {
    /// Create a tree holding a single leaf, optionally bound to a session.
    ///
    /// Returns the tree and the id of its sole pane.
    pub fn new(session: Option<SessionId>) -> (Self, PaneId) {
        let id: PaneId = 1;
        let tree = Self {
            root: Arc::new(PaneNode::Leaf { id, session }),
            next_pane_seq: 2,
        };
        (tree, id)
    }

    pub fn root(&self) -> &PaneNode {
        &self.root
    }

    /// Split the leaf `target`, placing the original pane in the first
    /// slot and a fresh, session-less pane in the second.
    ///
    /// Fails with [`LayoutError::NotFound`] if `target` is absent or
    /// names a split node. Session creation is the caller's job; the new
    /// leaf starts unbound so the pure transform stays decoupled from
    /// process spawning.
    pub fn split(
        &self,
        target: PaneId,
        direction: SplitDirection,
    ) -> Result<(PaneTree, PaneId), LayoutError> {
        let split_id = self.next_pane_seq;
        let leaf_id = self.next_pane_seq + 1;

        let root = split_node(&self.root, target, direction, split_id, leaf_id)
            .ok_or(LayoutError::NotFound(target))?;

        let tree = PaneTree {
            root,
            next_pane_seq: self.next_pane_seq + 2,
        };
        Ok((tree, leaf_id))
    }

    /// Remove the leaf `target`, promoting its sibling into the parent's
    /// place.
    ///
    /// Two cases intentionally return the tree unchanged: a tree with a
    /// single leaf (a tab always shows at least one pane), and an id not
    /// present in the tree (close gestures race tree updates, so closing
    /// an already-closed pane is a no-op, not an error).
    pub fn close(&self, target: PaneId) -> PaneTree {
        if self.root.is_leaf() {
            return self.clone();
        }
        match close_node(&self.root, target) {
            Some(root) => PaneTree {
                root,
                next_pane_seq: self.next_pane_seq,
            },
            None => self.clone(),
        }
    }

    /// Replace the ratio of the split `split_id` with `ratio`, clamped
    /// into (0.05, 0.95). No other node is touched. Unknown ids are a
    /// no-op for the same reason unknown-id close is.
    pub fn resize(&self, split_id: PaneId, ratio: f32) -> PaneTree {
        let ratio = PaneNode::clamp_ratio(ratio);
        match resize_node(&self.root, split_id, ratio) {
            Some(root) => PaneTree {
                root,
                next_pane_seq: self.next_pane_seq,
            },
            None => self.clone(),
        }
    }

    /// Bind a session id to the unbound leaf a split minted.
    pub fn bind_session(
        &self,
        leaf: PaneId,
        session: SessionId,
    ) -> Result<PaneTree, LayoutError> {
        let root =
            bind_node(&self.root, leaf, session).ok_or(LayoutError::NotFound(leaf))?;
        Ok(PaneTree {
            root,
            next_pane_seq: self.next_pane_seq,
        })
    }

    /// All leaves in layout order, as (pane id, bound session) pairs.
    pub fn leaves(&self) -> Vec<(PaneId, Option<SessionId>)> {
        let mut out = Vec::new();
        collect_leaves(&self.root, &mut out);
        out
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().len()
    }

    /// True if a leaf with this id exists.
    pub fn contains_leaf(&self, id: PaneId) -> bool {
        self.leaves().iter().any(|(leaf, _)| *leaf == id)
    }

    /// The session bound to leaf `id`, if the leaf exists and is bound.
    pub fn session_of(&self, id: PaneId) -> Option<SessionId> {
        self.leaves()
            .into_iter()
            .find(|(leaf, _)| *leaf == id)
            .and_then(|(_, session)| session)
    }

    /// Ids of all leaves referencing `session`.
    pub fn panes_referencing(&self, session: SessionId) -> Vec<PaneId> {
        self.leaves()
            .into_iter()
            .filter(|(_, s)| *s == Some(session))
            .map(|(leaf, _)| leaf)
            .collect()
    }

    /// The leftmost/topmost leaf, used for initial focus.
    pub fn first_leaf_id(&self) -> PaneId {
        let mut node = self.root.as_ref();
        loop {
            match node {
                PaneNode::Leaf { id, .. } => return *id,
                PaneNode::Split { first, .. } => node = first.as_ref(),
            }
        }
    }
}

/// Rebuild the path from `node` down to the target leaf, replacing the
/// leaf with a split. Returns `None` if the target is not beneath `node`.
fn split_node(
    node: &Arc<PaneNode>,
    target: PaneId,
    direction: SplitDirection,
    split_id: PaneId,
    leaf_id: PaneId,
) -> Option<Arc<PaneNode>> {
    match node.as_ref() {
        PaneNode::Leaf { id, .. } => {
            if *id != target {
                return None;
            }
            Some(Arc::new(PaneNode::Split {
                id: split_id,
                direction,
                first: Arc::clone(node),
                second: Arc::new(PaneNode::Leaf {
                    id: leaf_id,
                    session: None,
                }),
                ratio: DEFAULT_RATIO,
            }))
        }
        PaneNode::Split {
            id,
            direction: dir,
            first,
            second,
            ratio,
        } => {
            if let Some(new_first) = split_node(first, target, direction, split_id, leaf_id) {
                Some(Arc::new(PaneNode::Split {
                    id: *id,
                    direction: *dir,
                    first: new_first,
                    second: Arc::clone(second),
                    ratio: *ratio,
                }))
            } else {
                split_node(second, target, direction, split_id, leaf_id).map(|new_second| {
                    Arc::new(PaneNode::Split {
                        id: *id,
                        direction: *dir,
                        first: Arc::clone(first),
                        second: new_second,
                        ratio: *ratio,
                    })
                })
            }
        }
    }
}

/// Returns the replacement for `node` with the target leaf removed, or
/// `None` if the target is not beneath `node`. When a split's direct
/// child is the target, the sibling subtree is promoted unchanged.
fn close_node(node: &Arc<PaneNode>, target: PaneId) -> Option<Arc<PaneNode>> {
    match node.as_ref() {
        PaneNode::Leaf { .. } => None,
        PaneNode::Split {
            id,
            direction,
            first,
            second,
            ratio,
        } => {
            if leaf_matches(first, target) {
                return Some(Arc::clone(second));
            }
            if leaf_matches(second, target) {
                return Some(Arc::clone(first));
            }
            if let Some(new_first) = close_node(first, target) {
                Some(Arc::new(PaneNode::Split {
                    id: *id,
                    direction: *direction,
                    first: new_first,
                    second: Arc::clone(second),
                    ratio: *ratio,
                }))
            } else {
                close_node(second, target).map(|new_second| {
                    Arc::new(PaneNode::Split {
                        id: *id,
                        direction: *direction,
                        first: Arc::clone(first),
                        second: new_second,
                        ratio: *ratio,
                    })
                })
            }
        }
    }
}

fn leaf_matches(node: &PaneNode, target: PaneId) -> bool {
    matches!(node, PaneNode::Leaf { id, .. } if *id == target)
}

fn resize_node(node: &Arc<PaneNode>, split_id: PaneId, ratio: f32) -> Option<Arc<PaneNode>> {
    match node.as_ref() {
        PaneNode::Leaf { .. } => None,
        PaneNode::Split {
            id,
            direction,
            first,
            second,
            ratio: old,
        } => {
            if *id == split_id {
                return Some(Arc::new(PaneNode::Split {
                    id: *id,
                    direction: *direction,
                    first: Arc::clone(first),
                    second: Arc::clone(second),
                    ratio,
                }));
            }
            if let Some(new_first) = resize_node(first, split_id, ratio) {
                Some(Arc::new(PaneNode::Split {
                    id: *id,
                    direction: *direction,
                    first: new_first,
                    second: Arc::clone(second),
                    ratio: *old,
                }))
            } else {
                resize_node(second, split_id, ratio).map(|new_second| {
                    Arc::new(PaneNode::Split {
                        id: *id,
                        direction: *direction,
                        first: Arc::clone(first),
                        second: new_second,
                        ratio: *old,
                    })
                })
            }
        }
    }
}

fn bind_node(node: &Arc<PaneNode>, leaf: PaneId, session: SessionId) -> Option<Arc<PaneNode>> {
    match node.as_ref() {
        PaneNode::Leaf { id, .. } => {
            if *id != leaf {
                return None;
            }
            Some(Arc::new(PaneNode::Leaf {
                id: *id,
                session: Some(session),
            }))
        }
        PaneNode::Split {
            id,
            direction,
            first,
            second,
            ratio,
        } => {
            if let Some(new_first) = bind_node(first, leaf, session) {
                Some(Arc::new(PaneNode::Split {
                    id: *id,
                    direction: *direction,
                    first: new_first,
                    second: Arc::clone(second),
                    ratio: *ratio,
                }))
            } else {
                bind_node(second, leaf, session).map(|new_second| {
                    Arc::new(PaneNode::Split {
                        id: *id,
                        direction: *direction,
                        first: Arc::clone(first),
                        second: new_second,
                        ratio: *ratio,
                    })
                })
            }
        }
    }
}

fn collect_leaves(node: &PaneNode, out: &mut Vec<(PaneId, Option<SessionId>)>) {
    match node {
        PaneNode::Leaf { id, session } => out.push((*id, *session)),
        PaneNode::Split { first, second, .. } => {
            collect_leaves(first, out);
            collect_leaves(second, out);
        }
    }
}
