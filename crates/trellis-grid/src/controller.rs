use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;

use trellis_layout::{LayoutError, PaneId, PaneTree, SplitDirection};
use trellis_pty::{SessionError, SessionId, SessionRegistry, DEFAULT_COLS, DEFAULT_ROWS};

use crate::lifecycle::PaneLifecycle;

/// Unique identifier for an open tab.
pub type TabId = u64;

/// Purpose label for the sessions the controller spawns.
const SHELL_PURPOSE: &str = "shell";

/// Errors surfaced to the embedding shell.
#[derive(Debug)]
pub enum GridError {
    TabNotFound(TabId),
    /// The pane exists but has no session bound yet.
    PaneUnbound(PaneId),
    Layout(LayoutError),
    Session(SessionError),
}

impl std::fmt::Display for GridError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GridError::TabNotFound(id) => write!(f, "tab {id} not found"),
            GridError::PaneUnbound(id) => write!(f, "pane {id} has no session"),
            GridError::Layout(e) => write!(f, "{e}"),
            GridError::Session(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for GridError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GridError::Layout(e) => Some(e),
            GridError::Session(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LayoutError> for GridError {
    fn from(e: LayoutError) -> Self {
        GridError::Layout(e)
    }
}

impl From<SessionError> for GridError {
    fn from(e: SessionError) -> Self {
        GridError::Session(e)
    }
}

/// Completions delivered back to the controller's event loop.
///
/// Spawns run off-thread; their results are applied here so tree
/// mutations stay single-writer and a close gesture can legally win the
/// race against a spawn still in flight.
#[derive(Debug)]
pub enum ControlEvent {
    SessionSpawned {
        tab: TabId,
        pane: PaneId,
        result: Result<SessionId, SessionError>,
    },
}

struct Tab {
    tree: PaneTree,
    focus: PaneId,
    working_dir: PathBuf,
    panes: HashMap<PaneId, PaneLifecycle>,
}

/// Binds user gestures to the layout engine and the session registry.
///
/// One controller serves all tabs of one hosting process. Each tab owns
/// one [`PaneTree`]; sessions are shared by reference, so a session
/// referenced from two tabs survives until the last referencing pane is
/// gone.
pub struct GridController {
    registry: Arc<SessionRegistry>,
    tabs: HashMap<TabId, Tab>,
    next_tab_id: TabId,
    events_tx: mpsc::Sender<ControlEvent>,
    events_rx: mpsc::Receiver<ControlEvent>,
}

impl GridController {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        Self {
            registry,
            tabs: HashMap::new(),
            next_tab_id: 1,
            events_tx,
            events_rx,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Open a tab rooted at `working_dir` with a single pane.
    ///
    /// Reuses a live session for the same (directory, purpose) pair if
    /// one exists, so opening the same worktree twice mirrors the running
    /// shell instead of spawning a second one.
    pub async fn open_tab(&mut self, working_dir: &Path) -> Result<TabId, GridError> {
        trellis_git::validate_workdir(working_dir)
            .map_err(|e| GridError::Session(SessionError::Spawn(e)))?;

        let session_id = match self.registry.find_session(working_dir, SHELL_PURPOSE) {
            Some(id) => id,
            None => {
                let registry = Arc::clone(&self.registry);
                let dir = working_dir.to_path_buf();
                tokio::task::spawn_blocking(move || {
                    registry.create_session(&dir, None, SHELL_PURPOSE, DEFAULT_COLS, DEFAULT_ROWS)
                })
                .await
                .map_err(|e| SessionError::Spawn(e.to_string()))??
            }
        };

        let (tree, pane) = PaneTree::new(Some(session_id));
        let tab = self.next_tab_id;
        self.next_tab_id += 1;

        let mut panes = HashMap::new();
        panes.insert(pane, PaneLifecycle::Detached);
        self.tabs.insert(
            tab,
            Tab {
                tree,
                focus: pane,
                working_dir: working_dir.to_path_buf(),
                panes,
            },
        );
        Ok(tab)
    }

    /// Close a tab, destroying every session reachable from its leaves
    /// that no other tab still references.
    pub fn close_tab(&mut self, tab: TabId) {
        let Some(old) = self.tabs.remove(&tab) else {
            return;
        };
        for (_, session) in old.tree.leaves() {
            if let Some(session_id) = session {
                self.release_if_unreferenced(session_id);
            }
        }
    }

    /// Split `pane`, spawning a fresh session for the new leaf.
    ///
    /// Returns the new pane id immediately; the pane sits in `Starting`
    /// until the spawn completes and its [`ControlEvent::SessionSpawned`]
    /// is applied. The new session inherits the split pane's working
    /// directory.
    pub fn on_split(
        &mut self,
        tab: TabId,
        pane: PaneId,
        direction: SplitDirection,
    ) -> Result<PaneId, GridError> {
        let t = self.tabs.get_mut(&tab).ok_or(GridError::TabNotFound(tab))?;

        let source_session = t.tree.session_of(pane);
        let (tree, new_pane) = t.tree.split(pane, direction)?;
        t.tree = tree;
        t.panes.insert(new_pane, PaneLifecycle::Starting);

        let dir = source_session
            .and_then(|id| self.registry.working_dir_of(id))
            .unwrap_or_else(|| {
                self.tabs
                    .get(&tab)
                    .map(|t| t.working_dir.clone())
                    .unwrap_or_else(|| PathBuf::from("."))
            });

        let registry = Arc::clone(&self.registry);
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let spawn_registry = Arc::clone(&registry);
            let spawn_dir = dir.clone();
            let result = tokio::task::spawn_blocking(move || {
                spawn_registry.create_session(
                    &spawn_dir,
                    None,
                    SHELL_PURPOSE,
                    DEFAULT_COLS,
                    DEFAULT_ROWS,
                )
            })
            .await
            .unwrap_or_else(|e| Err(SessionError::Spawn(e.to_string())));

            if events_tx
                .send(ControlEvent::SessionSpawned {
                    tab,
                    pane: new_pane,
                    result: result.clone(),
                })
                .await
                .is_err()
            {
                // Controller gone; never leave an orphaned process.
                if let Ok(session_id) = result {
                    registry.destroy_session(session_id);
                }
            }
        });

        Ok(new_pane)
    }

    /// Split `pane` and show the same session in both halves.
    pub fn split_mirror(
        &mut self,
        tab: TabId,
        pane: PaneId,
        direction: SplitDirection,
    ) -> Result<PaneId, GridError> {
        let t = self.tabs.get_mut(&tab).ok_or(GridError::TabNotFound(tab))?;
        let session = t
            .tree
            .session_of(pane)
            .ok_or(GridError::PaneUnbound(pane))?;

        let (tree, new_pane) = t.tree.split(pane, direction)?;
        t.tree = tree.bind_session(new_pane, session)?;
        t.panes.insert(new_pane, PaneLifecycle::Detached);
        Ok(new_pane)
    }

    /// Close a pane. No-op if the tab or pane is already gone, or if
    /// this is the tab's last pane. Releases the pane's session when no
    /// other pane in any tab references it.
    pub fn on_close(&mut self, tab: TabId, pane: PaneId) {
        let Some(t) = self.tabs.get_mut(&tab) else {
            return;
        };
        if !t.tree.contains_leaf(pane) {
            return;
        }

        let session = t.tree.session_of(pane);
        let closed = t.tree.close(pane);
        if closed.contains_leaf(pane) {
            // Last-pane protection: a tab always shows at least one pane.
            return;
        }

        t.tree = closed;
        t.panes.insert(pane, PaneLifecycle::Closed);
        if t.focus == pane {
            t.focus = t.tree.first_leaf_id();
        }

        if let Some(session_id) = session {
            self.release_if_unreferenced(session_id);
        }
    }

    /// Focus bookkeeping only; no tree mutation.
    pub fn on_focus(&mut self, tab: TabId, pane: PaneId) {
        if let Some(t) = self.tabs.get_mut(&tab) {
            if t.tree.contains_leaf(pane) {
                t.focus = pane;
            }
        }
    }

    /// Drag a split's ratio.
    pub fn on_resize(&mut self, tab: TabId, split: PaneId, ratio: f32) {
        if let Some(t) = self.tabs.get_mut(&tab) {
            t.tree = t.tree.resize(split, ratio);
        }
    }

    /// A client-side component mounted and attached to this pane.
    pub fn on_pane_attached(&mut self, tab: TabId, pane: PaneId) {
        self.transition(tab, pane, PaneLifecycle::Attached);
    }

    /// The last attachment for this pane went away.
    pub fn on_pane_detached(&mut self, tab: TabId, pane: PaneId) {
        self.transition(tab, pane, PaneLifecycle::Detached);
    }

    /// Receive the next completion event. The embedding shell's event
    /// loop awaits this alongside gesture input and feeds the result to
    /// [`GridController::apply`].
    pub async fn next_event(&mut self) -> Option<ControlEvent> {
        self.events_rx.recv().await
    }

    pub fn apply(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::SessionSpawned { tab, pane, result } => {
                self.apply_spawn_result(tab, pane, result)
            }
        }
    }

    /// Apply a finished spawn to the tree.
    ///
    /// Three outcomes: the pane is still there and the spawn succeeded
    /// (bind it); the pane was closed while starting (destroy the
    /// late-arriving session, silently); the spawn failed (log, mark the
    /// pane `Closed`, and collapse it out of the tree so a failed split
    /// never leaves a dangling empty pane).
    pub fn apply_spawn_result(
        &mut self,
        tab: TabId,
        pane: PaneId,
        result: Result<SessionId, SessionError>,
    ) {
        let pane_alive = self
            .tabs
            .get(&tab)
            .map(|t| t.tree.contains_leaf(pane))
            .unwrap_or(false);

        if !pane_alive {
            if let Ok(session_id) = result {
                log::debug!(
                    "pane {pane} closed before session {session_id} started, destroying it"
                );
                self.release_if_unreferenced(session_id);
            }
            return;
        }

        let Some(t) = self.tabs.get_mut(&tab) else {
            return;
        };
        match result {
            Ok(session_id) => match t.tree.bind_session(pane, session_id) {
                Ok(tree) => {
                    t.tree = tree;
                    t.panes.insert(pane, PaneLifecycle::Detached);
                }
                Err(e) => {
                    log::warn!("failed to bind session {session_id} to pane {pane}: {e}");
                    self.registry.destroy_session(session_id);
                }
            },
            Err(e) => {
                log::warn!("pane {pane} could not start: {e}");
                t.panes.insert(pane, PaneLifecycle::Closed);
                t.tree = t.tree.close(pane);
                if t.focus == pane {
                    t.focus = t.tree.first_leaf_id();
                }
            }
        }
    }

    /// Number of panes across all tabs referencing `session`.
    pub fn session_references(&self, session: SessionId) -> usize {
        self.tabs
            .values()
            .map(|t| t.tree.panes_referencing(session).len())
            .sum()
    }

    pub fn tree(&self, tab: TabId) -> Option<&PaneTree> {
        self.tabs.get(&tab).map(|t| &t.tree)
    }

    pub fn focus(&self, tab: TabId) -> Option<PaneId> {
        self.tabs.get(&tab).map(|t| t.focus)
    }

    pub fn pane_state(&self, tab: TabId, pane: PaneId) -> Option<PaneLifecycle> {
        self.tabs.get(&tab).and_then(|t| t.panes.get(&pane).copied())
    }

    pub fn tab_ids(&self) -> Vec<TabId> {
        let mut ids: Vec<TabId> = self.tabs.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn release_if_unreferenced(&self, session: SessionId) {
        if self.session_references(session) == 0 {
            self.registry.destroy_session(session);
        }
    }

    fn transition(&mut self, tab: TabId, pane: PaneId, next: PaneLifecycle) {
        let Some(t) = self.tabs.get_mut(&tab) else {
            return;
        };
        let Some(current) = t.panes.get(&pane).copied() else {
            return;
        };
        if current.can_transition_to(next) {
            t.panes.insert(pane, next);
        } else {
            log::debug!("pane {pane}: ignoring {current:?} -> {next:?}");
        }
    }
}
