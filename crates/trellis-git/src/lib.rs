//! trellis-git: worktree discovery for Trellis.
//!
//! The core treats git minimally: it needs to know which worktrees exist
//! (to offer one session group per worktree) and whether a path is
//! usable as a process working directory. Everything else about git is
//! someone else's job.

pub mod worktrees;

pub use worktrees::{find_git_binary, list_worktrees, validate_workdir, WorktreeInfo};
