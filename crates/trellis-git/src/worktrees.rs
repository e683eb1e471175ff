use std::path::Path;
use std::process::Command;

/// One git worktree: where it lives and what it has checked out.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct WorktreeInfo {
    pub path: String,
    pub head: String,
    /// `None` for a detached HEAD.
    pub branch: Option<String>,
}

/// Check that `git` is available on PATH. Returns the path to the binary,
/// or an error with a clear message if not found.
pub fn find_git_binary() -> Result<String, String> {
    let output = Command::new("which")
        .arg("git")
        .output()
        .map_err(|e| format!("failed to search for git binary: {e}"))?;

    if !output.status.success() {
        return Err(
            "git binary not found on PATH. Please install git: https://git-scm.com/downloads"
                .to_string(),
        );
    }

    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if path.is_empty() {
        return Err(
            "git binary not found on PATH. Please install git: https://git-scm.com/downloads"
                .to_string(),
        );
    }

    Ok(path)
}

/// Check that a path can serve as a session's working directory.
///
/// This is the only property the core requires of a directory handed to
/// it by a dialog or worktree listing.
pub fn validate_workdir(path: &Path) -> Result<(), String> {
    if !path.exists() {
        return Err(format!("directory does not exist: {}", path.display()));
    }
    if !path.is_dir() {
        return Err(format!("not a directory: {}", path.display()));
    }
    Ok(())
}

/// List all worktrees for a repository.
pub fn list_worktrees(repo_path: &Path) -> Result<Vec<WorktreeInfo>, String> {
    let output = Command::new("git")
        .args(["worktree", "list", "--porcelain"])
        .current_dir(repo_path)
        .output()
        .map_err(|e| format!("failed to run git: {e}"))?;

    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
    }

    Ok(parse_worktree_list(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse `git worktree list --porcelain` output: one stanza per
/// worktree, blank-line separated, with `worktree`, `HEAD`, and
/// optionally `branch` or `detached` lines.
fn parse_worktree_list(porcelain: &str) -> Vec<WorktreeInfo> {
    let mut worktrees = Vec::new();
    let mut current_path = String::new();
    let mut current_head = String::new();
    let mut current_branch: Option<String> = None;

    let mut flush = |path: &mut String, head: &mut String, branch: &mut Option<String>| {
        if !path.is_empty() {
            worktrees.push(WorktreeInfo {
                path: std::mem::take(path),
                head: std::mem::take(head),
                branch: branch.take(),
            });
        }
    };

    for line in porcelain.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            flush(&mut current_path, &mut current_head, &mut current_branch);
            current_path = path.to_string();
        } else if let Some(head) = line.strip_prefix("HEAD ") {
            current_head = head.to_string();
        } else if let Some(branch) = line.strip_prefix("branch ") {
            current_branch = Some(
                branch
                    .strip_prefix("refs/heads/")
                    .unwrap_or(branch)
                    .to_string(),
            );
        }
    }
    flush(&mut current_path, &mut current_head, &mut current_branch);

    worktrees
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_porcelain_with_branches() {
        let porcelain = "\
worktree /home/dev/repo
HEAD 1111111111111111111111111111111111111111
branch refs/heads/main

worktree /home/dev/repo-wt/feature
HEAD 2222222222222222222222222222222222222222
branch refs/heads/feature/panes
";
        let worktrees = parse_worktree_list(porcelain);
        assert_eq!(
            worktrees,
            vec![
                WorktreeInfo {
                    path: "/home/dev/repo".to_string(),
                    head: "1111111111111111111111111111111111111111".to_string(),
                    branch: Some("main".to_string()),
                },
                WorktreeInfo {
                    path: "/home/dev/repo-wt/feature".to_string(),
                    head: "2222222222222222222222222222222222222222".to_string(),
                    branch: Some("feature/panes".to_string()),
                },
            ]
        );
    }

    #[test]
    fn test_parse_porcelain_detached_head() {
        let porcelain = "\
worktree /home/dev/repo-wt/bisect
HEAD 3333333333333333333333333333333333333333
detached
";
        let worktrees = parse_worktree_list(porcelain);
        assert_eq!(worktrees.len(), 1);
        assert_eq!(worktrees[0].branch, None);
    }

    #[test]
    fn test_parse_porcelain_empty() {
        assert!(parse_worktree_list("").is_empty());
    }

    #[test]
    fn test_validate_workdir() {
        assert!(validate_workdir(&std::env::temp_dir()).is_ok());
        assert!(validate_workdir(Path::new("/nonexistent/trellis/path")).is_err());
    }
}
