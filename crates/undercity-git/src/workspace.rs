//! Workspace Manager: creates and destroys per-task filesystem sandboxes
//! branched from trunk via `git worktree`.
//!
//! Grounded on `bobisme-maw`'s `GitWorktreeBackend` (`src/backend/git.rs`):
//! each workspace is a detached linked worktree under a well-known
//! directory, keyed by task id so a crashed run can recover workspaces by
//! scanning the filesystem alone.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{GitError, Result};
use crate::plumbing;

/// A single task's isolated filesystem sandbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workspace {
    /// Absolute path to the worktree's working directory.
    pub path: PathBuf,
    /// The task this workspace was created for.
    pub task_id: String,
    /// Commit OID the workspace was branched from.
    pub base_commit: String,
}

impl fmt::Display for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "workspace({}) at {}", self.task_id, self.path.display())
    }
}

/// Whether [`WorkspaceManager::destroy`] should preserve a dirty workspace
/// for forensics instead of deleting it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DestroyOptions {
    pub keep: bool,
}

/// Creates, destroys, and enumerates per-task workspaces rooted under
/// `<trunk_root>/<worktrees_dir_name>/<taskId>`.
pub struct WorkspaceManager {
    trunk_root: PathBuf,
    worktrees_dir_name: &'static str,
}

impl WorkspaceManager {
    /// `trunk_root` is the path to the checked-out trunk repository
    /// (containing `.git`). Workspaces are created as sibling directories
    /// under `worktrees/` inside the state directory convention used by
    /// the rest of the core (`.undercity/worktrees/<taskId>`), so callers
    /// typically pass `<repo_root>/.undercity` joined with `worktrees`.
    pub fn new(trunk_root: PathBuf) -> Self {
        Self {
            trunk_root,
            worktrees_dir_name: "worktrees",
        }
    }

    fn worktrees_dir(&self) -> PathBuf {
        self.trunk_root.join(self.worktrees_dir_name)
    }

    /// Path a workspace for `task_id` would live at, whether or not it
    /// currently exists.
    pub fn path_for(&self, task_id: &str) -> PathBuf {
        self.worktrees_dir().join(task_id)
    }

    /// Create a new workspace for `task_id`, branched from `base_ref`
    /// (any git revision the trunk repo can resolve).
    pub fn create(&self, task_id: &str, base_ref: &str) -> Result<Workspace> {
        let path = self.path_for(task_id);
        if path.exists() {
            return Err(GitError::PathExists { path });
        }
        std::fs::create_dir_all(self.worktrees_dir())?;

        let base_commit = plumbing::rev_parse(&self.trunk_root, base_ref)?;
        plumbing::worktree_add(&self.trunk_root, &path, &base_commit)?;

        Ok(Workspace {
            path,
            task_id: task_id.to_owned(),
            base_commit,
        })
    }

    /// Remove a workspace's worktree and, unless `opts.keep` is set and the
    /// workspace has uncommitted changes, its directory on disk.
    pub fn destroy(&self, workspace: &Workspace, opts: DestroyOptions) -> Result<()> {
        if !workspace.path.exists() {
            return Err(GitError::NotFound {
                path: workspace.path.clone(),
            });
        }

        let dirty = plumbing::has_uncommitted_changes(&workspace.path).unwrap_or(false);
        if opts.keep && dirty {
            tracing::warn!(
                task_id = %workspace.task_id,
                path = %workspace.path.display(),
                "preserving dirty workspace for forensics"
            );
            return Ok(());
        }

        plumbing::worktree_remove(&self.trunk_root, &workspace.path, true)?;
        Ok(())
    }

    /// Enumerate every workspace currently registered as a git worktree
    /// under the trunk, regardless of which process created it — this is
    /// what lets a restarted Orchestrator rediscover in-flight work.
    pub fn list_active(&self) -> Result<Vec<Workspace>> {
        let worktrees_dir = self.worktrees_dir();
        let entries = plumbing::worktree_list(&self.trunk_root)?;
        let mut out = Vec::new();
        for (path_str, oid) in entries {
            let path = PathBuf::from(&path_str);
            if !path.starts_with(&worktrees_dir) {
                continue; // the trunk checkout itself, or an unrelated worktree
            }
            let Some(task_id) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            out.push(Workspace {
                path: path.clone(),
                task_id: task_id.to_owned(),
                base_commit: oid,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn init_trunk() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        Command::new("git").args(["init", "-q"]).current_dir(tmp.path()).status().unwrap();
        Command::new("git").args(["config", "user.email", "a@b.c"]).current_dir(tmp.path()).status().unwrap();
        Command::new("git").args(["config", "user.name", "t"]).current_dir(tmp.path()).status().unwrap();
        std::fs::write(tmp.path().join("README.md"), "hi\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(tmp.path()).status().unwrap();
        Command::new("git").args(["commit", "-q", "-m", "init"]).current_dir(tmp.path()).status().unwrap();
        tmp
    }

    #[test]
    fn create_then_list_then_destroy() {
        let trunk = init_trunk();
        let mgr = WorkspaceManager::new(trunk.path().to_path_buf());

        let ws = mgr.create("task-1", "HEAD").unwrap();
        assert!(ws.path.exists());
        assert_eq!(ws.task_id, "task-1");

        let active = mgr.list_active().unwrap();
        assert!(active.iter().any(|w| w.task_id == "task-1"));

        mgr.destroy(&ws, DestroyOptions::default()).unwrap();
        assert!(!ws.path.exists());
    }

    #[test]
    fn create_rejects_duplicate_path() {
        let trunk = init_trunk();
        let mgr = WorkspaceManager::new(trunk.path().to_path_buf());
        let _ws = mgr.create("task-2", "HEAD").unwrap();
        let err = mgr.create("task-2", "HEAD").unwrap_err();
        assert!(matches!(err, GitError::PathExists { .. }));
    }

    #[test]
    fn distinct_tasks_get_distinct_paths() {
        let trunk = init_trunk();
        let mgr = WorkspaceManager::new(trunk.path().to_path_buf());
        let a = mgr.create("task-a", "HEAD").unwrap();
        let b = mgr.create("task-b", "HEAD").unwrap();
        assert_ne!(a.path, b.path);
    }

    #[test]
    fn destroy_keeps_dirty_workspace_when_requested() {
        let trunk = init_trunk();
        let mgr = WorkspaceManager::new(trunk.path().to_path_buf());
        let ws = mgr.create("task-dirty", "HEAD").unwrap();
        std::fs::write(ws.path.join("new.txt"), "uncommitted\n").unwrap();

        mgr.destroy(&ws, DestroyOptions { keep: true }).unwrap();
        assert!(ws.path.exists(), "dirty workspace should survive with keep=true");
    }
}
