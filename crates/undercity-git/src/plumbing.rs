//! Thin wrappers over the `git` CLI, one function per subcommand used by
//! the Workspace Manager and Merge Queue.
//!
//! Every function shells out via [`std::process::Command`] rather than
//! linking a git library — the orchestrator only ever needs a handful of
//! porcelain operations, and running the real `git` binary keeps behavior
//! identical to what a human operator would see.

use std::path::Path;
use std::process::Command;

use crate::error::{GitError, Result};

fn run(dir: &Path, args: &[&str]) -> Result<std::process::Output> {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(GitError::Io)
}

fn stdout_of(dir: &Path, args: &[&str]) -> Result<String> {
    let output = run(dir, args)?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(GitError::Command {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            exit_code: output.status.code(),
        })
    }
}

/// Resolve `revision` to a full commit OID.
pub fn rev_parse(dir: &Path, revision: &str) -> Result<String> {
    Ok(stdout_of(dir, &["rev-parse", revision])?.trim().to_owned())
}

/// Current HEAD commit OID.
pub fn head_oid(dir: &Path) -> Result<String> {
    rev_parse(dir, "HEAD")
}

/// `git worktree add --detach <path> <commit>`.
pub fn worktree_add(repo_root: &Path, worktree_path: &Path, base_commit: &str) -> Result<()> {
    let path_str = worktree_path.to_string_lossy().into_owned();
    stdout_of(
        repo_root,
        &["worktree", "add", "--detach", &path_str, base_commit],
    )?;
    Ok(())
}

/// `git worktree remove [--force] <path>`.
pub fn worktree_remove(repo_root: &Path, worktree_path: &Path, force: bool) -> Result<()> {
    let path_str = worktree_path.to_string_lossy().into_owned();
    let mut args = vec!["worktree", "remove"];
    if force {
        args.push("--force");
    }
    args.push(&path_str);
    stdout_of(repo_root, &args)?;
    Ok(())
}

/// `git worktree list --porcelain`, parsed into `(path, commit)` pairs.
pub fn worktree_list(repo_root: &Path) -> Result<Vec<(String, String)>> {
    let raw = stdout_of(repo_root, &["worktree", "list", "--porcelain"])?;
    let mut out = Vec::new();
    let mut current_path: Option<String> = None;
    for line in raw.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            current_path = Some(path.to_owned());
        } else if let Some(oid) = line.strip_prefix("HEAD ") {
            if let Some(path) = current_path.take() {
                out.push((path, oid.to_owned()));
            }
        }
    }
    Ok(out)
}

/// `git status --porcelain`, one raw line per change.
pub fn status_porcelain(dir: &Path) -> Result<Vec<String>> {
    let raw = stdout_of(dir, &["status", "--porcelain"])?;
    Ok(raw.lines().map(str::to_owned).collect())
}

/// `git diff --stat`, raw text.
pub fn diff_stat(dir: &Path) -> Result<String> {
    stdout_of(dir, &["diff", "--stat"])
}

/// `git diff HEAD`, raw text — used by the review pipeline.
pub fn diff_head(dir: &Path) -> Result<String> {
    stdout_of(dir, &["diff", "HEAD"])
}

/// Whether `dir` has any uncommitted changes (tracked or untracked).
pub fn has_uncommitted_changes(dir: &Path) -> Result<bool> {
    Ok(!status_porcelain(dir)?.is_empty())
}

/// `git add -A && git commit -m <message>` inside a workspace, producing a
/// single commit of everything the worker changed. Deliberately not
/// `--allow-empty`: callers are expected to check [`has_uncommitted_changes`]
/// first, so a no-op attempt never masquerades as a mergeable commit.
pub fn commit_all(dir: &Path, message: &str) -> Result<String> {
    stdout_of(dir, &["add", "-A"])?;
    stdout_of(dir, &["commit", "-m", message])?;
    head_oid(dir)
}

/// Switch the trunk checkout to `branch_ref`.
pub fn checkout(dir: &Path, branch_ref: &str) -> Result<()> {
    stdout_of(dir, &["checkout", branch_ref])?;
    Ok(())
}

/// Merge `commit` into the current branch with `--no-ff`.
///
/// Returns `Ok(true)` on a clean merge, `Ok(false)` on a conflict (the merge
/// is left in progress for the caller to abort). Any other git failure is
/// an `Err`.
pub fn merge_no_ff(dir: &Path, commit: &str, message: &str) -> Result<bool> {
    let output = run(
        dir,
        &["merge", "--no-ff", "-m", message, commit],
    )?;
    if output.status.success() {
        return Ok(true);
    }
    // A conflicting merge still exits non-zero but leaves a recognizable
    // state; distinguish it from a hard failure by checking for conflict
    // markers via `git status`.
    let conflicted = status_porcelain(dir)
        .map(|lines| lines.iter().any(|l| l.starts_with("UU") || l.starts_with("AA")))
        .unwrap_or(false);
    if conflicted {
        Ok(false)
    } else {
        Err(GitError::Command {
            command: format!("git merge --no-ff {commit}"),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            exit_code: output.status.code(),
        })
    }
}

/// `git merge --abort`.
pub fn merge_abort(dir: &Path) -> Result<()> {
    stdout_of(dir, &["merge", "--abort"])?;
    Ok(())
}

/// `git reset --hard <commit>` — used to revert a merge whose post-merge
/// verification failed on trunk.
pub fn reset_hard(dir: &Path, commit: &str) -> Result<()> {
    stdout_of(dir, &["reset", "--hard", commit])?;
    Ok(())
}

/// `git log --oneline -n <count>` on the default branch.
pub fn log_oneline(dir: &Path, count: usize) -> Result<Vec<String>> {
    let raw = stdout_of(dir, &["log", "--oneline", "-n", &count.to_string()])?;
    Ok(raw.lines().map(str::to_owned).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn init_repo(dir: &Path) {
        Command::new("git").args(["init", "-q"]).current_dir(dir).status().unwrap();
        Command::new("git").args(["config", "user.email", "a@b.c"]).current_dir(dir).status().unwrap();
        Command::new("git").args(["config", "user.name", "t"]).current_dir(dir).status().unwrap();
        std::fs::write(dir.join("a.txt"), "hello\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir).status().unwrap();
        Command::new("git").args(["commit", "-q", "-m", "init"]).current_dir(dir).status().unwrap();
    }

    #[test]
    fn rev_parse_head_matches_log() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let oid = head_oid(tmp.path()).unwrap();
        assert_eq!(oid.len(), 40);
    }

    #[test]
    fn status_porcelain_empty_on_clean_tree() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        assert!(status_porcelain(tmp.path()).unwrap().is_empty());
        assert!(!has_uncommitted_changes(tmp.path()).unwrap());
    }

    #[test]
    fn status_porcelain_reports_untracked_file() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        std::fs::write(tmp.path().join("b.txt"), "new\n").unwrap();
        assert!(has_uncommitted_changes(tmp.path()).unwrap());
    }
}
