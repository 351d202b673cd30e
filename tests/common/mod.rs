//! Shared integration-test scaffolding: a throwaway trunk repository with a
//! tracked Cargo project that passes check/clippy/test/fmt cleanly, so
//! Worker and Merge Queue verification succeed without a real model.
#![allow(dead_code)]

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

/// A git repo (the orchestrator's "trunk") containing one committed Cargo
/// crate. `branch` is whatever the local `git` defaults a fresh `init` to.
pub struct TrunkRepo {
    dir: TempDir,
    pub branch: String,
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git").args(args).current_dir(dir).status().expect("spawn git");
    assert!(status.success(), "git {args:?} failed");
}

impl TrunkRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        git(dir.path(), &["init", "-q"]);
        git(dir.path(), &["config", "user.email", "a@b.c"]);
        git(dir.path(), &["config", "user.name", "t"]);
        std::fs::write(
            dir.path().join("Cargo.toml"),
            "[package]\nname = \"scratch\"\nversion = \"0.1.0\"\nedition = \"2021\"\n",
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src").join("lib.rs"),
            "pub fn answer() -> i32 {\n    42\n}\n",
        )
        .unwrap();
        git(dir.path(), &["add", "-A"]);
        git(dir.path(), &["commit", "-q", "-m", "init"]);

        let branch = String::from_utf8(
            Command::new("git")
                .args(["branch", "--show-current"])
                .current_dir(dir.path())
                .output()
                .expect("branch --show-current")
                .stdout,
        )
        .unwrap()
        .trim()
        .to_owned();

        Self { dir, branch }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Commit whatever is on disk at `workspace_path` and return the new OID.
pub fn commit_all(workspace_path: &Path, message: &str) -> String {
    undercity::git::plumbing::commit_all(workspace_path, message).expect("commit_all")
}
