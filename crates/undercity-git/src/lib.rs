//! Process-based git plumbing backing the Workspace Manager and Merge Queue.
//!
//! This crate deliberately shells out to the real `git` binary rather than
//! linking a git library: the orchestrator's needs are a small, stable set
//! of porcelain operations (worktree add/remove, status, diff, merge), and
//! running the actual binary keeps behavior identical to what an operator
//! sees running the same commands by hand.

pub mod error;
pub mod plumbing;
pub mod workspace;

pub use error::GitError;
pub use workspace::{DestroyOptions, Workspace, WorkspaceManager};
