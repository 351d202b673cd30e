//! Error type for git plumbing operations.
//!
//! Every variant carries enough detail for a caller to decide whether to
//! retry, escalate, or surface the failure to a human, without needing to
//! re-parse stderr itself.

use std::fmt;
use std::path::PathBuf;

/// Errors raised by [`crate::workspace`] and [`crate::plumbing`].
#[derive(Debug)]
pub enum GitError {
    /// A git subcommand exited non-zero.
    Command {
        /// The full argv, space-joined, for logging.
        command: String,
        /// Captured stderr, trimmed.
        stderr: String,
        /// Process exit code, if the process wasn't killed by a signal.
        exit_code: Option<i32>,
    },
    /// Spawning or waiting on the git process failed.
    Io(std::io::Error),
    /// A workspace path collided with an existing one.
    PathExists { path: PathBuf },
    /// A worktree could not be located on disk.
    NotFound { path: PathBuf },
}

impl fmt::Display for GitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command {
                command,
                stderr,
                exit_code,
            } => {
                write!(f, "`{command}` failed")?;
                if let Some(code) = exit_code {
                    write!(f, " (exit code {code})")?;
                }
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
            Self::Io(e) => write!(f, "I/O error running git: {e}"),
            Self::PathExists { path } => {
                write!(f, "workspace path already exists: {}", path.display())
            }
            Self::NotFound { path } => {
                write!(f, "no workspace found at: {}", path.display())
            }
        }
    }
}

impl std::error::Error for GitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GitError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, GitError>;
