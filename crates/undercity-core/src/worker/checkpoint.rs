//! Per-workspace checkpoint file (`.assignment.json`) — spec.md §6.
//!
//! Written at least every `checkpoint_interval_ms` during the agent loop so
//! a restarted Orchestrator can tell how far a task got. Lives inside the
//! workspace itself, not under `.undercity/`, since it travels with the
//! workspace when it is kept for forensics.

use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, TaskId};

const CHECKPOINT_FILE: &str = ".assignment.json";

/// One recorded attempt against a task, appended to the checkpoint's
/// `attempts` list at the end of each try.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub tier: String,
    pub error_category: Option<String>,
    pub detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// The on-disk snapshot of a Worker's progress on one task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task_id: TaskId,
    pub session_id: SessionId,
    pub phase: String,
    pub attempt: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
}

#[derive(Debug)]
pub struct CheckpointError(std::io::Error);

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "checkpoint write failed: {}", self.0)
    }
}

impl std::error::Error for CheckpointError {}

impl Checkpoint {
    pub fn new(task_id: TaskId, session_id: SessionId) -> Self {
        Self {
            task_id,
            session_id,
            phase: "starting".to_owned(),
            attempt: 0,
            updated_at: Utc::now(),
            attempts: Vec::new(),
        }
    }

    fn path(workspace_path: &Path) -> PathBuf {
        workspace_path.join(CHECKPOINT_FILE)
    }

    /// Atomic temp-sibling-then-rename write, same discipline as the State
    /// Store (`crate::store::StateStore::write`), duplicated here because
    /// the checkpoint lives outside the store's root.
    pub fn write(&self, workspace_path: &Path) -> Result<(), CheckpointError> {
        let path = Self::path(workspace_path);
        let tmp_path = {
            let mut p = path.as_os_str().to_owned();
            p.push(".tmp");
            PathBuf::from(p)
        };
        let bytes = serde_json::to_vec_pretty(self).expect("Checkpoint serializes");
        let mut f = std::fs::File::create(&tmp_path).map_err(CheckpointError)?;
        f.write_all(&bytes).map_err(CheckpointError)?;
        f.sync_all().map_err(CheckpointError)?;
        std::fs::rename(&tmp_path, &path).map_err(CheckpointError)?;
        Ok(())
    }

    pub fn read(workspace_path: &Path) -> Option<Self> {
        let bytes = std::fs::read(Self::path(workspace_path)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// Tracks elapsed time since the last checkpoint write so the agent loop can
/// decide whether it's due for another one (spec.md §4.6: "at least every
/// 30s").
pub struct CheckpointClock {
    interval: std::time::Duration,
    last_write: Instant,
}

impl CheckpointClock {
    pub fn new(interval: std::time::Duration) -> Self {
        Self {
            interval,
            last_write: Instant::now(),
        }
    }

    pub fn due(&self) -> bool {
        self.last_write.elapsed() >= self.interval
    }

    pub fn mark_written(&mut self) {
        self.last_write = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let cp = Checkpoint::new(TaskId::new("t1").unwrap(), SessionId::generate("s"));
        cp.write(tmp.path()).unwrap();
        let back = Checkpoint::read(tmp.path()).unwrap();
        assert_eq!(back.task_id, cp.task_id);
        assert!(!tmp.path().join(".assignment.json.tmp").exists());
    }

    #[test]
    fn missing_checkpoint_reads_as_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(Checkpoint::read(tmp.path()).is_none());
    }

    #[test]
    fn clock_is_not_due_immediately() {
        let clock = CheckpointClock::new(std::time::Duration::from_secs(30));
        assert!(!clock.due());
    }

    #[test]
    fn clock_becomes_due_after_interval() {
        let mut clock = CheckpointClock::new(std::time::Duration::from_millis(5));
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(clock.due());
        clock.mark_written();
        assert!(!clock.due());
    }
}
