//! File Access Tracker — spec.md §4.4.
//!
//! Records per-worker file read/write events and detects cross-task write
//! conflicts. Grounded on `bobisme-maw`'s path-normalization and
//! conflict-by-path logic (`src/merge/partition.rs`, `src/model/diff.rs`),
//! generalized from "files touched by a merge" to "files touched by any
//! active worker".

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, TaskId};

/// The kind of file operation a worker's tool invocation performed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOp {
    Read,
    Write,
    Edit,
    Delete,
}

impl FileOp {
    fn is_mutation(self) -> bool {
        matches!(self, Self::Write | Self::Edit | Self::Delete)
    }
}

/// One recorded file access.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileAccess {
    pub path: String,
    pub op: FileOp,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub task_id: Option<TaskId>,
}

/// All accesses recorded for one worker over one task's lifetime.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileTrackingEntry {
    pub worker_id: String,
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub accesses: Vec<FileAccess>,
}

impl FileTrackingEntry {
    fn is_completed(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// A detected write conflict between two (or more) active tasks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conflict {
    pub task_ids: Vec<TaskId>,
    pub file: String,
    pub severity: ConflictSeverity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictSeverity {
    Error,
}

/// Normalize `raw_path` to a path relative to the trunk repository root.
///
/// - Already trunk-relative paths pass through unchanged (after
///   lexical cleanup: no `.`/`..` components, forward slashes).
/// - Absolute paths inside the worktree are rewritten by computing the
///   path relative to `trunk_root`, via `worktree_path`'s own relation to
///   `trunk_root`'s parent worktrees directory.
/// - Idempotent: `normalize(normalize(p)) == normalize(p)`.
pub fn normalize_to_trunk(trunk_root: &Path, worktree_path: Option<&Path>, raw_path: &Path) -> PathBuf {
    let absolute = if raw_path.is_absolute() {
        raw_path.to_path_buf()
    } else if let Some(wt) = worktree_path {
        wt.join(raw_path)
    } else {
        trunk_root.join(raw_path)
    };

    let relative = absolute.strip_prefix(trunk_root).unwrap_or(&absolute);
    lexically_clean(relative)
}

fn lexically_clean(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in p.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::Prefix(_) => out.push(component.as_os_str()),
        }
    }
    out
}

/// Tracks every file operation a worker performs, across all active tasks.
pub struct FileAccessTracker {
    trunk_root: PathBuf,
    entries: Mutex<HashMap<String, FileTrackingEntry>>,
}

impl FileAccessTracker {
    pub fn new(trunk_root: PathBuf) -> Self {
        Self {
            trunk_root,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn start_task_tracking(&self, task_id: &TaskId, session_id: SessionId) {
        let mut entries = self.entries.lock().expect("tracker mutex poisoned");
        entries.insert(
            task_id.as_str().to_owned(),
            FileTrackingEntry {
                worker_id: task_id.as_str().to_owned(),
                session_id,
                started_at: Utc::now(),
                ended_at: None,
                accesses: Vec::new(),
            },
        );
    }

    pub fn stop_task_tracking(&self, task_id: &TaskId) {
        let mut entries = self.entries.lock().expect("tracker mutex poisoned");
        if let Some(entry) = entries.get_mut(task_id.as_str()) {
            entry.ended_at = Some(Utc::now());
        }
    }

    pub fn record_file_access(
        &self,
        worker_id: &str,
        raw_path: &Path,
        op: FileOp,
        task_id: Option<TaskId>,
        worktree_path: Option<&Path>,
    ) {
        let normalized = normalize_to_trunk(&self.trunk_root, worktree_path, raw_path);
        let mut entries = self.entries.lock().expect("tracker mutex poisoned");
        let entry = entries.entry(worker_id.to_owned()).or_insert_with(|| FileTrackingEntry {
            worker_id: worker_id.to_owned(),
            session_id: SessionId::generate("session"),
            started_at: Utc::now(),
            ended_at: None,
            accesses: Vec::new(),
        });
        entry.accesses.push(FileAccess {
            path: normalized.to_string_lossy().into_owned(),
            op,
            timestamp: Utc::now(),
            task_id,
        });
    }

    /// Union of `write|edit|delete` paths for `worker_id`, deduplicated.
    pub fn get_modified_files(&self, worker_id: &str) -> Vec<String> {
        let entries = self.entries.lock().expect("tracker mutex poisoned");
        let Some(entry) = entries.get(worker_id) else {
            return Vec::new();
        };
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for access in &entry.accesses {
            if access.op.is_mutation() && seen.insert(access.path.clone()) {
                out.push(access.path.clone());
            }
        }
        out
    }

    /// For every path written by ≥2 distinct active task ids, emit one
    /// conflict. Completed and read-only entries are excluded.
    pub fn detect_cross_task_conflicts(&self) -> Vec<Conflict> {
        let entries = self.entries.lock().expect("tracker mutex poisoned");
        // path -> set of task ids that mutated it, among active entries only.
        let mut writers: HashMap<String, Vec<TaskId>> = HashMap::new();
        for entry in entries.values() {
            if entry.is_completed() {
                continue;
            }
            for access in &entry.accesses {
                if !access.op.is_mutation() {
                    continue;
                }
                let Some(task_id) = &access.task_id else {
                    continue;
                };
                let writers_for_path = writers.entry(access.path.clone()).or_default();
                if !writers_for_path.contains(task_id) {
                    writers_for_path.push(task_id.clone());
                }
            }
        }

        writers
            .into_iter()
            .filter(|(_, tasks)| tasks.len() >= 2)
            .map(|(file, task_ids)| Conflict {
                task_ids,
                file,
                severity: ConflictSeverity::Error,
            })
            .collect()
    }

    /// True iff any path in `estimated_paths` is currently written by a
    /// different active task.
    pub fn would_task_conflict(&self, task_id: &TaskId, estimated_paths: &[String]) -> bool {
        let entries = self.entries.lock().expect("tracker mutex poisoned");
        for entry in entries.values() {
            if entry.is_completed() {
                continue;
            }
            for access in &entry.accesses {
                if !access.op.is_mutation() {
                    continue;
                }
                let Some(other_task) = &access.task_id else {
                    continue;
                };
                if other_task == task_id {
                    continue;
                }
                if estimated_paths.iter().any(|p| p == &access.path) {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(s: &str) -> TaskId {
        TaskId::new(s).unwrap()
    }

    #[test]
    fn normalize_is_idempotent() {
        let trunk = Path::new("/repo");
        let p = Path::new("/repo/worktrees/t1/src/../src/lib.rs");
        let once = normalize_to_trunk(trunk, None, p);
        let twice = normalize_to_trunk(trunk, None, &once);
        assert_eq!(once, twice);
        assert_eq!(once, PathBuf::from("src/lib.rs"));
    }

    #[test]
    fn normalize_rewrites_worktree_relative_path() {
        let trunk = Path::new("/repo");
        let worktree = Path::new("/repo/worktrees/t1");
        let normalized = normalize_to_trunk(trunk, Some(worktree), Path::new("src/lib.rs"));
        assert_eq!(normalized, PathBuf::from("src/lib.rs"));
    }

    #[test]
    fn modified_files_dedupes_and_excludes_reads() {
        let tracker = FileAccessTracker::new(PathBuf::from("/repo"));
        tracker.record_file_access("w1", Path::new("a.rs"), FileOp::Read, None, None);
        tracker.record_file_access("w1", Path::new("b.rs"), FileOp::Write, None, None);
        tracker.record_file_access("w1", Path::new("b.rs"), FileOp::Edit, None, None);
        let modified = tracker.get_modified_files("w1");
        assert_eq!(modified, vec!["b.rs".to_owned()]);
    }

    #[test]
    fn cross_task_conflict_detected_for_shared_write() {
        let tracker = FileAccessTracker::new(PathBuf::from("/repo"));
        tracker.start_task_tracking(&tid("t1"), SessionId::generate("s"));
        tracker.start_task_tracking(&tid("t2"), SessionId::generate("s"));
        tracker.record_file_access("t1", Path::new("shared.rs"), FileOp::Write, Some(tid("t1")), None);
        tracker.record_file_access("t2", Path::new("shared.rs"), FileOp::Write, Some(tid("t2")), None);

        let conflicts = tracker.detect_cross_task_conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].file, "shared.rs");
        assert_eq!(conflicts[0].severity, ConflictSeverity::Error);
    }

    #[test]
    fn completed_entries_excluded_from_conflict_detection() {
        let tracker = FileAccessTracker::new(PathBuf::from("/repo"));
        tracker.start_task_tracking(&tid("t1"), SessionId::generate("s"));
        tracker.start_task_tracking(&tid("t2"), SessionId::generate("s"));
        tracker.record_file_access("t1", Path::new("shared.rs"), FileOp::Write, Some(tid("t1")), None);
        tracker.record_file_access("t2", Path::new("shared.rs"), FileOp::Write, Some(tid("t2")), None);
        tracker.stop_task_tracking(&tid("t1"));

        let conflicts = tracker.detect_cross_task_conflicts();
        assert!(conflicts.is_empty());
    }

    #[test]
    fn would_task_conflict_detects_other_active_writer() {
        let tracker = FileAccessTracker::new(PathBuf::from("/repo"));
        tracker.start_task_tracking(&tid("t1"), SessionId::generate("s"));
        tracker.record_file_access("t1", Path::new("x.rs"), FileOp::Write, Some(tid("t1")), None);

        assert!(tracker.would_task_conflict(&tid("t2"), &["x.rs".to_owned()]));
        assert!(!tracker.would_task_conflict(&tid("t1"), &["x.rs".to_owned()]));
    }

    #[test]
    fn read_only_access_never_conflicts() {
        let tracker = FileAccessTracker::new(PathBuf::from("/repo"));
        tracker.start_task_tracking(&tid("t1"), SessionId::generate("s"));
        tracker.start_task_tracking(&tid("t2"), SessionId::generate("s"));
        tracker.record_file_access("t1", Path::new("shared.rs"), FileOp::Read, Some(tid("t1")), None);
        tracker.record_file_access("t2", Path::new("shared.rs"), FileOp::Read, Some(tid("t2")), None);
        assert!(tracker.detect_cross_task_conflicts().is_empty());
    }
}
