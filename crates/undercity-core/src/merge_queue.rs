//! Merge Queue — spec.md §4.8.
//!
//! A strictly serial queue of verified workspaces waiting to merge onto
//! trunk, with exponential-backoff retry. Grounded on `bobisme-maw`'s
//! `src/merge/mod.rs` and `src/merge_state.rs`, generalized here from
//! tracking a single in-flight merge to a `BinaryHeap` of [`MergeItem`]s
//! ordered by `(next_retry_after, insertion_seq)`.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TaskId;

/// Lifecycle state of one queued merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Pending,
    Conflict,
    TestFailed,
    Merged,
    Exhausted,
}

/// One workspace waiting to merge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeItem {
    pub task_id: TaskId,
    pub workspace_path: std::path::PathBuf,
    pub commit_oid: String,
    pub status: MergeStatus,
    pub attempts: u32,
    pub next_retry_after: DateTime<Utc>,
    pub insertion_seq: u64,
}

/// `delay(k) = min(base * 2^k, cap)` — pure so it can be property-tested
/// independently of queue mechanics (Testable Property 6).
pub fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> u64 {
    let scaled = base_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX).max(1));
    scaled.min(cap_ms)
}

struct HeapEntry {
    next_retry_after: DateTime<Utc>,
    insertion_seq: u64,
    task_id: TaskId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.next_retry_after == other.next_retry_after && self.insertion_seq == other.insertion_seq
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.next_retry_after, self.insertion_seq).cmp(&(other.next_retry_after, other.insertion_seq))
    }
}

/// A snapshot summary for `getQueueSummary`-style reporting (spec.md §4.8).
#[derive(Clone, Debug, Default, Serialize)]
pub struct QueueSummary {
    pub pending: usize,
    pub conflict: usize,
    pub test_failed: usize,
    pub exhausted: usize,
}

/// Serial merge queue: at most one merge runs at a time, the Merge Queue
/// never pushes a change it has not just verified itself after merging.
pub struct MergeQueue {
    trunk_root: std::path::PathBuf,
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_retries: u32,
    items: std::collections::HashMap<TaskId, MergeItem>,
    order: BinaryHeap<Reverse<HeapEntry>>,
    next_seq: u64,
}

impl MergeQueue {
    pub fn new(trunk_root: std::path::PathBuf, cfg: &crate::config::MergeQueueConfig) -> Self {
        Self {
            trunk_root,
            base_delay_ms: cfg.base_delay_ms,
            max_delay_ms: cfg.max_delay_ms,
            max_retries: cfg.max_retries,
            items: std::collections::HashMap::new(),
            order: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Add a verified workspace to the queue, eligible immediately.
    pub fn add(&mut self, task_id: TaskId, workspace_path: std::path::PathBuf, commit_oid: String) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let now = Utc::now();
        self.items.insert(
            task_id.clone(),
            MergeItem {
                task_id: task_id.clone(),
                workspace_path,
                commit_oid,
                status: MergeStatus::Pending,
                attempts: 0,
                next_retry_after: now,
                insertion_seq: seq,
            },
        );
        self.order.push(Reverse(HeapEntry {
            next_retry_after: now,
            insertion_seq: seq,
            task_id,
        }));
    }

    fn next_eligible(&mut self, now: DateTime<Utc>) -> Option<TaskId> {
        while let Some(Reverse(entry)) = self.order.peek() {
            let Some(item) = self.items.get(&entry.task_id) else {
                self.order.pop();
                continue;
            };
            if item.insertion_seq != entry.insertion_seq {
                self.order.pop();
                continue;
            }
            if item.next_retry_after > now {
                return None;
            }
            let task_id = entry.task_id.clone();
            self.order.pop();
            return Some(task_id);
        }
        None
    }

    /// Process the single eligible head-of-queue item, if any: switch trunk
    /// to its branch, merge non-fast-forward, verify on trunk, revert on
    /// failure. Returns the processed item's final status, or `None` if
    /// nothing was eligible.
    pub fn tick(&mut self) -> Option<(TaskId, MergeStatus)> {
        let now = Utc::now();
        let task_id = self.next_eligible(now)?;
        let item = self.items.get_mut(&task_id).expect("in items by construction");

        let base_oid = match undercity_git::plumbing::head_oid(&self.trunk_root) {
            Ok(oid) => oid,
            Err(_) => {
                item.status = MergeStatus::Conflict;
                return Some((task_id, MergeStatus::Conflict));
            }
        };

        let merge_result = undercity_git::plumbing::merge_no_ff(
            &self.trunk_root,
            &item.commit_oid,
            &format!("merge task {task_id}"),
        );

        let status = match merge_result {
            Ok(true) => {
                // spec.md §4.8: verification on trunk after merge is
                // typecheck + tests only, narrower than the Worker's own
                // four-check verification.
                let checks = crate::worker::verify::VerificationChecks::cargo_defaults(
                    &crate::config::WorkerConfig::default(),
                );
                let outcomes = crate::worker::verify::run_merge_checks(&self.trunk_root, &checks);
                if crate::worker::verify::all_passed(&outcomes) {
                    MergeStatus::Merged
                } else {
                    let _ = undercity_git::plumbing::reset_hard(&self.trunk_root, &base_oid);
                    MergeStatus::TestFailed
                }
            }
            Ok(false) => {
                let _ = undercity_git::plumbing::merge_abort(&self.trunk_root);
                MergeStatus::Conflict
            }
            Err(_) => MergeStatus::Conflict,
        };

        self.record_outcome(&task_id, status)
    }

    fn record_outcome(&mut self, task_id: &TaskId, status: MergeStatus) -> Option<(TaskId, MergeStatus)> {
        let item = self.items.get_mut(task_id)?;
        if status == MergeStatus::Merged {
            item.status = MergeStatus::Merged;
            self.items.remove(task_id);
            return Some((task_id.clone(), MergeStatus::Merged));
        }

        item.attempts += 1;
        item.status = status;
        if item.attempts > self.max_retries {
            item.status = MergeStatus::Exhausted;
            return Some((task_id.clone(), MergeStatus::Exhausted));
        }

        // `item.attempts` is 1 after the first failure, so the exponent is
        // `attempts - 1`: retry 1 waits `base`, retry 2 waits `2*base`, etc.
        let delay_ms = backoff_delay(item.attempts - 1, self.base_delay_ms, self.max_delay_ms);
        item.next_retry_after = Utc::now() + chrono::Duration::milliseconds(delay_ms as i64);
        let seq = self.next_seq;
        self.next_seq += 1;
        item.insertion_seq = seq;
        self.order.push(Reverse(HeapEntry {
            next_retry_after: item.next_retry_after,
            insertion_seq: seq,
            task_id: task_id.clone(),
        }));
        Some((task_id.clone(), item.status))
    }

    pub fn summary(&self) -> QueueSummary {
        let mut s = QueueSummary::default();
        for item in self.items.values() {
            match item.status {
                MergeStatus::Pending => s.pending += 1,
                MergeStatus::Conflict => s.conflict += 1,
                MergeStatus::TestFailed => s.test_failed += 1,
                MergeStatus::Exhausted => s.exhausted += 1,
                MergeStatus::Merged => {}
            }
        }
        s
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        assert_eq!(backoff_delay(0, 1000, 30_000), 1000);
        assert_eq!(backoff_delay(1, 1000, 30_000), 2000);
        assert_eq!(backoff_delay(2, 1000, 30_000), 4000);
        assert_eq!(backoff_delay(10, 1000, 30_000), 30_000);
    }

    #[test]
    fn tick_on_empty_queue_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        let mut q = MergeQueue::new(tmp.path().to_path_buf(), &crate::config::MergeQueueConfig::default());
        assert!(q.tick().is_none());
    }

    #[test]
    fn summary_counts_pending_items() {
        let tmp = tempfile::tempdir().unwrap();
        let mut q = MergeQueue::new(tmp.path().to_path_buf(), &crate::config::MergeQueueConfig::default());
        q.add(TaskId::new("t1").unwrap(), tmp.path().to_path_buf(), "abc".to_owned());
        let s = q.summary();
        assert_eq!(s.pending, 1);
        assert!(!q.is_empty());
    }
}
