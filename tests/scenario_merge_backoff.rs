//! End-to-end Merge Queue scenario: two workspaces that both touch the same
//! line of the same file. The first merges cleanly; the second conflicts
//! against the now-updated trunk and backs off through the queue's
//! exponential-retry schedule before exhausting.

mod common;

use std::path::Path;
use std::time::Duration;

use undercity::git::WorkspaceManager;
use undercity::ids::TaskId;
use undercity::merge_queue::{MergeQueue, MergeStatus};
use undercity::UndercityConfig;

use common::TrunkRepo;

fn write_conflicting_line(workspace_path: &Path, value: &str) {
    std::fs::write(
        workspace_path.join("src").join("lib.rs"),
        format!("pub fn answer() -> i32 {{\n    {value}\n}}\n"),
    )
    .unwrap();
}

/// Spin on `tick` until it returns a result, sleeping briefly between polls
/// — the queue itself enforces the backoff, this just waits it out.
fn tick_until_ready(queue: &mut MergeQueue) -> (TaskId, MergeStatus) {
    loop {
        if let Some(result) = queue.tick() {
            return result;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn second_conflicting_merge_backs_off_then_exhausts() {
    let trunk = TrunkRepo::new();
    let config = UndercityConfig::default();

    let workspaces = WorkspaceManager::new(trunk.path().to_path_buf());
    let ws_a = workspaces.create("task-a", "HEAD").unwrap();
    let ws_b = workspaces.create("task-b", "HEAD").unwrap();

    write_conflicting_line(&ws_a.path, "43");
    let commit_a = common::commit_all(&ws_a.path, "task-a: bump answer to 43");

    write_conflicting_line(&ws_b.path, "99");
    let commit_b = common::commit_all(&ws_b.path, "task-b: bump answer to 99");

    let mut queue = MergeQueue::new(trunk.path().to_path_buf(), &config.merge_queue);
    queue.add(TaskId::new("task-a").unwrap(), ws_a.path.clone(), commit_a);
    queue.add(TaskId::new("task-b").unwrap(), ws_b.path.clone(), commit_b);

    let first = queue.tick().expect("task-a is immediately eligible");
    assert_eq!(first.0.as_str(), "task-a");
    assert_eq!(first.1, MergeStatus::Merged);

    // task-b's merge-base expectation of "42" no longer matches trunk (now
    // "43"), so every retry until exhaustion is a real git conflict, never
    // reaching cargo verification at all.
    for expected_attempt in 1..=3 {
        let (task_id, status) = tick_until_ready(&mut queue);
        assert_eq!(task_id.as_str(), "task-b", "attempt {expected_attempt}");
        assert_eq!(status, MergeStatus::Conflict, "attempt {expected_attempt}");
    }

    let (task_id, status) = tick_until_ready(&mut queue);
    assert_eq!(task_id.as_str(), "task-b");
    assert_eq!(status, MergeStatus::Exhausted);

    // Exhausted items stay in the queue (for `getQueueSummary` visibility)
    // rather than being silently dropped; only a successful merge removes one.
    assert!(!queue.is_empty());
    assert_eq!(queue.summary().exhausted, 1);
}
