//! End-to-end crash-recovery scenario: a task is marked in-progress and has
//! a real workspace (git worktree) registered, simulating an Orchestrator
//! process that was killed mid-attempt. A fresh Orchestrator's `rehydrate`
//! must find that orphaned worktree and mark the task `failed` rather than
//! silently leaving it `in_progress` forever, while leaving the workspace
//! and its checkpoint on disk for forensics.

mod common;

use std::sync::Arc;

use undercity::board::{TaskBoard, TaskStatus};
use undercity::git::WorkspaceManager;
use undercity::ids::SessionId;
use undercity::router::HeuristicComplexityOracle;
use undercity::store::StateStore;
use undercity::worker::checkpoint::Checkpoint;
use undercity::{FakeModelClient, Orchestrator, UndercityConfig};

use common::TrunkRepo;

#[test]
fn crashed_in_progress_task_with_workspace_is_marked_failed() {
    let trunk = TrunkRepo::new();
    let mut config = UndercityConfig::default();
    config.repo.branch = trunk.branch.clone();

    let state_root = trunk.path().join(&config.repo.state_dir);

    // Set up the board state a previous, now-dead, run would have left
    // behind: one task marked in_progress with a live worktree and a
    // checkpoint recorded mid-execution.
    let store = StateStore::new(state_root.clone()).unwrap();
    let board = TaskBoard::new(store);
    let task = board.add_task("do a thing", None, None).unwrap();
    let session_id = SessionId::generate("s");
    board.mark_in_progress(&task.id, session_id.clone()).unwrap();

    let workspaces = WorkspaceManager::new(state_root.clone());
    let workspace = workspaces.create(task.id.as_str(), "HEAD").unwrap();

    let checkpoint = Checkpoint::new(task.id.clone(), session_id);
    checkpoint.write(&workspace.path).unwrap();

    // A fresh Orchestrator, as if the process had just been restarted.
    let orch = Orchestrator::new(
        trunk.path().to_path_buf(),
        config,
        Arc::new(FakeModelClient::new(vec![])),
        Arc::new(HeuristicComplexityOracle),
    )
    .unwrap();

    orch.rehydrate();

    let after = board.get_task(&task.id).unwrap();
    assert_eq!(after.status, TaskStatus::Failed);

    // The crashed session's state is left untouched for forensics.
    assert!(workspace.path.join(".assignment.json").exists());
    let recovered = Checkpoint::read(&workspace.path).unwrap();
    assert_eq!(recovered.task_id, task.id);
}
