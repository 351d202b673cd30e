//! `undercity status` — read-only Task Board summary.

use std::path::Path;

use undercity_core::TaskStatus;

use super::ExitCode;

pub fn run(repo: &Path) -> anyhow::Result<ExitCode> {
    let config = super::load_config(repo)?;
    let board = super::open_board(repo, &config)?;
    let tasks = board.list_tasks();

    let mut pending = 0u32;
    let mut in_progress = 0u32;
    let mut complete = 0u32;
    let mut failed = 0u32;
    for task in &tasks {
        match task.status {
            TaskStatus::Pending => pending += 1,
            TaskStatus::InProgress => in_progress += 1,
            TaskStatus::Complete => complete += 1,
            TaskStatus::Failed => failed += 1,
        }
    }

    println!(
        "tasks={} pending={pending} in_progress={in_progress} complete={complete} failed={failed}",
        tasks.len()
    );

    Ok(ExitCode::Success)
}
