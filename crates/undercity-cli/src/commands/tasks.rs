//! `undercity tasks` — read-only listing of every tracked Task.

use std::path::Path;

use super::ExitCode;

pub fn run(repo: &Path) -> anyhow::Result<ExitCode> {
    let config = super::load_config(repo)?;
    let board = super::open_board(repo, &config)?;

    for task in board.list_tasks() {
        println!("{}", super::format_task_line(&task));
    }

    Ok(ExitCode::Success)
}
