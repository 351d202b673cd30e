//! `undercity reconcile [--dry-run] [--lookback N]` — scan recent trunk
//! commits to auto-complete Tasks whose objective matches a commit message.

use std::path::Path;

use clap::Args as ClapArgs;
use undercity_core::TaskStatus;

use super::ExitCode;

#[derive(ClapArgs)]
pub struct Args {
    /// Print what would be completed without touching the Task Board.
    #[arg(long)]
    pub dry_run: bool,

    /// Number of recent trunk commits to scan.
    #[arg(long)]
    pub lookback: Option<usize>,
}

/// A commit message "matches" a Task's objective if the subject text
/// (everything after the short oid) contains the objective, case-insensitive.
fn commit_matches(subject: &str, objective: &str) -> bool {
    subject.to_ascii_lowercase().contains(&objective.to_ascii_lowercase())
}

pub fn run(repo: &Path, args: Args) -> anyhow::Result<ExitCode> {
    let config = super::load_config(repo)?;
    let board = super::open_board(repo, &config)?;

    let log = undercity_git::plumbing::log_oneline(repo, args.lookback.unwrap_or(50))?;
    let subjects: Vec<&str> = log
        .iter()
        .map(|line| line.splitn(2, ' ').nth(1).unwrap_or(""))
        .collect();

    let mut reconciled = 0u32;
    for task in board.list_tasks() {
        if task.status != TaskStatus::Pending {
            continue;
        }
        if subjects.iter().any(|subject| commit_matches(subject, &task.objective)) {
            if args.dry_run {
                println!("would complete {} — {}", task.id, task.objective);
            } else {
                board.mark_complete(&task.id)?;
                println!("completed {} — {}", task.id, task.objective);
            }
            reconciled += 1;
        }
    }

    println!("reconciled={reconciled}");
    Ok(ExitCode::Success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_is_case_insensitive_substring() {
        assert!(commit_matches("Fix Typo in README", "fix typo"));
        assert!(!commit_matches("add a feature", "fix typo"));
    }
}
