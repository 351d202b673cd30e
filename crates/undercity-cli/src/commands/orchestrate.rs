//! `undercity orchestrate <objective>` — submit and run.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Args as ClapArgs;
use undercity_core::router::HeuristicComplexityOracle;
use undercity_core::Orchestrator;

use super::ExitCode;

#[derive(ClapArgs)]
pub struct Args {
    /// Plain-language description of the change to make.
    pub objective: String,

    /// Priority (lower sorts first). Defaults to the Task Board's default.
    #[arg(long)]
    pub priority: Option<f64>,
}

pub fn run(repo: &Path, model_cmd: Option<&str>, args: Args) -> anyhow::Result<ExitCode> {
    let config = super::load_config(repo)?;
    let model_client = super::build_model_client(model_cmd)?;

    let board = super::open_board(repo, &config)?;
    board.add_task(args.objective, args.priority, None)?;

    let mut orchestrator = Orchestrator::new(
        repo.to_path_buf(),
        config,
        model_client,
        Arc::new(HeuristicComplexityOracle),
    )?;

    let cancelled = orchestrator.cancellation_flag();
    ctrlc::set_handler(move || cancelled.store(true, Ordering::Relaxed))
        .map_err(|e| anyhow::anyhow!("failed to install signal handler: {e}"))?;

    let summary = orchestrator.run();
    println!(
        "completed={} failed={} decomposed={} merge_exhausted={}",
        summary.completed, summary.failed, summary.decomposed, summary.merge_exhausted
    );

    Ok(exit_code_for(&summary))
}

pub(crate) fn exit_code_for(summary: &undercity_core::RunSummary) -> ExitCode {
    if summary.cancelled {
        ExitCode::Cancelled
    } else if summary.failed > 0 {
        ExitCode::TaskFailure
    } else {
        ExitCode::Success
    }
}
