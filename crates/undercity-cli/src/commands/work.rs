//! `undercity work [--count N]` — drain the backlog serially.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Args as ClapArgs;
use undercity_core::router::HeuristicComplexityOracle;
use undercity_core::Orchestrator;

use super::orchestrate::exit_code_for;
use super::ExitCode;

#[derive(ClapArgs)]
pub struct Args {
    /// Maximum number of Workers to start this run. Unbounded if omitted.
    #[arg(long)]
    pub count: Option<u32>,
}

pub fn run(repo: &Path, model_cmd: Option<&str>, args: Args) -> anyhow::Result<ExitCode> {
    let mut config = super::load_config(repo)?;
    // "serially" per spec.md §6: one Worker at a time regardless of the
    // configured concurrency limit.
    config.orchestrator.max_concurrent = 1;
    let model_client = super::build_model_client(model_cmd)?;

    let mut orchestrator = Orchestrator::new(
        repo.to_path_buf(),
        config,
        model_client,
        Arc::new(HeuristicComplexityOracle),
    )?;

    let cancelled = orchestrator.cancellation_flag();
    ctrlc::set_handler(move || cancelled.store(true, Ordering::Relaxed))
        .map_err(|e| anyhow::anyhow!("failed to install signal handler: {e}"))?;

    let summary = orchestrator.run_up_to(args.count);
    println!(
        "completed={} failed={} decomposed={} merge_exhausted={}",
        summary.completed, summary.failed, summary.decomposed, summary.merge_exhausted
    );

    Ok(exit_code_for(&summary))
}
