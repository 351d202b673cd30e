//! One module per CLI subcommand, plus the shared plumbing they all need:
//! config loading, exit-code mapping, and Task Board access.

pub mod import_plan;
pub mod orchestrate;
pub mod reconcile;
pub mod status;
pub mod tasks;
pub mod work;

use std::path::Path;
use std::sync::Arc;

use undercity_core::config::UndercityConfig;
use undercity_core::model_client::ModelClient;
use undercity_core::store::StateStore;
use undercity_core::{Task, TaskBoard};

use crate::model_client::ProcessModelClient;

/// Exit codes exactly as spec.md §6 names them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    TaskFailure,
    ConfigError,
    Cancelled,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        match code {
            ExitCode::Success => Self::from(0),
            ExitCode::TaskFailure => Self::from(1),
            ExitCode::ConfigError => Self::from(2),
            ExitCode::Cancelled => Self::from(64),
        }
    }
}

/// Load `.undercity/config.toml` under `repo`, per spec.md §6.
pub fn load_config(repo: &Path) -> anyhow::Result<UndercityConfig> {
    let path = repo.join(".undercity").join("config.toml");
    UndercityConfig::load(&path).map_err(|e| anyhow::anyhow!(e))
}

/// Open the Task Board rooted at `repo`'s state directory, without the rest
/// of the Orchestrator's machinery — used by the read-only and import/
/// reconcile subcommands.
pub fn open_board(repo: &Path, config: &UndercityConfig) -> anyhow::Result<TaskBoard> {
    let state_root = repo.join(&config.repo.state_dir);
    let store = StateStore::new(state_root)?;
    Ok(TaskBoard::new(store))
}

/// Build the out-of-process model client named by `--model-cmd` /
/// `UNDERCITY_MODEL_CMD`. Subcommands that never query a model
/// (`status`, `tasks`, `import-plan`, `reconcile`) don't call this.
pub fn build_model_client(model_cmd: Option<&str>) -> anyhow::Result<Arc<dyn ModelClient>> {
    let cmd = model_cmd.ok_or_else(|| {
        anyhow::anyhow!("no model command configured; pass --model-cmd or set UNDERCITY_MODEL_CMD")
    })?;
    let mut parts = cmd.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("--model-cmd must name a program"))?;
    let args: Vec<String> = parts.map(str::to_owned).collect();
    Ok(Arc::new(ProcessModelClient::new(program, args)))
}

/// One line per Task, for `status`/`tasks`.
pub fn format_task_line(task: &Task) -> String {
    format!(
        "{:<24} {:<10} priority={:<8.1} {}",
        task.id,
        format!("{:?}", task.status).to_lowercase(),
        task.priority,
        task.objective,
    )
}
