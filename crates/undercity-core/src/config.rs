//! Orchestrator-wide configuration (`.undercity/config.toml`).
//!
//! Grounded on `bobisme-maw`'s `ManifoldConfig` (`src/config.rs`): a typed,
//! `serde`-deserialized struct tree, `#[serde(deny_unknown_fields)]` per
//! struct, `#[serde(default = "...")]` per field, missing file → all
//! defaults (never an error). Every component listed in spec.md §9's
//! "replace dynamic JSON config with explicit option structs" note gets its
//! own struct here rather than a shared bag of `serde_json::Value`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level orchestrator configuration.
#[derive(Clone, Debug, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct UndercityConfig {
    #[serde(default)]
    pub repo: RepoConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub merge_queue: MergeQueueConfig,
    #[serde(default)]
    pub health_monitor: HealthMonitorConfig,
}

/// Repository-level settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    /// The trunk branch name.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Directory (repo-relative) holding all orchestrator state.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            branch: default_branch(),
            state_dir: default_state_dir(),
        }
    }
}

fn default_branch() -> String {
    "main".to_owned()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".undercity")
}

/// Orchestrator driver loop settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Maximum number of Workers running concurrently.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

const fn default_max_concurrent() -> usize {
    3
}

/// Router tier-assignment settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    /// Extra keywords (beyond the built-in table) that force `strong` tier.
    #[serde(default)]
    pub extra_escalation_keywords: Vec<String>,
    /// Extra keywords that force `local-tools` tier.
    #[serde(default)]
    pub extra_local_tool_keywords: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            extra_escalation_keywords: Vec::new(),
            extra_local_tool_keywords: Vec::new(),
        }
    }
}

/// Worker agent-loop and retry-budget settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Per-file write ceiling before the pre-tool-use hook rejects writes.
    #[serde(default = "default_write_ceiling")]
    pub write_ceiling_per_file: u32,
    /// Checkpoint cadence, in milliseconds.
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,
    /// Attempt budget per tier: cheap, mid, strong (in that order).
    #[serde(default = "default_tier_budgets")]
    pub tier_attempt_budgets: [u32; 3],
    /// Global attempt cap across all tiers for a single task.
    #[serde(default = "default_global_attempt_cap")]
    pub global_attempt_cap: u32,
    /// Consecutive no-write attempts before a task is flagged `vague_task`.
    #[serde(default = "default_no_write_limit")]
    pub no_write_limit: u32,
    /// How long a baseline verification result is trusted, in seconds.
    #[serde(default = "default_baseline_cache_secs")]
    pub baseline_cache_secs: u64,
    /// Child-process timeouts, in seconds: typecheck, test, format/build.
    #[serde(default = "default_typecheck_timeout_secs")]
    pub typecheck_timeout_secs: u64,
    #[serde(default = "default_test_timeout_secs")]
    pub test_timeout_secs: u64,
    #[serde(default = "default_format_timeout_secs")]
    pub format_timeout_secs: u64,
    /// Review Pipeline: how many of [`crate::review::REVIEW_TIER_SCHEDULE`]'s
    /// tiers to run before giving up and raising tickets.
    #[serde(default = "default_review_max_tiers")]
    pub review_max_tiers: usize,
    /// Review Pipeline: passes per tier before escalating (tripled at the
    /// top tier, see `review::passes_for_tier`).
    #[serde(default = "default_review_passes")]
    pub review_default_passes: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            write_ceiling_per_file: default_write_ceiling(),
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
            tier_attempt_budgets: default_tier_budgets(),
            global_attempt_cap: default_global_attempt_cap(),
            no_write_limit: default_no_write_limit(),
            baseline_cache_secs: default_baseline_cache_secs(),
            typecheck_timeout_secs: default_typecheck_timeout_secs(),
            test_timeout_secs: default_test_timeout_secs(),
            format_timeout_secs: default_format_timeout_secs(),
            review_max_tiers: default_review_max_tiers(),
            review_default_passes: default_review_passes(),
        }
    }
}

const fn default_write_ceiling() -> u32 {
    5
}
const fn default_checkpoint_interval_ms() -> u64 {
    30_000
}
const fn default_tier_budgets() -> [u32; 3] {
    [2, 3, 2]
}
const fn default_global_attempt_cap() -> u32 {
    7
}
const fn default_no_write_limit() -> u32 {
    3
}
const fn default_baseline_cache_secs() -> u64 {
    24 * 60 * 60
}
const fn default_typecheck_timeout_secs() -> u64 {
    60
}
const fn default_test_timeout_secs() -> u64 {
    120
}
const fn default_format_timeout_secs() -> u64 {
    30
}
const fn default_review_max_tiers() -> usize {
    3
}
const fn default_review_passes() -> u32 {
    2
}

/// Merge Queue retry/backoff settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeQueueConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for MergeQueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

const fn default_max_retries() -> u32 {
    3
}
const fn default_base_delay_ms() -> u64 {
    1_000
}
const fn default_max_delay_ms() -> u64 {
    30_000
}

/// Health Monitor sweep settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthMonitorConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_stuck_threshold_ms")]
    pub stuck_threshold_ms: u64,
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            stuck_threshold_ms: default_stuck_threshold_ms(),
            max_recovery_attempts: default_max_recovery_attempts(),
        }
    }
}

const fn default_sweep_interval_secs() -> u64 {
    60
}
const fn default_stuck_threshold_ms() -> u64 {
    300_000
}
const fn default_max_recovery_attempts() -> u32 {
    2
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// A configuration file existed but failed to parse.
#[derive(Debug)]
pub struct ConfigError {
    pub path: Option<PathBuf>,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(p) => write!(f, "config error in '{}': {}", p.display(), self.message),
            None => write!(f, "config error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl UndercityConfig {
    /// Load from `path`. A missing file yields all defaults, never an
    /// error; a present-but-unparseable file is an error (unlike the
    /// per-document State Store, which fails soft).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw).map_err(|e| ConfigError {
                path: Some(path.to_path_buf()),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError {
                path: Some(path.to_path_buf()),
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = UndercityConfig::load(Path::new("/nonexistent/undercity/config.toml")).unwrap();
        assert_eq!(cfg.repo.branch, "main");
        assert_eq!(cfg.orchestrator.max_concurrent, 3);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[worker]\nwrite_ceiling_per_file = 9\n").unwrap();
        let cfg = UndercityConfig::load(tmp.path()).unwrap();
        assert_eq!(cfg.worker.write_ceiling_per_file, 9);
        assert_eq!(cfg.worker.global_attempt_cap, 7);
        assert_eq!(cfg.merge_queue.max_retries, 3);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[repo]\nbogus = true\n").unwrap();
        assert!(UndercityConfig::load(tmp.path()).is_err());
    }

    #[test]
    fn tier_budgets_match_spec_defaults() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.tier_attempt_budgets, [2, 3, 2]);
    }
}
