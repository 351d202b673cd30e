//! Health Monitor — spec.md §4.9.
//!
//! Periodically sweeps `in_progress` tasks for staleness and writes a nudge
//! file the stuck Worker's agent loop can notice at its next suspension
//! point. The core never kills a process it did not spawn.
//!
//! Grounded on `bobisme-maw`'s `src/epoch_gc.rs` (periodic background sweep
//! driven by its own thread and a sleep interval) and `src/doctor.rs` (the
//! severe-log-line diagnostic style used once recovery attempts run out).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::board::{Task, TaskStatus};
use crate::config::HealthMonitorConfig;
use crate::ids::TaskId;
use crate::worker::checkpoint::Checkpoint;

/// One written `.undercity-nudge` file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Nudge {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub attempt: u32,
    pub message: String,
}

/// Whether a task looks stuck, and why.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StuckReason {
    CheckpointStale,
    NoCheckpointSinceStart,
}

/// Determine whether `task` (assumed `in_progress`) is stuck, given its
/// workspace's checkpoint (if any) and the current time.
pub fn assess_stuck(
    task: &Task,
    checkpoint: Option<&Checkpoint>,
    now: DateTime<Utc>,
    stuck_threshold: Duration,
) -> Option<StuckReason> {
    let started_at = task.started_at?;
    match checkpoint {
        Some(cp) => {
            let age = (now - cp.updated_at).num_milliseconds().max(0) as u64;
            if Duration::from_millis(age) >= stuck_threshold {
                Some(StuckReason::CheckpointStale)
            } else {
                None
            }
        }
        None => {
            let age = (now - started_at).num_milliseconds().max(0) as u64;
            if Duration::from_millis(age) >= stuck_threshold {
                Some(StuckReason::NoCheckpointSinceStart)
            } else {
                None
            }
        }
    }
}

/// Per-task recovery-attempt bookkeeping the monitor carries across sweeps.
#[derive(Default)]
struct RecoveryCounters {
    attempts: HashMap<TaskId, u32>,
}

/// Runs the periodic sweep. Owns no task state directly — each sweep calls
/// back into injected closures so it can be unit-tested without a real
/// filesystem-backed Task Board.
pub struct HealthMonitor {
    cfg: HealthMonitorConfig,
    shutdown: Arc<AtomicBool>,
    counters: RecoveryCounters,
}

impl HealthMonitor {
    pub fn new(cfg: HealthMonitorConfig) -> Self {
        Self {
            cfg,
            shutdown: Arc::new(AtomicBool::new(false)),
            counters: RecoveryCounters::default(),
        }
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// One sweep: for every stuck in-progress task, write a nudge file via
    /// `write_nudge` and bump its recovery counter; once a task exceeds
    /// `max_recovery_attempts`, log a severe line via `on_exhausted` and
    /// reset the counter rather than nudging forever.
    pub fn sweep(
        &mut self,
        in_progress: &[Task],
        checkpoints: impl Fn(&TaskId) -> Option<Checkpoint>,
        mut write_nudge: impl FnMut(&TaskId, &Nudge),
        mut on_exhausted: impl FnMut(&TaskId),
    ) {
        let now = Utc::now();
        let threshold = Duration::from_millis(self.cfg.stuck_threshold_ms);

        for task in in_progress {
            if task.status != TaskStatus::InProgress {
                continue;
            }
            let checkpoint = checkpoints(&task.id);
            let Some(reason) = assess_stuck(task, checkpoint.as_ref(), now, threshold) else {
                continue;
            };

            let attempt = self.counters.attempts.entry(task.id.clone()).or_insert(0);
            *attempt += 1;

            if *attempt > self.cfg.max_recovery_attempts {
                on_exhausted(&task.id);
                self.counters.attempts.insert(task.id.clone(), 0);
                continue;
            }

            let nudge = Nudge {
                timestamp: now,
                reason: format!("{reason:?}"),
                attempt: *attempt,
                message: "worker appears stuck; checkpoint is stale".to_owned(),
            };
            write_nudge(&task.id, &nudge);
        }
    }

    /// Run the sweep loop on its own thread until `shutdown_flag()` is set.
    pub fn spawn_loop(
        mut self,
        poll: impl Fn() -> Vec<Task> + Send + 'static,
        checkpoints: impl Fn(&TaskId) -> Option<Checkpoint> + Send + 'static,
        write_nudge: impl Fn(&TaskId, &Nudge) + Send + 'static,
        on_exhausted: impl Fn(&TaskId) + Send + 'static,
    ) -> std::thread::JoinHandle<()> {
        let interval = Duration::from_secs(self.cfg.sweep_interval_secs);
        let shutdown = self.shutdown.clone();
        std::thread::spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                let tasks = poll();
                self.sweep(&tasks, &checkpoints, |id, n| write_nudge(id, n), |id| on_exhausted(id));
                std::thread::sleep(interval);
            }
        })
    }
}
