//! Verification: running typecheck/lint/test/format as child processes with
//! per-check timeouts, typecheck/lint/test run in parallel.
//!
//! Grounded on `bobisme-maw`'s `src/exec.rs` (subprocess spawning with
//! captured stdout/stderr and a timeout watcher) and `src/merge/validate.rs`
//! (the staged-check shape this module generalizes from "validate a merge"
//! to "validate a worker's changes").

use std::fmt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// One named check to run (`"typecheck"`, `"lint"`, `"test"`, `"format"`).
#[derive(Clone, Debug)]
pub struct Check {
    pub name: &'static str,
    pub command: &'static str,
    pub args: &'static [&'static str],
    pub timeout: Duration,
}

/// The result of running one [`Check`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckOutcome {
    pub name: &'static str,
    pub passed: bool,
    pub timed_out: bool,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

#[derive(Debug)]
pub enum ExecError {
    Spawn(std::io::Error),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(e) => write!(f, "failed to spawn check: {e}"),
        }
    }
}

impl std::error::Error for ExecError {}

fn last_lines(s: &str, n: usize) -> String {
    let lines: Vec<&str> = s.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Run one check in `workdir`, killing it if it exceeds `check.timeout`.
///
/// There is no portable blocking-with-timeout on `std::process::Child`, so
/// this polls `try_wait` on a short interval — the same shape as the
/// teacher's `src/exec.rs` timeout watcher, minus its now-unused
/// platform-specific signal handling (this repo only ever kills processes it
/// spawned itself, per spec.md §5).
pub fn run_check(workdir: &Path, check: &Check) -> Result<CheckOutcome, ExecError> {
    let mut child: Child = Command::new(check.command)
        .args(check.args)
        .current_dir(workdir)
        // spec.md §6: the project's own test suite skips integration tests
        // under worker-driven verification, keyed off this flag.
        .env("UNDERCITY_VERIFICATION", "true")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(ExecError::Spawn)?;

    let start = Instant::now();
    let poll_interval = Duration::from_millis(50);
    let timed_out = loop {
        match child.try_wait() {
            Ok(Some(_status)) => break false,
            Ok(None) => {
                if start.elapsed() >= check.timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    break true;
                }
                std::thread::sleep(poll_interval);
            }
            Err(_) => break false,
        }
    };

    let output = child.wait_with_output().map_err(ExecError::Spawn)?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    Ok(CheckOutcome {
        name: check.name,
        passed: !timed_out && output.status.success(),
        timed_out,
        stdout_tail: last_lines(&stdout, 20),
        stderr_tail: last_lines(&stderr, 20),
    })
}

/// Run `typecheck`, `lint`, `test` concurrently (one OS thread each, joined
/// before returning), then `format` sequentially afterward — matching
/// spec.md §4.6's "parallel/sequential structure". No async runtime: the
/// teacher has none anywhere in its dependency stack, so this uses
/// `std::thread::scope` rather than introducing `tokio` for three
/// short-lived child processes.
pub fn run_verification(workdir: &Path, checks: &VerificationChecks) -> Vec<CheckOutcome> {
    let mut outcomes = Vec::with_capacity(4);
    std::thread::scope(|scope| {
        let typecheck = scope.spawn(|| run_check(workdir, &checks.typecheck));
        let lint = scope.spawn(|| run_check(workdir, &checks.lint));
        let test = scope.spawn(|| run_check(workdir, &checks.test));

        for handle in [typecheck, lint, test] {
            match handle.join() {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(e)) => outcomes.push(failed_outcome("unknown", &e.to_string())),
                Err(_) => outcomes.push(failed_outcome("unknown", "check thread panicked")),
            }
        }
    });

    match run_check(workdir, &checks.format) {
        Ok(outcome) => outcomes.push(outcome),
        Err(e) => outcomes.push(failed_outcome(checks.format.name, &e.to_string())),
    }

    outcomes
}

/// Run only `typecheck` and `test`, in parallel — spec.md §4.8's narrower
/// post-merge check on trunk, distinct from the Worker's own four-check
/// [`run_verification`] (lint and format are a Worker-attempt concern, not
/// re-checked again by the Merge Queue).
pub fn run_merge_checks(workdir: &Path, checks: &VerificationChecks) -> Vec<CheckOutcome> {
    let mut outcomes = Vec::with_capacity(2);
    std::thread::scope(|scope| {
        let typecheck = scope.spawn(|| run_check(workdir, &checks.typecheck));
        let test = scope.spawn(|| run_check(workdir, &checks.test));

        for handle in [typecheck, test] {
            match handle.join() {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(e)) => outcomes.push(failed_outcome("unknown", &e.to_string())),
                Err(_) => outcomes.push(failed_outcome("unknown", "check thread panicked")),
            }
        }
    });
    outcomes
}

fn failed_outcome(name: &'static str, detail: &str) -> CheckOutcome {
    CheckOutcome {
        name,
        passed: false,
        timed_out: false,
        stdout_tail: String::new(),
        stderr_tail: detail.to_owned(),
    }
}

/// The four checks a Worker runs during verification, with their configured
/// timeouts (spec.md §5: typecheck 60s, tests 120s, format 30s; lint shares
/// the typecheck budget).
#[derive(Clone, Debug)]
pub struct VerificationChecks {
    pub typecheck: Check,
    pub lint: Check,
    pub test: Check,
    pub format: Check,
}

impl VerificationChecks {
    pub fn cargo_defaults(cfg: &crate::config::WorkerConfig) -> Self {
        Self {
            typecheck: Check {
                name: "typecheck",
                command: "cargo",
                args: &["check", "--quiet"],
                timeout: Duration::from_secs(cfg.typecheck_timeout_secs),
            },
            lint: Check {
                name: "lint",
                command: "cargo",
                args: &["clippy", "--quiet", "--", "-D", "warnings"],
                timeout: Duration::from_secs(cfg.typecheck_timeout_secs),
            },
            test: Check {
                name: "test",
                command: "cargo",
                args: &["test", "--quiet"],
                timeout: Duration::from_secs(cfg.test_timeout_secs),
            },
            format: Check {
                name: "format",
                command: "cargo",
                args: &["fmt", "--check"],
                timeout: Duration::from_secs(cfg.format_timeout_secs),
            },
        }
    }
}

pub fn all_passed(outcomes: &[CheckOutcome]) -> bool {
    outcomes.iter().all(|o| o.passed)
}

pub fn first_failure(outcomes: &[CheckOutcome]) -> Option<&CheckOutcome> {
    outcomes.iter().find(|o| !o.passed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn true_check() -> Check {
        Check {
            name: "ok",
            command: "true",
            args: &[],
            timeout: Duration::from_secs(5),
        }
    }

    fn false_check() -> Check {
        Check {
            name: "fail",
            command: "false",
            args: &[],
            timeout: Duration::from_secs(5),
        }
    }

    fn sleep_check() -> Check {
        Check {
            name: "slow",
            command: "sleep",
            args: &["2"],
            timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn successful_command_passes() {
        let tmp = tempfile::tempdir().unwrap();
        let outcome = run_check(tmp.path(), &true_check()).unwrap();
        assert!(outcome.passed);
        assert!(!outcome.timed_out);
    }

    #[test]
    fn failing_command_does_not_pass() {
        let tmp = tempfile::tempdir().unwrap();
        let outcome = run_check(tmp.path(), &false_check()).unwrap();
        assert!(!outcome.passed);
    }

    #[test]
    fn exceeding_timeout_is_reported_and_killed() {
        let tmp = tempfile::tempdir().unwrap();
        let outcome = run_check(tmp.path(), &sleep_check()).unwrap();
        assert!(outcome.timed_out);
        assert!(!outcome.passed);
    }

    #[test]
    fn all_passed_true_only_when_every_check_passes() {
        let outcomes = vec![
            CheckOutcome {
                name: "a",
                passed: true,
                timed_out: false,
                stdout_tail: String::new(),
                stderr_tail: String::new(),
            },
            CheckOutcome {
                name: "b",
                passed: false,
                timed_out: false,
                stdout_tail: String::new(),
                stderr_tail: String::new(),
            },
        ];
        assert!(!all_passed(&outcomes));
        assert_eq!(first_failure(&outcomes).unwrap().name, "b");
    }
}
