//! Priority scoring — spec.md §4.2, "lower = higher priority".
//!
//! Kept as its own pure function so it can be unit- and property-tested
//! independently of the board's persistence concerns, in the spirit of
//! `bobisme-maw`'s preference for small pure helpers behind its merge
//! ordering logic (`src/merge/plan.rs`).

use chrono::{DateTime, Utc};

use super::Task;

const TAG_BOOSTS: &[(&str, f64)] = &[
    ("critical", -50.0),
    ("bugfix", -30.0),
    ("security", -25.0),
    ("performance", -20.0),
    ("refactor", -10.0),
];

const MAX_AGE_PENALTY: f64 = 30.0;
const AGE_PENALTY_PER_DAY: f64 = 0.5;
const DEPENDENCY_PENALTY_PER_EDGE: f64 = 5.0;

/// Complexity level, read from a `complexity:<level>` tag (absent → medium).
///
/// spec.md's Open Question on complexity tagging is resolved here: rather
/// than a separate `Task.complexity` field not named in §3's data model,
/// complexity rides on the existing `tags` set as a `complexity:*` entry —
/// see `DESIGN.md`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Complexity {
    Trivial,
    Low,
    Medium,
    High,
    Critical,
}

impl Complexity {
    fn boost(self) -> f64 {
        match self {
            Self::Trivial => -20.0,
            Self::Low => -10.0,
            Self::Medium => 0.0,
            Self::High => 10.0,
            Self::Critical => 20.0,
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        let level = tag.strip_prefix("complexity:")?;
        match level.to_ascii_lowercase().as_str() {
            "trivial" => Some(Self::Trivial),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

fn complexity_of(task: &Task) -> Complexity {
    task.tags
        .iter()
        .find_map(|t| Complexity::from_tag(&t.to_ascii_lowercase()))
        .unwrap_or(Complexity::Medium)
}

fn tag_boost(task: &Task) -> f64 {
    let lower: Vec<String> = task.tags.iter().map(|t| t.to_ascii_lowercase()).collect();
    TAG_BOOSTS
        .iter()
        .filter(|(tag, _)| lower.iter().any(|t| t == tag))
        .map(|(_, boost)| boost)
        .sum()
}

fn age_penalty(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let days = (now - created_at).num_milliseconds() as f64 / 86_400_000.0;
    (days.max(0.0) * AGE_PENALTY_PER_DAY).min(MAX_AGE_PENALTY)
}

/// Compute the priority score for `task` as of `now`. Lower sorts first.
pub fn score(task: &Task, now: DateTime<Utc>) -> f64 {
    task.priority
        + tag_boost(task)
        + complexity_of(task).boost()
        + age_penalty(task.created_at, now)
        + DEPENDENCY_PENALTY_PER_EDGE * task.depends_on.len() as f64
}
