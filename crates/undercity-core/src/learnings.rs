//! Learnings — spec.md §3/§4: durable lessons a Worker or reviewer records,
//! later surfaced to future attempts on related tasks.
//!
//! Grounded on `bobisme-maw`'s typed-id + confidence-score conventions
//! (`crates/maw-core/src/model/types.rs`); persisted via
//! [`crate::knowledge::KnowledgeStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::LearningId;

/// What kind of lesson a [`Learning`] records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningCategory {
    ErrorPattern,
    HumanGuidance,
    PermanentFailure,
}

/// A recorded lesson, with a confidence score that grows with reuse and
/// decays with age.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Learning {
    pub id: LearningId,
    pub category: LearningCategory,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub use_count: u32,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

const USE_BONUS: f64 = 0.05;
const MAX_CONFIDENCE: f64 = 0.95;
const AGE_DECAY_PER_DAY: f64 = 0.01;
const MIN_CONFIDENCE: f64 = 0.05;

impl Learning {
    pub fn new(category: LearningCategory, summary: impl Into<String>) -> Self {
        Self {
            id: LearningId::generate("learning"),
            category,
            summary: summary.into(),
            created_at: Utc::now(),
            last_used_at: None,
            use_count: 0,
            confidence: default_confidence(),
        }
    }

    /// Recompute confidence as of `now`: each past use nudges confidence up
    /// (diminishing, capped), age since last use nudges it back down,
    /// clamped to `[MIN_CONFIDENCE, MAX_CONFIDENCE]`.
    pub fn confidence_at(&self, now: DateTime<Utc>) -> f64 {
        let used_bonus = (self.use_count as f64 * USE_BONUS).min(MAX_CONFIDENCE - default_confidence());
        let reference = self.last_used_at.unwrap_or(self.created_at);
        let days_idle = (now - reference).num_milliseconds().max(0) as f64 / 86_400_000.0;
        let decay = days_idle * AGE_DECAY_PER_DAY;
        (default_confidence() + used_bonus - decay).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
    }

    /// Record a use: bump `use_count`, set `last_used_at`, and refresh the
    /// stored `confidence` field to match `confidence_at(now)`.
    pub fn mark_used(&mut self, now: DateTime<Utc>) {
        self.use_count += 1;
        self.last_used_at = Some(now);
        self.confidence = self.confidence_at(now);
    }
}
