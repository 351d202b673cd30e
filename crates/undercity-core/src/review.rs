//! Review Pipeline — spec.md §4.7.
//!
//! Runs escalating review tiers over a Worker's committed changes before the
//! Merge Queue ever sees them, producing either a clean pass or a set of
//! follow-up tickets pushed back onto the Task Board.
//!
//! Grounded on `bobisme-maw`'s `src/merge/validate.rs` staged-check shape,
//! generalized from "validate a merge" to "review an agent's diff".

use crate::router::Tier;
use crate::worker::FollowUpTicket;

/// A focused review angle run at the top tier, advisory only — it raises
/// tickets but never blocks the underlying change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReviewLens {
    Security,
    ErrorHandling,
    Correctness,
    EdgeCases,
}

pub const REVIEW_LENSES: &[ReviewLens] = &[
    ReviewLens::Security,
    ReviewLens::ErrorHandling,
    ReviewLens::Correctness,
    ReviewLens::EdgeCases,
];

impl ReviewLens {
    pub fn prompt_fragment(self) -> &'static str {
        match self {
            Self::Security => "Review this diff strictly for security issues.",
            Self::ErrorHandling => "Review this diff strictly for error-handling gaps.",
            Self::Correctness => "Review this diff strictly for correctness bugs.",
            Self::EdgeCases => "Review this diff strictly for missed edge cases.",
        }
    }

    /// A rough priority boost applied to tickets this lens raises, echoing
    /// the Task Board's tag-boost convention (lower sorts first).
    pub fn keyword_priority(self) -> f64 {
        match self {
            Self::Security => 50.0,
            Self::ErrorHandling => 70.0,
            Self::Correctness => 60.0,
            Self::EdgeCases => 90.0,
        }
    }
}

/// One reviewer's verdict on a single pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReviewPass {
    pub tier: Tier,
    pub clean: bool,
    pub feedback: Vec<String>,
}

/// The escalating tier schedule spec.md §4.7 names, truncated to
/// `max_tiers`.
pub const REVIEW_TIER_SCHEDULE: &[Tier] = &[Tier::Mid, Tier::Mid, Tier::Strong];

/// How many passes to run at a given tier: 2 by default, 3x at the top tier
/// per the resolved Open Question in spec.md §9 / `DESIGN.md`.
pub fn passes_for_tier(tier: Tier, default_passes: u32) -> u32 {
    if tier == Tier::Strong {
        default_passes * 3
    } else {
        default_passes
    }
}

/// A pass is clean when the reviewer reported no outstanding feedback.
fn is_clean(feedback: &[String]) -> bool {
    feedback.is_empty()
}

/// Run the review pipeline over `diff_text`, invoking `run_pass` once per
/// configured pass at each tier in [`REVIEW_TIER_SCHEDULE`] (truncated to
/// `max_tiers`), short-circuiting on the first clean pass at any tier.
///
/// `run_pass` is injected so tests (and production code) can drive it with
/// any `ModelClient`-backed reviewer without this module depending on the
/// model client directly.
pub fn run_review<F>(
    max_tiers: usize,
    default_passes: u32,
    mut run_pass: F,
) -> Vec<ReviewPass>
where
    F: FnMut(Tier) -> Vec<String>,
{
    let mut passes = Vec::new();
    for &tier in REVIEW_TIER_SCHEDULE.iter().take(max_tiers) {
        let budget = passes_for_tier(tier, default_passes);
        for _ in 0..budget {
            let feedback = run_pass(tier);
            let clean = is_clean(&feedback);
            passes.push(ReviewPass {
                tier,
                clean,
                feedback,
            });
            if clean {
                return passes;
            }
        }
    }
    passes
}

/// Build one follow-up ticket per unresolved feedback item from the final
/// (non-clean) review pass, priority-ordered by the lens that raised it.
pub fn build_unresolved_tickets(lens: ReviewLens, feedback: &[String]) -> Vec<FollowUpTicket> {
    feedback
        .iter()
        .map(|item| FollowUpTicket {
            objective: item.clone(),
            priority: lens.keyword_priority(),
        })
        .collect()
}
