//! Router — spec.md §4.5: pure `objective -> tier` classification.
//!
//! Grounded on `bobisme-maw`'s preference for small static lookup tables
//! driving deterministic dispatch (`src/jj_intro.rs`'s static text tables);
//! the Router itself has no direct teacher analogue since `maw` has no
//! model-tiering concept, so this module is newly written in that idiom.

use crate::config::RouterConfig;

/// Execution tier, ordered cheapest to most expensive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    LocalTools,
    Cheap,
    Mid,
    Strong,
}

/// Deterministic assessment of how hard an objective looks, used only as
/// the step-4 fallback when no pattern matches directly. Step 4 itself is
/// `route_task`'s business; the oracle below is a placeholder for the
/// externally-supplied `classifyTask` the spec names as out of scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComplexityLevel {
    Trivial,
    Simple,
    Standard,
    Complex,
    Critical,
}

/// The out-of-scope `classifyTask` collaborator: given an objective,
/// estimate its complexity. The core only depends on this trait, never on
/// a concrete implementation.
pub trait ComplexityOracle {
    fn assess(&self, objective: &str) -> ComplexityLevel;
}

/// A conservative built-in oracle used when no external one is wired up:
/// classifies by objective length and keyword density. Real deployments
/// are expected to supply their own (e.g. backed by `searchSimilar`).
pub struct HeuristicComplexityOracle;

impl ComplexityOracle for HeuristicComplexityOracle {
    fn assess(&self, objective: &str) -> ComplexityLevel {
        let word_count = objective.split_whitespace().count();
        match word_count {
            0..=4 => ComplexityLevel::Trivial,
            5..=10 => ComplexityLevel::Simple,
            11..=25 => ComplexityLevel::Standard,
            26..=50 => ComplexityLevel::Complex,
            _ => ComplexityLevel::Critical,
        }
    }
}

/// The Router's decision for one objective.
#[derive(Clone, Debug, PartialEq)]
pub struct Routing {
    pub tier: Tier,
    pub reason: &'static str,
    pub confidence: f64,
    pub estimated_tokens: u64,
    pub can_parallelize: bool,
    pub suggested_batch_size: Option<usize>,
}

const LOCAL_TOOL_PATTERNS: &[&str] = &[
    "format", "lint", "typecheck", "type check", "run tests", "build", "organize imports",
    "import organize",
];

const TRIVIAL_PATTERNS: &[&str] = &[
    "typo", "comment tweak", "small rename", "version bump", "bump version",
    "remove unused", "unused import", "unused symbol",
];

const ESCALATION_PATTERNS: &[&str] = &[
    "security", "auth", "encrypt", "credential", "payment", "migrate database",
    "database migration", "breaking change", "redesign", "refactor architecture",
];

fn matches_any(objective_lower: &str, patterns: &[&str], extra: &[String]) -> bool {
    patterns.iter().any(|p| objective_lower.contains(p))
        || extra.iter().any(|p| objective_lower.contains(&p.to_ascii_lowercase()))
}

/// Route `objective` to an execution tier, in the order spec.md §4.5
/// prescribes: local-tool pattern, trivial pattern, escalation pattern,
/// then complexity-assessment fallback.
pub fn route_task(objective: &str, cfg: &RouterConfig, oracle: &dyn ComplexityOracle) -> Routing {
    let lower = objective.to_ascii_lowercase();

    if matches_any(&lower, LOCAL_TOOL_PATTERNS, &cfg.extra_local_tool_keywords) {
        return Routing {
            tier: Tier::LocalTools,
            reason: "local-tool pattern",
            confidence: 0.95,
            estimated_tokens: 0,
            can_parallelize: true,
            suggested_batch_size: Some(10),
        };
    }

    if matches_any(&lower, TRIVIAL_PATTERNS, &[]) {
        return Routing {
            tier: Tier::Cheap,
            reason: "trivial",
            confidence: 0.85,
            estimated_tokens: 2_000,
            can_parallelize: true,
            suggested_batch_size: Some(5),
        };
    }

    if matches_any(&lower, ESCALATION_PATTERNS, &cfg.extra_escalation_keywords) {
        return Routing {
            tier: Tier::Strong,
            reason: "escalation pattern",
            confidence: 0.9,
            estimated_tokens: 40_000,
            can_parallelize: false,
            suggested_batch_size: None,
        };
    }

    match oracle.assess(objective) {
        ComplexityLevel::Trivial => Routing {
            tier: Tier::Cheap,
            reason: "complexity: trivial",
            confidence: 0.7,
            estimated_tokens: 3_000,
            can_parallelize: true,
            suggested_batch_size: Some(5),
        },
        ComplexityLevel::Simple => Routing {
            tier: Tier::Cheap,
            reason: "complexity: simple",
            confidence: 0.7,
            estimated_tokens: 6_000,
            can_parallelize: true,
            suggested_batch_size: Some(3),
        },
        ComplexityLevel::Standard => Routing {
            tier: Tier::Mid,
            reason: "complexity: standard",
            confidence: 0.6,
            estimated_tokens: 15_000,
            can_parallelize: true,
            suggested_batch_size: Some(2),
        },
        ComplexityLevel::Complex => Routing {
            tier: Tier::Mid,
            reason: "complexity: complex",
            confidence: 0.55,
            estimated_tokens: 30_000,
            can_parallelize: false,
            suggested_batch_size: None,
        },
        ComplexityLevel::Critical => Routing {
            tier: Tier::Strong,
            reason: "complexity: critical",
            confidence: 0.5,
            estimated_tokens: 60_000,
            can_parallelize: false,
            suggested_batch_size: None,
        },
    }
}
