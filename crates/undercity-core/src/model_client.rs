//! The opaque model-client interface — spec.md §6 "process-to-model
//! interface" — and the REDESIGN FLAGS (§9) sum types built on top of it.
//!
//! The language-model client itself is out of scope (spec.md §1); this
//! module defines only the message contract the Worker consumes, expressed
//! as a cold iterator per REDESIGN FLAGS rather than a callback, plus the
//! `AgentTerminalMarker` and `StopDecision` sum types that replace string
//! sentinels and exception-based control flow.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Tier-independent token accounting for one model call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A tool the agent loop exposes to the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    Read,
    Write,
    Edit,
    Bash,
    Search,
}

/// One tool invocation the model requested.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: ToolName,
    pub input: serde_json::Value,
}

/// The result of executing a `ToolUse`, fed back to the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub output: String,
    pub is_error: bool,
}

/// Whether the model's final turn reported success.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSubtype {
    Success,
    MaxTurns,
    ExecutionError,
}

/// One message in the model's streamed response, per spec.md §6's contract:
/// `{content_block_start, assistant, user, result}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelMessage {
    ContentBlockStart,
    Assistant { text: String, tool_uses: Vec<ToolUse> },
    User { tool_results: Vec<ToolResult> },
    Result {
        subtype: ResultSubtype,
        conversation_id: String,
        turns: u32,
        usage: TokenUsage,
    },
}

/// A request to the model client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelRequest {
    pub prompt: String,
    pub max_turns: u32,
    pub session_id: Option<String>,
}

/// The opaque, out-of-scope language-model client. Implementations stream
/// a cold iterator of [`ModelMessage`]; the Worker drives it with explicit
/// backpressure (it reads one message at a time and can stop early).
pub trait ModelClient: Send + Sync {
    fn query(&self, request: ModelRequest) -> Box<dyn Iterator<Item = ModelMessage> + Send>;
}

/// Sentinels the agent may emit in assistant text, parsed once at the
/// message-stream boundary into a sum type per REDESIGN FLAGS — callers
/// never re-match the raw strings themselves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentTerminalMarker {
    AlreadyComplete { reason: String },
    InvalidTarget { reason: String },
    NeedsDecomposition { reason: String },
    Normal,
}

impl AgentTerminalMarker {
    /// Parse the sentinel out of one chunk of assistant text, if present.
    pub fn parse(text: &str) -> Self {
        const MARKERS: &[(&str, fn(String) -> AgentTerminalMarker)] = &[
            ("TASK_ALREADY_COMPLETE:", |r| AgentTerminalMarker::AlreadyComplete { reason: r }),
            ("INVALID_TARGET:", |r| AgentTerminalMarker::InvalidTarget { reason: r }),
            ("NEEDS_DECOMPOSITION:", |r| AgentTerminalMarker::NeedsDecomposition { reason: r }),
        ];
        for (prefix, make) in MARKERS {
            if let Some(idx) = text.find(prefix) {
                let reason = text[idx + prefix.len()..].trim().to_owned();
                return make(reason);
            }
        }
        Self::Normal
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Normal)
    }
}

/// Why an error kind occurred, attached to each `AttemptRecord` — spec.md §7.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    BaselineFail,
    AgentError,
    Typecheck,
    Lint,
    Test,
    Build,
    NoChanges,
    VagueTask,
    MergeConflict,
    MergeTestFail,
    Stuck,
    PermanentFail,
    UnresolvedReview,
}

/// The pre-tool-use / stop-hook decision, replacing exception-based control
/// flow per REDESIGN FLAGS: returned synchronously, inspected by the agent
/// loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopDecision {
    Continue,
    Reject { reason: String },
    Fatal { kind: ErrorCategory, reason: String },
}

/// A write-ceiling-enforcing, per-file write counter used by the Worker's
/// pre-tool-use hook (spec.md §4.6.1 step 6).
#[derive(Default)]
pub struct WriteCeiling {
    ceiling: u32,
    counts: std::collections::HashMap<PathBuf, u32>,
}

impl WriteCeiling {
    pub fn new(ceiling: u32) -> Self {
        Self {
            ceiling,
            counts: std::collections::HashMap::new(),
        }
    }

    /// Record an attempted write to `path` and decide whether it may
    /// proceed.
    pub fn check(&mut self, path: &std::path::Path) -> StopDecision {
        let count = self.counts.entry(path.to_path_buf()).or_insert(0);
        *count += 1;
        if *count > self.ceiling {
            StopDecision::Reject {
                reason: format!(
                    "write ceiling ({}) exceeded for {}",
                    self.ceiling,
                    path.display()
                ),
            }
        } else {
            StopDecision::Continue
        }
    }
}
