//! Shared deterministic types for the coordination core.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One of the two cooperating agent personas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Decomposes the task and validates finished work.
    Planner,
    /// Performs one work item at a time.
    Executor,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Planner => "planner",
            Role::Executor => "executor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The natural-language goal of a run plus the directory it operates in.
///
/// Created once per run and never mutated afterwards; fields are only exposed
/// through accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    goal: String,
    workdir: PathBuf,
}

impl Task {
    pub fn new(goal: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            goal: goal.into(),
            workdir: workdir.into(),
        }
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }
}

/// A single decomposed unit of work produced by the Planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub description: String,
}

impl WorkItem {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }

    /// Synthesize a single work item covering the whole task.
    ///
    /// Returns `None` when the goal is blank, since there is nothing to hand off.
    pub fn from_task(task: &Task) -> Option<Self> {
        let goal = task.goal().trim();
        (!goal.is_empty()).then(|| Self::new(goal))
    }
}

/// Why the classifier did (or did not) request a handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffReason {
    /// No handoff; keep working in the current role.
    None,
    /// The Planner used explicit delegation phrasing.
    ExplicitDelegation,
    /// The Planner said its analysis is complete without delegating explicitly.
    AnalysisCompleteImplicit,
    /// The Coordinator forced a handoff after too many planning iterations.
    ForcedHandoff,
    /// The Executor reported errors and no successes.
    ExecutorNeedsHelp,
    /// The Executor reported the work item as done.
    TaskCompleted,
    /// The Planner rejected the Executor's work and sent it back.
    ValidationRejected,
}

impl HandoffReason {
    pub fn as_str(self) -> &'static str {
        match self {
            HandoffReason::None => "none",
            HandoffReason::ExplicitDelegation => "explicit_delegation",
            HandoffReason::AnalysisCompleteImplicit => "analysis_complete_implicit",
            HandoffReason::ForcedHandoff => "forced_handoff",
            HandoffReason::ExecutorNeedsHelp => "executor_needs_help",
            HandoffReason::TaskCompleted => "task_completed",
            HandoffReason::ValidationRejected => "validation_rejected",
        }
    }
}

impl fmt::Display for HandoffReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The classifier's verdict for one iteration. Computed fresh every time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffDecision {
    pub needs_handoff: bool,
    pub reason: HandoffReason,
    pub work_items: Vec<WorkItem>,
    pub analysis_complete: bool,
    /// Set when explicit and implicit signals conflicted; explicit won.
    pub ambiguity: Option<String>,
}

impl HandoffDecision {
    /// Stay in the current role.
    pub fn none() -> Self {
        Self {
            needs_handoff: false,
            reason: HandoffReason::None,
            work_items: Vec::new(),
            analysis_complete: false,
            ambiguity: None,
        }
    }

    pub fn handoff(reason: HandoffReason) -> Self {
        Self {
            needs_handoff: true,
            reason,
            ..Self::none()
        }
    }
}

/// Normalized result of classifying one iteration's output.
///
/// List fields hold unique entries in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedOutput {
    pub result: String,
    pub continuation_token: Option<String>,
    pub cost_usd: Option<f64>,
    pub error: Option<String>,
    pub errors: Vec<String>,
    pub successes: Vec<String>,
    pub tools: Vec<String>,
    pub files: Vec<String>,
    pub commands: Vec<String>,
    /// Tool failures a later step recovered from. Not counted as errors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovered: Vec<String>,
}

impl ParsedOutput {
    /// First line of the result, bounded to `max_chars`, for history summaries.
    pub fn headline(&self, max_chars: usize) -> String {
        let line = self
            .result
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("");
        truncate_chars(line, max_chars)
    }
}

/// Append `value` to `list` unless it is blank or already present.
pub fn push_unique(list: &mut Vec<String>, value: &str) {
    let value = value.trim();
    if value.is_empty() || list.iter().any(|existing| existing == value) {
        return;
    }
    list.push(value.to_string());
}

/// Truncate to at most `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Planner verdict when acting as a quality gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "lowercase")]
pub enum ValidationVerdict {
    Approved,
    Rejected { feedback: String },
}

/// How an iteration's process call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    Failed { code: Option<i32> },
    TimedOut,
    Cancelled,
    Error { kind: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_unique_skips_blank_and_duplicates() {
        let mut list = Vec::new();
        push_unique(&mut list, "cargo test");
        push_unique(&mut list, "  cargo test ");
        push_unique(&mut list, "   ");
        push_unique(&mut list, "cargo build");
        assert_eq!(list, vec!["cargo test", "cargo build"]);
    }

    #[test]
    fn synthetic_work_item_requires_goal() {
        let task = Task::new("  Add a cache layer  ", "/tmp");
        assert_eq!(
            WorkItem::from_task(&task),
            Some(WorkItem::new("Add a cache layer"))
        );
        assert_eq!(WorkItem::from_task(&Task::new("   ", "/tmp")), None);
    }

    #[test]
    fn headline_uses_first_non_empty_line() {
        let output = ParsedOutput {
            result: "\n\n  Implemented the parser.\nMore detail".to_string(),
            ..ParsedOutput::default()
        };
        assert_eq!(output.headline(100), "Implemented the parser.");
        assert_eq!(output.headline(5), "Impl…");
    }

    #[test]
    fn handoff_reason_labels_are_snake_case() {
        let json = serde_json::to_string(&HandoffReason::AnalysisCompleteImplicit).expect("json");
        assert_eq!(json, "\"analysis_complete_implicit\"");
        assert_eq!(
            HandoffReason::ExecutorNeedsHelp.to_string(),
            "executor_needs_help"
        );
    }
}
