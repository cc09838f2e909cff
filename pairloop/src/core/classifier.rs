//! Deterministic, role-specific classification of one iteration's output.
//!
//! The classifier is a pure function of the records, the role and the task:
//! identical input always yields an identical [`ParsedOutput`] and
//! [`HandoffDecision`].

use crate::core::patterns::{PhraseCategory, matches};
use crate::core::reassembler::Record;
use crate::core::record::{Extraction, extract};
use crate::core::types::{
    HandoffDecision, HandoffReason, ParsedOutput, Role, Task, ValidationVerdict, WorkItem,
    truncate_chars,
};
use crate::core::work_items::extract_work_items;

const MAX_FEEDBACK_CHARS: usize = 2000;

/// Classify every record of one iteration for `role`.
pub fn classify(records: &[Record], role: Role, task: &Task) -> (ParsedOutput, HandoffDecision) {
    let Extraction { output, narrative } = extract(records);
    let decision = match role {
        Role::Planner => planner_decision(&narrative, task),
        Role::Executor => executor_decision(&output, &narrative),
    };
    (output, decision)
}

/// Classify a single complete record.
pub fn classify_record(
    record: &Record,
    role: Role,
    task: &Task,
) -> (ParsedOutput, HandoffDecision) {
    classify(std::slice::from_ref(record), role, task)
}

/// Read the Planner's quality-gate verdict on the Executor's work.
///
/// Rejection phrasing beats approval phrasing. Without either, completion
/// phrasing counts as approval and anything else is a rejection carrying the
/// response as feedback.
pub fn classify_verdict(records: &[Record]) -> (ParsedOutput, ValidationVerdict) {
    let Extraction { output, narrative } = extract(records);
    let verdict = if matches(PhraseCategory::Rejection, &narrative) {
        rejected(&output)
    } else if matches(PhraseCategory::Approval, &narrative)
        || matches(PhraseCategory::TaskComplete, &narrative)
    {
        ValidationVerdict::Approved
    } else {
        rejected(&output)
    };
    (output, verdict)
}

fn rejected(output: &ParsedOutput) -> ValidationVerdict {
    let feedback = output.result.trim();
    let feedback = if feedback.is_empty() {
        "validation produced no verdict".to_string()
    } else {
        truncate_chars(feedback, MAX_FEEDBACK_CHARS)
    };
    ValidationVerdict::Rejected { feedback }
}

fn planner_decision(narrative: &str, task: &Task) -> HandoffDecision {
    let explicit = matches(PhraseCategory::Delegation, narrative);
    let implicit = matches(PhraseCategory::AnalysisComplete, narrative);
    let work_items = extract_work_items(narrative);

    if explicit {
        let mut decision = HandoffDecision::handoff(HandoffReason::ExplicitDelegation);
        decision.work_items = work_items;
        decision.analysis_complete = implicit;
        if implicit {
            decision.ambiguity = Some(
                "explicit delegation and analysis-complete phrasing both present; \
                 explicit delegation takes precedence"
                    .to_string(),
            );
        }
        return decision;
    }

    if implicit {
        let mut decision = HandoffDecision::handoff(HandoffReason::AnalysisCompleteImplicit);
        decision.analysis_complete = true;
        decision.work_items = if work_items.is_empty() {
            WorkItem::from_task(task).into_iter().collect()
        } else {
            work_items
        };
        return decision;
    }

    // Items are kept so a later forced handoff can reuse them.
    HandoffDecision {
        work_items,
        ..HandoffDecision::none()
    }
}

fn executor_decision(output: &ParsedOutput, narrative: &str) -> HandoffDecision {
    if !output.errors.is_empty() && output.successes.is_empty() {
        return HandoffDecision::handoff(HandoffReason::ExecutorNeedsHelp);
    }
    if matches(PhraseCategory::TaskComplete, narrative) {
        return HandoffDecision::handoff(HandoffReason::TaskCompleted);
    }
    HandoffDecision::none()
}
