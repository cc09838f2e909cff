//! The two agent roles.
//!
//! Each role is polymorphic over one capability: build a prompt for the
//! current context, and classify the records the process returned.

use crate::core::reassembler::Record;
use crate::core::session::Iteration;
use crate::core::types::{HandoffDecision, ParsedOutput, Role, Task, ValidationVerdict};
use crate::io::prompt::{Purpose, PromptContext};

pub mod executor;
pub mod planner;

/// Classifier output for one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub output: ParsedOutput,
    pub decision: HandoffDecision,
    /// Set only for validation iterations.
    pub verdict: Option<ValidationVerdict>,
}

pub trait RoleAgent {
    fn role(&self) -> Role;

    fn prompt(&self, task: &Task, context: &PromptContext, prior: &[Iteration]) -> String;

    fn classify(&self, records: &[Record], task: &Task, purpose: Purpose) -> Classification;
}
