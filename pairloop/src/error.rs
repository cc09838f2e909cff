//! Error taxonomy of the coordination layer.

use std::time::Duration;

use thiserror::Error;

use crate::core::machine::InvalidTransition;
use crate::core::reassembler::MalformedOutput;
use crate::core::session::SessionError;
use crate::io::executor::ProcessError;

#[derive(Debug, Clone, Error)]
pub enum CoordinationError {
    #[error("process timed out after {}s", .timeout.as_secs())]
    ProcessTimeout { timeout: Duration },
    #[error("authentication required: {message}")]
    AuthenticationRequired { message: String },
    #[error("malformed output: stream ended inside an unterminated record ({} bytes)", .remainder.len())]
    MalformedOutput { remainder: String },
    /// Soft: recorded for observability, never returned as the Session error.
    #[error("ambiguous handoff: {detail}")]
    HandoffAmbiguity { detail: String },
    #[error("escalation limit exceeded after {failures} consecutive failures")]
    EscalationLimitExceeded { failures: u32 },
    #[error("planning stalled after {iterations} iterations without producing a work item")]
    CoordinationDeadlock { iterations: u32 },
    #[error("process crashed: {message}")]
    ProcessCrashed { message: String },
    #[error("malformed invocation: {message}")]
    MalformedInvocation { message: String },
    #[error("session cancelled")]
    Cancelled,
    #[error("session budget exhausted: {detail}")]
    BudgetExhausted { detail: String },
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("ledger: {message}")]
    Ledger { message: String },
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

impl CoordinationError {
    /// Ends the Session immediately without consuming retry budget.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoordinationError::AuthenticationRequired { .. }
                | CoordinationError::CoordinationDeadlock { .. }
                | CoordinationError::Cancelled
                | CoordinationError::Session(_)
                | CoordinationError::Ledger { .. }
                | CoordinationError::InvalidTransition(_)
        )
    }

    /// Counts as an ordinary iteration failure toward escalation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoordinationError::ProcessTimeout { .. }
                | CoordinationError::ProcessCrashed { .. }
                | CoordinationError::MalformedOutput { .. }
                | CoordinationError::MalformedInvocation { .. }
        )
    }

    /// Short machine-readable label, stored in iteration exit statuses.
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinationError::ProcessTimeout { .. } => "process_timeout",
            CoordinationError::AuthenticationRequired { .. } => "authentication_required",
            CoordinationError::MalformedOutput { .. } => "malformed_output",
            CoordinationError::HandoffAmbiguity { .. } => "handoff_ambiguity",
            CoordinationError::EscalationLimitExceeded { .. } => "escalation_limit_exceeded",
            CoordinationError::CoordinationDeadlock { .. } => "coordination_deadlock",
            CoordinationError::ProcessCrashed { .. } => "process_crashed",
            CoordinationError::MalformedInvocation { .. } => "malformed_invocation",
            CoordinationError::Cancelled => "cancelled",
            CoordinationError::BudgetExhausted { .. } => "budget_exhausted",
            CoordinationError::Session(_) => "session",
            CoordinationError::Ledger { .. } => "ledger",
            CoordinationError::InvalidTransition(_) => "invalid_transition",
        }
    }

    pub fn ledger(err: &anyhow::Error) -> Self {
        CoordinationError::Ledger {
            message: format!("{err:#}"),
        }
    }
}

impl From<ProcessError> for CoordinationError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Timeout { timeout } => CoordinationError::ProcessTimeout { timeout },
            ProcessError::AuthenticationRequired { message } => {
                CoordinationError::AuthenticationRequired { message }
            }
            ProcessError::Crashed { message } => CoordinationError::ProcessCrashed { message },
            ProcessError::MalformedInvocation { message } => {
                CoordinationError::MalformedInvocation { message }
            }
            ProcessError::Cancelled => CoordinationError::Cancelled,
        }
    }
}

impl From<MalformedOutput> for CoordinationError {
    fn from(err: MalformedOutput) -> Self {
        CoordinationError::MalformedOutput {
            remainder: err.remainder,
        }
    }
}
