//! In-memory Session and Iteration records.
//!
//! A [`Session`] is append-only: iterations get contiguous sequence numbers
//! starting at 1, and nothing can be appended once the Session reaches a
//! terminal status.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::types::{
    ExitStatus, HandoffDecision, ParsedOutput, Role, Task, ValidationVerdict,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request/response cycle with the external process. Immutable once
/// appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
    pub seq: u32,
    pub role: Role,
    pub prompt: String,
    pub output: ParsedOutput,
    pub decision: HandoffDecision,
    /// Present for Planner iterations run as a quality gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<ValidationVerdict>,
    pub exit: ExitStatus,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    /// Error message when the process call or output parsing failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Latest continuation token issued to each role.
///
/// Each role keeps its own external conversation, so tokens never cross roles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationTokens {
    pub planner: Option<String>,
    pub executor: Option<String>,
}

impl ContinuationTokens {
    pub fn get(&self, role: Role) -> Option<&str> {
        match role {
            Role::Planner => self.planner.as_deref(),
            Role::Executor => self.executor.as_deref(),
        }
    }

    pub fn set(&mut self, role: Role, token: String) {
        match role {
            Role::Planner => self.planner = Some(token),
            Role::Executor => self.executor = Some(token),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session is already {status}; no further iterations may be appended")]
    AlreadyTerminal { status: SessionStatus },
    #[error("iteration sequence gap: expected {expected}, got {found}")]
    NonContiguous { expected: u32, found: u32 },
    #[error("session already finished as {current}, cannot finish as {requested}")]
    ConflictingStatus {
        current: SessionStatus,
        requested: SessionStatus,
    },
    #[error("{0} is not a terminal status")]
    NotTerminal(SessionStatus),
}

/// One run of the Coordinator against a [`Task`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: Uuid,
    task: Task,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    status: SessionStatus,
    active_role: Role,
    iterations: Vec<Iteration>,
    total_cost_usd: f64,
    total_duration_ms: u64,
    #[serde(default)]
    continuation: ContinuationTokens,
}

impl Session {
    /// Start a running Session with the Planner active.
    pub fn start(id: Uuid, task: Task, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            task,
            started_at,
            ended_at: None,
            status: SessionStatus::Running,
            active_role: Role::Planner,
            iterations: Vec::new(),
            total_cost_usd: 0.0,
            total_duration_ms: 0,
            continuation: ContinuationTokens::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn active_role(&self) -> Role {
        self.active_role
    }

    pub fn iterations(&self) -> &[Iteration] {
        &self.iterations
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.total_cost_usd
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.total_duration_ms
    }

    pub fn continuation(&self) -> &ContinuationTokens {
        &self.continuation
    }

    /// Sequence number the next appended iteration must carry.
    pub fn next_seq(&self) -> u32 {
        self.iterations.last().map_or(1, |last| last.seq + 1)
    }

    /// Switch the active role. Handoffs happen between iterations, so an
    /// iteration is always attributed to exactly one role.
    pub fn set_active_role(&mut self, role: Role) {
        self.active_role = role;
    }

    /// Append an iteration, enforcing contiguity and the terminal invariant.
    pub fn append(&mut self, iteration: Iteration) -> Result<(), SessionError> {
        if self.status.is_terminal() {
            return Err(SessionError::AlreadyTerminal {
                status: self.status,
            });
        }
        let expected = self.next_seq();
        if iteration.seq != expected {
            return Err(SessionError::NonContiguous {
                expected,
                found: iteration.seq,
            });
        }

        if let Some(cost) = iteration.output.cost_usd {
            self.total_cost_usd += cost;
        }
        self.total_duration_ms += iteration.duration_ms;
        if let Some(token) = &iteration.output.continuation_token {
            self.continuation.set(iteration.role, token.clone());
        }
        self.iterations.push(iteration);
        Ok(())
    }

    /// Move to a terminal status.
    ///
    /// Returns `Ok(false)` when the Session already has this status, and an
    /// error when it already finished with a different one.
    pub fn finish(
        &mut self,
        status: SessionStatus,
        ended_at: DateTime<Utc>,
    ) -> Result<bool, SessionError> {
        if !status.is_terminal() {
            return Err(SessionError::NotTerminal(status));
        }
        if self.status == status {
            return Ok(false);
        }
        if self.status.is_terminal() {
            return Err(SessionError::ConflictingStatus {
                current: self.status,
                requested: status,
            });
        }
        self.status = status;
        self.ended_at = Some(ended_at);
        Ok(true)
    }
}
