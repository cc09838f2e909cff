//! The role-coordination transition table.
//!
//! [`transition`] is a pure function from the current [`CoordinationState`],
//! an observed [`Event`] and the [`CoordinationPolicy`] to the next state and
//! the [`Action`] the Coordinator must take. Every retry, escalation and
//! fallback path goes through this table.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Planning,
    Executing,
    Validating,
    Escalating,
    Fallback,
    Terminated,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Executing => "executing",
            Phase::Validating => "validating",
            Phase::Escalating => "escalating",
            Phase::Fallback => "fallback",
            Phase::Terminated => "terminated",
        }
    }

    /// Role whose process runs in this phase, if any.
    pub fn role(self) -> Option<Role> {
        match self {
            Phase::Planning | Phase::Validating => Some(Role::Planner),
            Phase::Executing | Phase::Fallback => Some(Role::Executor),
            Phase::Escalating | Phase::Terminated => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Escalation and fallback knobs read by the Coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinationPolicy {
    /// Consecutive Executor failures (or Planner rejections) before escalating.
    pub max_consecutive_failures: u32,
    /// Planning iterations without a handoff before one is forced.
    pub max_planning_iterations: u32,
    pub allow_fallback: bool,
    /// Hard cap on iterations per Session.
    pub max_iterations: u32,
    pub max_session_duration: Duration,
    pub iteration_timeout: Duration,
}

impl Default for CoordinationPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            max_planning_iterations: 3,
            allow_fallback: true,
            max_iterations: 50,
            max_session_duration: Duration::from_secs(4 * 60 * 60),
            iteration_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// The Coordinator's phase plus its counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationState {
    pub phase: Phase,
    pub consecutive_failures: u32,
    pub escalations: u32,
    /// Retries of the current work item or validation.
    pub retries: u32,
    pub rejections: u32,
    pub planning_iterations: u32,
}

impl CoordinationState {
    pub fn new() -> Self {
        Self::starting_in(Phase::Planning)
    }

    /// Start somewhere other than planning, e.g. with a plan supplied up front.
    pub fn starting_in(phase: Phase) -> Self {
        Self {
            phase,
            consecutive_failures: 0,
            escalations: 0,
            retries: 0,
            rejections: 0,
            planning_iterations: 0,
        }
    }

    fn reset_after_handoff(&mut self) {
        self.consecutive_failures = 0;
        self.retries = 0;
        self.rejections = 0;
        self.planning_iterations = 0;
    }
}

impl Default for CoordinationState {
    fn default() -> Self {
        Self::new()
    }
}

/// What the Coordinator observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// Planner handed off with usable work items.
    PlannerHandoff,
    /// Planner iteration ended without a usable handoff.
    PlannerNoHandoff,
    /// Planner process call failed (timeout, crash, malformed output).
    PlannerFailed,
    /// Work items remain from an earlier plan; no Planner call needed.
    QueuedWork,
    ExecutorCompleted,
    ExecutorNeedsHelp,
    /// Executor process call failed; counts like needing help.
    ExecutorFailed,
    ExecutorContinue,
    ValidationApproved { remaining: usize },
    ValidationRejected,
    ResolveEscalation,
    FallbackCompleted,
    FallbackIncomplete,
    BudgetExhausted,
    Cancelled,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    EscalationLimitExceeded,
    BudgetExhausted,
    Cancelled,
    Fatal,
}

/// What the Coordinator must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Run another iteration in the same role.
    Continue,
    /// Pass control to the other role.
    Handoff { to: Role },
    /// Re-run the same work item or validation with the failure in context.
    Retry,
    /// Planning stalled; hand off with a synthetic work item.
    ForceHandoff,
    Escalate,
    /// Switch to single-role fallback mode.
    Degrade,
    Complete,
    Fail { reason: FailReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    pub event: Event,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event {event:?} is not valid in phase {phase}")]
pub struct InvalidTransition {
    pub phase: Phase,
    pub event: Event,
}

/// Apply `event` to `state` under `policy`.
///
/// On error the state is left untouched.
pub fn transition(
    state: &mut CoordinationState,
    event: Event,
    policy: &CoordinationPolicy,
) -> Result<Transition, InvalidTransition> {
    let from = state.phase;
    let invalid = InvalidTransition { phase: from, event };
    let mut next = state.clone();

    let action = match (from, event) {
        (Phase::Terminated, _) => return Err(invalid),

        (_, Event::Cancelled) => fail(&mut next, FailReason::Cancelled),
        (_, Event::Fatal) => fail(&mut next, FailReason::Fatal),
        (_, Event::BudgetExhausted) => fail(&mut next, FailReason::BudgetExhausted),

        (Phase::Planning, Event::PlannerHandoff | Event::QueuedWork) => {
            next.reset_after_handoff();
            next.phase = Phase::Executing;
            Action::Handoff { to: Role::Executor }
        }
        (Phase::Planning, Event::PlannerNoHandoff | Event::PlannerFailed) => {
            next.planning_iterations += 1;
            if next.planning_iterations >= policy.max_planning_iterations {
                next.reset_after_handoff();
                next.phase = Phase::Executing;
                Action::ForceHandoff
            } else {
                Action::Continue
            }
        }

        (Phase::Executing, Event::ExecutorCompleted) => {
            next.consecutive_failures = 0;
            next.retries = 0;
            next.phase = Phase::Validating;
            Action::Handoff { to: Role::Planner }
        }
        (Phase::Executing, Event::ExecutorNeedsHelp | Event::ExecutorFailed) => {
            next.consecutive_failures += 1;
            if next.consecutive_failures >= policy.max_consecutive_failures {
                escalate(&mut next)
            } else {
                next.retries += 1;
                Action::Retry
            }
        }
        (Phase::Executing, Event::ExecutorContinue) => Action::Continue,

        (Phase::Validating, Event::ValidationApproved { remaining }) => {
            next.reset_after_handoff();
            if remaining == 0 {
                next.phase = Phase::Terminated;
                Action::Complete
            } else {
                next.phase = Phase::Planning;
                Action::Continue
            }
        }
        (Phase::Validating, Event::ValidationRejected) => {
            next.rejections += 1;
            if next.rejections >= policy.max_consecutive_failures {
                escalate(&mut next)
            } else {
                next.retries += 1;
                next.phase = Phase::Executing;
                Action::Handoff { to: Role::Executor }
            }
        }
        (Phase::Validating, Event::PlannerFailed) => {
            next.consecutive_failures += 1;
            if next.consecutive_failures >= policy.max_consecutive_failures {
                escalate(&mut next)
            } else {
                next.retries += 1;
                Action::Retry
            }
        }

        (Phase::Escalating, Event::ResolveEscalation) => {
            if policy.allow_fallback {
                next.reset_after_handoff();
                next.phase = Phase::Fallback;
                Action::Degrade
            } else {
                fail(&mut next, FailReason::EscalationLimitExceeded)
            }
        }

        (Phase::Fallback, Event::FallbackCompleted) => {
            next.phase = Phase::Terminated;
            Action::Complete
        }
        (Phase::Fallback, Event::FallbackIncomplete) => Action::Continue,

        _ => return Err(invalid),
    };

    let to = next.phase;
    *state = next;
    Ok(Transition {
        from,
        to,
        event,
        action,
    })
}

fn escalate(state: &mut CoordinationState) -> Action {
    state.escalations += 1;
    state.phase = Phase::Escalating;
    Action::Escalate
}

fn fail(state: &mut CoordinationState, reason: FailReason) -> Action {
    state.phase = Phase::Terminated;
    Action::Fail { reason }
}
