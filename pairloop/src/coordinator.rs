//! Session orchestration: alternates Planner and Executor iterations.
//!
//! The [`Coordinator`] owns the loop. Each iteration builds a prompt for the
//! role the current [`Phase`] belongs to, streams one process call through a
//! [`StreamReassembler`], classifies the records, appends the resulting
//! [`Iteration`] to the Session and the ledger, and feeds the matching
//! [`Event`] to the state machine. The returned [`Action`] decides what the
//! next iteration does.
//!
//! Work items from a plan are queued. After each approved item the loop
//! re-enters planning, where queued work is handed straight back to the
//! Executor without another Planner call.

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::agents::executor::ExecutorAgent;
use crate::agents::planner::PlannerAgent;
use crate::agents::{Classification, RoleAgent};
use crate::cancel::CancelToken;
use crate::core::budget::next_iteration_timeout;
use crate::core::machine::{
    Action, CoordinationPolicy, CoordinationState, Event, Phase, Transition, transition,
};
use crate::core::reassembler::StreamReassembler;
use crate::core::session::{Iteration, Session, SessionStatus};
use crate::core::types::{
    ExitStatus, HandoffReason, ParsedOutput, Role, Task, ValidationVerdict, WorkItem,
    truncate_chars,
};
use crate::error::CoordinationError;
use crate::io::config::PairloopConfig;
use crate::io::executor::{ProcessExecutor, ProcessRequest};
use crate::io::ledger::Ledger;
use crate::io::monitor::{Monitor, MonitorEvent, NullMonitor};
use crate::io::prompt::{PromptContext, Purpose};

const MAX_FEEDBACK_CHARS: usize = 2000;

/// Final state of one Session run.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session: Session,
    pub state: CoordinationState,
    /// Every state-machine transition, in order.
    pub transitions: Vec<Transition>,
    /// Why the Session failed; `None` when it completed.
    pub error: Option<CoordinationError>,
    /// Non-fatal errors observed along the way (timeouts, crashes, malformed
    /// output, ambiguous handoffs).
    pub incidents: Vec<CoordinationError>,
}

impl SessionReport {
    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    /// Incidents that counted as failed iterations (timeouts, crashes,
    /// malformed output or invocation).
    pub fn transient_failures(&self) -> usize {
        self.incidents.iter().filter(|err| err.is_transient()).count()
    }

    /// Distinct phases visited, collapsing self-transitions.
    pub fn phase_path(&self) -> Vec<Phase> {
        let mut path: Vec<Phase> = Vec::new();
        for t in &self.transitions {
            if path.is_empty() {
                path.push(t.from);
            }
            if path.last() != Some(&t.to) {
                path.push(t.to);
            }
        }
        path
    }
}

pub struct Coordinator<P: ProcessExecutor, L: Ledger> {
    process: P,
    ledger: L,
    policy: CoordinationPolicy,
    planner: Box<dyn RoleAgent>,
    executor: Box<dyn RoleAgent>,
    monitor: Arc<dyn Monitor>,
    cancel: CancelToken,
    output_limit_bytes: usize,
}

impl<P: ProcessExecutor, L: Ledger> Coordinator<P, L> {
    /// Coordinator with default prompt and process settings.
    pub fn new(process: P, ledger: L, policy: CoordinationPolicy) -> Self {
        let mut coordinator = Self::from_config(process, ledger, &PairloopConfig::default());
        coordinator.policy = policy;
        coordinator
    }

    pub fn from_config(process: P, ledger: L, config: &PairloopConfig) -> Self {
        let prompt = &config.prompt;
        Self {
            process,
            ledger,
            policy: config.policy.to_policy(),
            planner: Box::new(PlannerAgent::new(
                prompt.budget_bytes,
                prompt.history_iterations,
            )),
            executor: Box::new(ExecutorAgent::new(
                prompt.budget_bytes,
                prompt.history_iterations,
            )),
            monitor: Arc::new(NullMonitor),
            cancel: CancelToken::new(),
            output_limit_bytes: config.process.output_limit_bytes,
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_agents(mut self, planner: Box<dyn RoleAgent>, executor: Box<dyn RoleAgent>) -> Self {
        self.planner = planner;
        self.executor = executor;
        self
    }

    pub fn policy(&self) -> &CoordinationPolicy {
        &self.policy
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn process(&self) -> &P {
        &self.process
    }

    /// Run a Session from planning to a terminal status.
    pub fn run(&self, task: Task) -> SessionReport {
        self.run_session(task, Vec::new())
    }

    /// Run a Session that skips planning and starts on `items`.
    ///
    /// An empty plan behaves like [`Coordinator::run`].
    pub fn run_with_plan(&self, task: Task, items: Vec<WorkItem>) -> SessionReport {
        self.run_session(task, items)
    }

    fn run_session(&self, task: Task, plan: Vec<WorkItem>) -> SessionReport {
        let session = Session::start(Uuid::new_v4(), task, Utc::now());
        let span = info_span!("session", session_id = %session.id());
        let _entered = span.enter();

        let mut run = if plan.is_empty() {
            Run::new(session, CoordinationState::new())
        } else {
            let mut run = Run::new(session, CoordinationState::starting_in(Phase::Executing));
            run.adopt_plan(plan, HandoffReason::ExplicitDelegation);
            run.start_next_item();
            run.session.set_active_role(Role::Executor);
            run
        };

        let outcome = self.open(&run).and_then(|()| self.drive(&mut run));
        self.conclude(run, outcome)
    }

    fn open(&self, run: &Run) -> Result<(), CoordinationError> {
        self.ledger
            .create_session(&run.session)
            .map_err(|err| CoordinationError::ledger(&err))?;
        info!(goal = %run.session.task().goal(), "session started");
        self.monitor.publish(&MonitorEvent::SessionCreated {
            session_id: run.session.id(),
            goal: run.session.task().goal().to_string(),
        });
        Ok(())
    }

    /// Loop until the state machine reaches `Terminated`.
    ///
    /// Returns `Ok` only when the Session completed; every error path leaves
    /// the final transition to [`Coordinator::conclude`] unless the machine
    /// already terminated.
    fn drive(&self, run: &mut Run) -> Result<(), CoordinationError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(CoordinationError::Cancelled);
            }

            let purpose = match run.state.phase {
                Phase::Terminated => return Ok(()),
                Phase::Escalating => {
                    self.resolve_escalation(run)?;
                    continue;
                }
                Phase::Planning if !run.queue.is_empty() => {
                    self.apply(run, Event::QueuedWork)?;
                    run.start_next_item();
                    let reason = run.plan_reason;
                    self.handoff(run, Role::Executor, reason);
                    continue;
                }
                Phase::Planning => Purpose::Plan,
                Phase::Executing => Purpose::Execute,
                Phase::Validating => Purpose::Validate,
                Phase::Fallback => Purpose::Fallback,
            };

            let done = u32::try_from(run.session.iterations().len()).unwrap_or(u32::MAX);
            let timeout = next_iteration_timeout(&self.policy, done, run.clock.elapsed())
                .map_err(|exceeded| CoordinationError::BudgetExhausted {
                    detail: exceeded.describe(),
                })?;

            let (event, reason) = self.iterate(run, purpose, timeout)?;
            let transition = self.apply(run, event)?;
            self.follow(run, transition, reason)?;
        }
    }

    /// Run one iteration and translate its outcome into a machine event.
    fn iterate(
        &self,
        run: &mut Run,
        purpose: Purpose,
        timeout: Duration,
    ) -> Result<(Event, HandoffReason), CoordinationError> {
        let agent = match purpose {
            Purpose::Plan | Purpose::Validate => self.planner.as_ref(),
            Purpose::Execute | Purpose::Fallback => self.executor.as_ref(),
        };
        let role = agent.role();
        let seq = run.session.next_seq();
        let span = info_span!("iteration", seq, %role, purpose = purpose.as_str());
        let _entered = span.enter();

        run.session.set_active_role(role);
        let task = run.session.task().clone();
        let prompt = agent.prompt(&task, &run.context(purpose), run.session.iterations());
        let request = ProcessRequest {
            workdir: task.workdir().to_path_buf(),
            prompt: prompt.clone(),
            timeout,
            continuation_token: run.session.continuation().get(role).map(str::to_string),
            output_limit_bytes: self.output_limit_bytes,
            cancel: self.cancel.clone(),
        };

        debug!(timeout_secs = timeout.as_secs(), "invoking process");
        let started = Instant::now();
        let mut reassembler = StreamReassembler::new();
        let mut records = Vec::new();
        let result = self.process.execute(&request, &mut |chunk: &str| {
            records.extend(reassembler.push(chunk));
        });
        let mut duration_ms = millis(started.elapsed());

        let mut error = None;
        let exit = match result {
            Ok(exit) if exit.success() => ExitStatus::Success,
            Ok(exit) => ExitStatus::Failed { code: exit.code },
            Err(err) => {
                let err = CoordinationError::from(err);
                let exit = match &err {
                    CoordinationError::ProcessTimeout { timeout } => {
                        duration_ms = millis(*timeout);
                        ExitStatus::TimedOut
                    }
                    CoordinationError::Cancelled => ExitStatus::Cancelled,
                    other => ExitStatus::Error {
                        kind: other.kind().to_string(),
                    },
                };
                error = Some(err);
                exit
            }
        };
        match reassembler.finish() {
            Ok(rest) => records.extend(rest),
            Err(mut malformed) => {
                records.append(&mut malformed.records);
                let err = CoordinationError::from(malformed);
                if error.is_none() {
                    error = Some(err);
                } else {
                    run.incidents.push(err);
                }
            }
        }

        let Classification {
            output,
            decision,
            verdict,
        } = agent.classify(&records, &task, purpose);
        let failure = match (&error, &exit) {
            (Some(err), _) => Some(err.to_string()),
            (None, ExitStatus::Failed { code }) => Some(match code {
                Some(code) => format!("process exited with status {code}"),
                None => "process exited without a status".to_string(),
            }),
            _ => None,
        };

        let iteration = Iteration {
            seq,
            role,
            prompt,
            output,
            decision,
            verdict,
            exit,
            duration_ms,
            timestamp: Utc::now(),
            failure,
        };
        run.session.append(iteration.clone())?;
        self.ledger
            .append_iteration(&run.session, &iteration)
            .map_err(|err| CoordinationError::ledger(&err))?;
        self.monitor.publish(&MonitorEvent::IterationCompleted {
            session_id: run.session.id(),
            seq,
            role,
            duration_ms,
            reason: iteration.decision.reason,
            failure: iteration.failure.clone(),
        });

        if let Some(err) = error {
            if err.is_fatal() {
                return Err(err);
            }
            warn!(error = %err, "iteration failed");
            run.incidents.push(err);
        }
        if let Some(detail) = &iteration.decision.ambiguity {
            warn!(%detail, "ambiguous handoff");
            run.incidents.push(CoordinationError::HandoffAmbiguity {
                detail: detail.clone(),
            });
        }

        let event = run.observe(purpose, &iteration);
        let reason = match event {
            Event::ValidationRejected => HandoffReason::ValidationRejected,
            _ => iteration.decision.reason,
        };
        debug!(?event, %reason, duration_ms, "iteration classified");
        Ok((event, reason))
    }

    fn apply(&self, run: &mut Run, event: Event) -> Result<Transition, CoordinationError> {
        let t = transition(&mut run.state, event, &self.policy)?;
        debug!(from = %t.from, to = %t.to, ?event, action = ?t.action, "transition");
        run.transitions.push(t);
        Ok(t)
    }

    /// Carry out the action the state machine chose.
    fn follow(
        &self,
        run: &mut Run,
        t: Transition,
        reason: HandoffReason,
    ) -> Result<(), CoordinationError> {
        match t.action {
            Action::Handoff { to } => {
                if t.from == Phase::Planning {
                    run.start_next_item();
                }
                self.handoff(run, to, reason);
            }
            Action::ForceHandoff => {
                let proposed = mem::take(&mut run.proposed);
                let items = if proposed.is_empty() {
                    WorkItem::from_task(run.session.task()).into_iter().collect()
                } else {
                    proposed
                };
                if items.is_empty() {
                    return Err(CoordinationError::CoordinationDeadlock {
                        iterations: self.policy.max_planning_iterations,
                    });
                }
                warn!(
                    planning_iterations = self.policy.max_planning_iterations,
                    items = items.len(),
                    "planning stalled, forcing handoff"
                );
                run.adopt_plan(items, HandoffReason::ForcedHandoff);
                run.start_next_item();
                self.handoff(run, Role::Executor, HandoffReason::ForcedHandoff);
            }
            Action::Continue if t.to == Phase::Planning => {
                run.current = None;
            }
            Action::Escalate => {
                let failures = run.state.consecutive_failures.max(run.state.rejections);
                warn!(
                    consecutive_failures = failures,
                    escalations = run.state.escalations,
                    "escalating"
                );
                self.monitor.publish(&MonitorEvent::Escalation {
                    session_id: run.session.id(),
                    consecutive_failures: failures,
                    escalations: run.state.escalations,
                    fallback: self.policy.allow_fallback,
                });
            }
            Action::Continue
            | Action::Retry
            | Action::Degrade
            | Action::Complete
            | Action::Fail { .. } => {}
        }
        Ok(())
    }

    fn resolve_escalation(&self, run: &mut Run) -> Result<(), CoordinationError> {
        let failures = run.state.consecutive_failures.max(run.state.rejections);
        let t = self.apply(run, Event::ResolveEscalation)?;
        if t.action != Action::Degrade {
            return Err(CoordinationError::EscalationLimitExceeded { failures });
        }
        info!("continuing in single-role fallback mode");
        run.current = None;
        run.session.set_active_role(Role::Executor);
        Ok(())
    }

    fn handoff(&self, run: &mut Run, to: Role, reason: HandoffReason) {
        let from = run.session.active_role();
        run.session.set_active_role(to);
        let work_items = run.queue.len() + usize::from(run.current.is_some());
        info!(%from, %to, %reason, work_items, "handoff");
        self.monitor.publish(&MonitorEvent::Handoff {
            session_id: run.session.id(),
            from,
            to,
            reason,
            work_items,
        });
    }

    fn conclude(&self, mut run: Run, outcome: Result<(), CoordinationError>) -> SessionReport {
        let error = outcome.err();
        if let Some(err) = &error
            && run.state.phase != Phase::Terminated
        {
            let event = match err {
                CoordinationError::Cancelled => Event::Cancelled,
                CoordinationError::BudgetExhausted { .. } => Event::BudgetExhausted,
                _ => Event::Fatal,
            };
            if let Ok(t) = transition(&mut run.state, event, &self.policy) {
                run.transitions.push(t);
            }
        }

        let status = if error.is_none() {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        };
        if let Err(err) = run.session.finish(status, Utc::now()) {
            warn!(error = %err, "session already finished");
        }
        if let Err(err) = self.ledger.finalize(&run.session, status) {
            warn!(err = %format!("{err:#}"), "failed to finalize session");
            run.incidents.push(CoordinationError::ledger(&err));
        }

        let session_id = run.session.id();
        let iterations = run.session.iterations().len();
        match &error {
            None => {
                info!(
                    iterations,
                    total_cost_usd = run.session.total_cost_usd(),
                    "session completed"
                );
                self.monitor.publish(&MonitorEvent::SessionCompleted {
                    session_id,
                    iterations,
                    total_cost_usd: run.session.total_cost_usd(),
                });
            }
            Some(err) => {
                let phase = run.transitions.last().map_or(run.state.phase, |t| t.from);
                warn!(iterations, %phase, error = %err, "session failed");
                self.monitor.publish(&MonitorEvent::SessionFailed {
                    session_id,
                    iterations,
                    phase,
                    error: Some(err.to_string()),
                });
            }
        }

        SessionReport {
            session: run.session,
            state: run.state,
            transitions: run.transitions,
            error,
            incidents: run.incidents,
        }
    }
}

/// Mutable bookkeeping for one Session run.
struct Run {
    session: Session,
    state: CoordinationState,
    transitions: Vec<Transition>,
    incidents: Vec<CoordinationError>,
    /// The adopted plan, for prompt context.
    plan: Vec<WorkItem>,
    plan_reason: HandoffReason,
    queue: VecDeque<WorkItem>,
    current: Option<WorkItem>,
    feedback: Option<String>,
    /// Result text of the Executor's last completed iteration.
    report: Option<String>,
    /// Items the Planner listed without handing off; used by a forced handoff.
    proposed: Vec<WorkItem>,
    clock: Instant,
}

impl Run {
    fn new(session: Session, state: CoordinationState) -> Self {
        Self {
            session,
            state,
            transitions: Vec::new(),
            incidents: Vec::new(),
            plan: Vec::new(),
            plan_reason: HandoffReason::ExplicitDelegation,
            queue: VecDeque::new(),
            current: None,
            feedback: None,
            report: None,
            proposed: Vec::new(),
            clock: Instant::now(),
        }
    }

    fn adopt_plan(&mut self, items: Vec<WorkItem>, reason: HandoffReason) {
        self.plan = items.clone();
        self.queue = items.into();
        self.plan_reason = reason;
        self.proposed.clear();
    }

    fn start_next_item(&mut self) {
        self.current = self.queue.pop_front();
        self.feedback = None;
        self.report = None;
    }

    fn context(&self, purpose: Purpose) -> PromptContext {
        let current_item = match purpose {
            Purpose::Execute | Purpose::Validate => self.current.clone(),
            Purpose::Plan | Purpose::Fallback => None,
        };
        let (feedback, executor_report) = match purpose {
            Purpose::Validate => (None, self.report.clone()),
            Purpose::Plan | Purpose::Execute | Purpose::Fallback => (self.feedback.clone(), None),
        };
        PromptContext {
            purpose,
            work_items: self.plan.clone(),
            current_item,
            feedback,
            executor_report,
        }
    }

    /// Map a recorded iteration onto the event the state machine consumes,
    /// updating feedback and plan bookkeeping on the way.
    fn observe(&mut self, purpose: Purpose, iteration: &Iteration) -> Event {
        if let Some(failure) = &iteration.failure {
            self.feedback = Some(failure.clone());
            return match purpose {
                Purpose::Plan | Purpose::Validate => Event::PlannerFailed,
                Purpose::Execute => Event::ExecutorFailed,
                Purpose::Fallback => Event::FallbackIncomplete,
            };
        }

        let decision = &iteration.decision;
        match purpose {
            Purpose::Plan => {
                if decision.needs_handoff && !decision.work_items.is_empty() {
                    self.adopt_plan(decision.work_items.clone(), decision.reason);
                    Event::PlannerHandoff
                } else {
                    if !decision.work_items.is_empty() {
                        self.proposed = decision.work_items.clone();
                    }
                    Event::PlannerNoHandoff
                }
            }
            Purpose::Execute => match decision.reason {
                HandoffReason::ExecutorNeedsHelp => {
                    self.feedback = Some(help_request(&iteration.output));
                    Event::ExecutorNeedsHelp
                }
                HandoffReason::TaskCompleted => {
                    self.feedback = None;
                    self.report = Some(truncate_chars(&iteration.output.result, MAX_FEEDBACK_CHARS));
                    Event::ExecutorCompleted
                }
                _ => Event::ExecutorContinue,
            },
            Purpose::Validate => match &iteration.verdict {
                Some(ValidationVerdict::Approved) => Event::ValidationApproved {
                    remaining: self.queue.len(),
                },
                Some(ValidationVerdict::Rejected { feedback }) => {
                    self.feedback = Some(feedback.clone());
                    Event::ValidationRejected
                }
                None => {
                    self.feedback = None;
                    Event::ValidationRejected
                }
            },
            Purpose::Fallback => match decision.reason {
                HandoffReason::TaskCompleted => Event::FallbackCompleted,
                HandoffReason::ExecutorNeedsHelp => {
                    self.feedback = Some(help_request(&iteration.output));
                    Event::FallbackIncomplete
                }
                _ => Event::FallbackIncomplete,
            },
        }
    }
}

/// Feedback for the next attempt after the Executor reported errors.
fn help_request(output: &ParsedOutput) -> String {
    let text = if output.errors.is_empty() {
        output.headline(MAX_FEEDBACK_CHARS)
    } else {
        output.errors.join("\n")
    };
    truncate_chars(&text, MAX_FEEDBACK_CHARS)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::machine::FailReason;
    use crate::io::ledger::MemoryLedger;
    use crate::test_support::{ScriptedProcess, ScriptedRun, sample_task};

    fn policy() -> CoordinationPolicy {
        CoordinationPolicy {
            iteration_timeout: Duration::from_secs(5),
            ..CoordinationPolicy::default()
        }
    }

    #[test]
    fn queued_work_skips_the_planner() {
        let process = ScriptedProcess::new(vec![
            ScriptedRun::text("Added the route. Task complete."),
            ScriptedRun::text("APPROVED"),
            ScriptedRun::text("Wrote the test. Task complete."),
            ScriptedRun::text("APPROVED"),
        ]);
        let coordinator = Coordinator::new(process, MemoryLedger::new(), policy());
        let report = coordinator.run_with_plan(
            sample_task(),
            vec![
                WorkItem::new("Add the /health route"),
                WorkItem::new("Test the /health route"),
            ],
        );

        assert_eq!(report.status(), SessionStatus::Completed, "{:?}", report.error);
        let roles: Vec<Role> = report.session.iterations().iter().map(|i| i.role).collect();
        assert_eq!(
            roles,
            vec![Role::Executor, Role::Planner, Role::Executor, Role::Planner]
        );
        assert!(
            report
                .transitions
                .iter()
                .any(|t| t.event == Event::QueuedWork)
        );
        let prompts: Vec<String> = coordinator
            .process()
            .requests()
            .into_iter()
            .map(|r| r.prompt)
            .collect();
        assert!(prompts[2].contains("Test the /health route"));
    }

    #[test]
    fn empty_plan_starts_in_planning() {
        let process = ScriptedProcess::new(vec![ScriptedRun::error(
            crate::io::executor::ProcessError::AuthenticationRequired {
                message: "please log in".to_string(),
            },
        )]);
        let coordinator = Coordinator::new(process, MemoryLedger::new(), policy());
        let report = coordinator.run_with_plan(sample_task(), Vec::new());

        assert_eq!(report.session.iterations()[0].role, Role::Planner);
        assert_eq!(report.phase_path(), vec![Phase::Planning, Phase::Terminated]);
        assert_eq!(
            report.transitions.last().map(|t| t.action),
            Some(Action::Fail {
                reason: FailReason::Fatal
            })
        );
    }

    #[test]
    fn cancelled_before_start_records_no_iterations() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let coordinator = Coordinator::new(ScriptedProcess::new(Vec::new()), MemoryLedger::new(), policy())
            .with_cancel(cancel);
        let report = coordinator.run(sample_task());

        assert!(report.session.iterations().is_empty());
        assert_eq!(report.status(), SessionStatus::Failed);
        assert!(matches!(report.error, Some(CoordinationError::Cancelled)));
        assert_eq!(report.state.phase, Phase::Terminated);
    }

    #[test]
    fn rejection_feedback_reaches_the_next_executor_prompt() {
        let process = ScriptedProcess::new(vec![
            ScriptedRun::text("Added the route. Task complete."),
            ScriptedRun::text("REJECTED: the handler ignores HEAD requests."),
            ScriptedRun::text("Handled HEAD too. Task complete."),
            ScriptedRun::text("APPROVED"),
        ]);
        let coordinator = Coordinator::new(process, MemoryLedger::new(), policy());
        let report =
            coordinator.run_with_plan(sample_task(), vec![WorkItem::new("Add the /health route")]);

        assert_eq!(report.status(), SessionStatus::Completed, "{:?}", report.error);
        let requests = coordinator.process().requests();
        assert!(requests[2].prompt.contains("ignores HEAD requests"));
        assert!(requests[1].prompt.contains("Added the route"));
    }

    #[test]
    fn budget_exhaustion_fails_the_session() {
        let process = ScriptedProcess::new(vec![
            ScriptedRun::text("Still reading the code."),
            ScriptedRun::text("Still reading the code."),
        ]);
        let policy = CoordinationPolicy {
            max_iterations: 2,
            max_planning_iterations: 10,
            ..policy()
        };
        let coordinator = Coordinator::new(process, MemoryLedger::new(), policy);
        let report = coordinator.run(sample_task());

        assert_eq!(report.session.iterations().len(), 2);
        assert!(matches!(
            report.error,
            Some(CoordinationError::BudgetExhausted { .. })
        ));
        assert_eq!(
            report.transitions.last().map(|t| t.event),
            Some(Event::BudgetExhausted)
        );
    }
}
