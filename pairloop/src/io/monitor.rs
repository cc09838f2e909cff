//! Monitoring emitter: a typed, fire-and-forget publish interface.
//!
//! A [`Monitor`] must never block or fail the Coordinator. Implementations
//! swallow their own errors (logging them) and must be safe to share across
//! Sessions running on different threads.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::machine::Phase;
use crate::core::session::SessionStatus;
use crate::core::types::{HandoffReason, Role};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    SessionCreated {
        session_id: Uuid,
        goal: String,
    },
    IterationCompleted {
        session_id: Uuid,
        seq: u32,
        role: Role,
        duration_ms: u64,
        reason: HandoffReason,
        failure: Option<String>,
    },
    Handoff {
        session_id: Uuid,
        from: Role,
        to: Role,
        reason: HandoffReason,
        work_items: usize,
    },
    Escalation {
        session_id: Uuid,
        consecutive_failures: u32,
        escalations: u32,
        fallback: bool,
    },
    SessionCompleted {
        session_id: Uuid,
        iterations: usize,
        total_cost_usd: f64,
    },
    SessionFailed {
        session_id: Uuid,
        iterations: usize,
        phase: Phase,
        error: Option<String>,
    },
}

impl MonitorEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            MonitorEvent::SessionCreated { session_id, .. }
            | MonitorEvent::IterationCompleted { session_id, .. }
            | MonitorEvent::Handoff { session_id, .. }
            | MonitorEvent::Escalation { session_id, .. }
            | MonitorEvent::SessionCompleted { session_id, .. }
            | MonitorEvent::SessionFailed { session_id, .. } => *session_id,
        }
    }

    /// Terminal status this event announces, if any.
    pub fn terminal_status(&self) -> Option<SessionStatus> {
        match self {
            MonitorEvent::SessionCompleted { .. } => Some(SessionStatus::Completed),
            MonitorEvent::SessionFailed { .. } => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

pub trait Monitor: Send + Sync {
    fn publish(&self, event: &MonitorEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMonitor;

impl Monitor for NullMonitor {
    fn publish(&self, _event: &MonitorEvent) {}
}

/// Emits each event as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMonitor;

impl Monitor for TracingMonitor {
    fn publish(&self, event: &MonitorEvent) {
        match event {
            MonitorEvent::SessionCreated { session_id, goal } => {
                info!(%session_id, goal = %goal, "session created");
            }
            MonitorEvent::IterationCompleted {
                session_id,
                seq,
                role,
                duration_ms,
                reason,
                failure,
            } => {
                info!(%session_id, seq, %role, duration_ms, %reason, failure = ?failure, "iteration completed");
            }
            MonitorEvent::Handoff {
                session_id,
                from,
                to,
                reason,
                work_items,
            } => {
                info!(%session_id, %from, %to, %reason, work_items, "handoff");
            }
            MonitorEvent::Escalation {
                session_id,
                consecutive_failures,
                escalations,
                fallback,
            } => {
                warn!(%session_id, consecutive_failures, escalations, fallback, "escalation");
            }
            MonitorEvent::SessionCompleted {
                session_id,
                iterations,
                total_cost_usd,
            } => {
                info!(%session_id, iterations, total_cost_usd, "session completed");
            }
            MonitorEvent::SessionFailed {
                session_id,
                iterations,
                phase,
                error,
            } => {
                warn!(%session_id, iterations, %phase, error = ?error, "session failed");
            }
        }
    }
}

/// Appends one JSON object per event to a file.
#[derive(Debug)]
pub struct JsonlMonitor {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlMonitor {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create monitor dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open monitor log {}", path.display()))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn write_event(&self, event: &MonitorEvent) -> Result<()> {
        let mut line = serde_json::to_string(event).context("serialize monitor event")?;
        line.push('\n');
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("monitor writer lock poisoned"))?;
        writer.write_all(line.as_bytes()).context("write monitor event")?;
        writer.flush().context("flush monitor event")
    }
}

impl Monitor for JsonlMonitor {
    fn publish(&self, event: &MonitorEvent) {
        if let Err(err) = self.write_event(event) {
            warn!(err = %format!("{err:#}"), "dropping monitor event");
        }
    }
}
