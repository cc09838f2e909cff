//! Test-only doubles: a scripted process backend and a recording monitor.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use tempfile::TempDir;

use crate::core::types::Task;
use crate::io::executor::{ProcessError, ProcessExecutor, ProcessExit, ProcessRequest};
use crate::io::init::{InitOptions, PairloopPaths, init_workspace};
use crate::io::monitor::{Monitor, MonitorEvent};

/// One scripted process call.
#[derive(Debug, Clone)]
pub enum ScriptedRun {
    /// Stream `chunks` in order, then exit with `code`.
    Output { chunks: Vec<String>, code: Option<i32> },
    /// Stream nothing and fail.
    Fail(ProcessError),
    /// Stream `chunks`, then time out after the request's timeout.
    TimeoutAfter { chunks: Vec<String> },
    /// Stream `chunks`, then trip the request's cancel token and stop.
    CancelledAfter { chunks: Vec<String> },
}

impl ScriptedRun {
    /// A successful call printing `text` as one newline-terminated chunk.
    pub fn text(text: &str) -> Self {
        Self::Output {
            chunks: vec![format!("{text}\n")],
            code: Some(0),
        }
    }

    /// A successful call delivering `chunks` exactly as given.
    pub fn chunks(chunks: &[&str]) -> Self {
        Self::Output {
            chunks: chunks.iter().map(|c| (*c).to_string()).collect(),
            code: Some(0),
        }
    }

    pub fn exit_code(text: &str, code: i32) -> Self {
        Self::Output {
            chunks: vec![format!("{text}\n")],
            code: Some(code),
        }
    }

    pub fn error(err: ProcessError) -> Self {
        Self::Fail(err)
    }

    pub fn timeout() -> Self {
        Self::TimeoutAfter { chunks: Vec::new() }
    }

    /// Print `text`, then behave as if the operator pressed Ctrl-C.
    pub fn cancelled_after(text: &str) -> Self {
        Self::CancelledAfter {
            chunks: vec![format!("{text}\n")],
        }
    }
}

/// Replays [`ScriptedRun`]s in order and records every request.
///
/// Once the script is exhausted every call fails as a crash.
#[derive(Debug, Default)]
pub struct ScriptedProcess {
    runs: Mutex<VecDeque<ScriptedRun>>,
    requests: Mutex<Vec<ProcessRequest>>,
}

impl ScriptedProcess {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProcessRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn remaining(&self) -> usize {
        self.runs.lock().expect("runs lock").len()
    }
}

impl ProcessExecutor for ScriptedProcess {
    fn execute(
        &self,
        request: &ProcessRequest,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<ProcessExit, ProcessError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let run = self
            .runs
            .lock()
            .expect("runs lock")
            .pop_front()
            .unwrap_or_else(|| {
                ScriptedRun::Fail(ProcessError::Crashed {
                    message: "script exhausted".to_string(),
                })
            });
        match run {
            ScriptedRun::Output { chunks, code } => {
                for chunk in &chunks {
                    on_chunk(chunk);
                }
                Ok(ProcessExit { code })
            }
            ScriptedRun::Fail(err) => Err(err),
            ScriptedRun::TimeoutAfter { chunks } => {
                for chunk in &chunks {
                    on_chunk(chunk);
                }
                Err(ProcessError::Timeout {
                    timeout: request.timeout,
                })
            }
            ScriptedRun::CancelledAfter { chunks } => {
                for chunk in &chunks {
                    on_chunk(chunk);
                }
                request.cancel.cancel();
                Err(ProcessError::Cancelled)
            }
        }
    }
}

/// Monitor that keeps every published event.
#[derive(Debug, Default)]
pub struct RecordingMonitor {
    events: Mutex<Vec<MonitorEvent>>,
}

impl RecordingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MonitorEvent> {
        self.events.lock().expect("events lock").clone()
    }
}

impl Monitor for RecordingMonitor {
    fn publish(&self, event: &MonitorEvent) {
        self.events.lock().expect("events lock").push(event.clone());
    }
}

/// A task whose working directory is never touched by scripted runs.
pub fn sample_task() -> Task {
    Task::new("Add a health check endpoint", std::env::temp_dir())
}

/// Temporary directory with an initialized `.pairloop/`.
pub struct TestWorkspace {
    dir: TempDir,
    paths: PairloopPaths,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let paths = init_workspace(dir.path(), &InitOptions { force: false })?;
        Ok(Self { dir, paths })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn paths(&self) -> &PairloopPaths {
        &self.paths
    }
}
