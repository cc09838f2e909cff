//! External process executor abstraction.
//!
//! The [`ProcessExecutor`] trait decouples coordination from the actual
//! assistant backend (by default the `claude` CLI in streaming JSON mode).
//! Tests use scripted executors that replay predetermined chunks without
//! spawning processes.

use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::io::process::{StreamEnd, run_command_streaming};

/// Bytes of stdout kept for failure diagnosis.
const STDOUT_TAIL_BYTES: usize = 4096;
/// Conventional exit code for command-line usage errors.
const USAGE_ERROR_CODE: i32 = 2;

static AUTH_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)please (?:run /)?log ?in|invalid api key|not (?:authenticated|logged in)|authentication (?:required|failed)|\bunauthorized\b|oauth token (?:has )?expired",
    )
    .unwrap()
});

/// Parameters for one process invocation.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    /// Working directory for the process.
    pub workdir: PathBuf,
    /// Prompt text written to the process's stdin.
    pub prompt: String,
    pub timeout: Duration,
    /// Resume the external conversation identified by this token.
    pub continuation_token: Option<String>,
    /// Stop forwarding stdout beyond this many bytes.
    pub output_limit_bytes: usize,
    pub cancel: CancelToken,
}

/// A process call that ran to completion (successfully or not).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    #[error("process timed out after {}s", .timeout.as_secs())]
    Timeout { timeout: Duration },
    #[error("authentication required: {message}")]
    AuthenticationRequired { message: String },
    #[error("process crashed: {message}")]
    Crashed { message: String },
    #[error("malformed invocation: {message}")]
    MalformedInvocation { message: String },
    #[error("process call cancelled")]
    Cancelled,
}

/// Abstraction over assistant process backends.
pub trait ProcessExecutor {
    /// Run one request, passing raw stdout chunks to `on_chunk` as they arrive.
    fn execute(
        &self,
        request: &ProcessRequest,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<ProcessExit, ProcessError>;
}

/// Executor that spawns a configurable CLI command.
#[derive(Debug, Clone)]
pub struct CliProcessExecutor {
    program: String,
    args: Vec<String>,
}

impl CliProcessExecutor {
    /// `command` is the program followed by its fixed arguments.
    pub fn new(command: &[String]) -> Result<Self, ProcessError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| ProcessError::MalformedInvocation {
                message: "process command is empty".to_string(),
            })?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn default_command() -> Vec<String> {
        ["claude", "-p", "--output-format", "stream-json", "--verbose"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn command_args(&self, request: &ProcessRequest) -> Vec<String> {
        let mut args = self.args.clone();
        if let Some(token) = &request.continuation_token {
            args.push("--resume".to_string());
            args.push(token.clone());
        }
        args
    }
}

impl ProcessExecutor for CliProcessExecutor {
    #[instrument(skip_all, fields(program = %self.program, timeout_secs = request.timeout.as_secs(), resume = request.continuation_token.is_some()))]
    fn execute(
        &self,
        request: &ProcessRequest,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<ProcessExit, ProcessError> {
        info!(workdir = %request.workdir.display(), "starting process");

        let mut cmd = Command::new(&self.program);
        cmd.args(self.command_args(request))
            .current_dir(&request.workdir);

        let mut tail = String::new();
        let outcome = run_command_streaming(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
            &request.cancel,
            &mut |chunk| {
                keep_tail(&mut tail, chunk);
                on_chunk(chunk);
            },
        )
        .map_err(launch_error)?;

        let status = match outcome.end {
            StreamEnd::TimedOut => {
                warn!(timeout_secs = request.timeout.as_secs(), "process timed out");
                return Err(ProcessError::Timeout {
                    timeout: request.timeout,
                });
            }
            StreamEnd::Cancelled => return Err(ProcessError::Cancelled),
            StreamEnd::Exited(status) => status,
        };

        let stderr = String::from_utf8_lossy(&outcome.stderr);
        if let Some(error) = classify_exit(status, &stderr, &tail) {
            warn!(exit_code = ?status.code(), %error, "process failed");
            return Err(error);
        }

        debug!(exit_code = ?status.code(), stdout_bytes = outcome.stdout_bytes, "process finished");
        Ok(ProcessExit {
            code: status.code(),
        })
    }
}

fn launch_error(err: anyhow::Error) -> ProcessError {
    let message = format!("{err:#}");
    match err.downcast_ref::<std::io::Error>().map(std::io::Error::kind) {
        Some(std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied) => {
            ProcessError::MalformedInvocation { message }
        }
        _ => ProcessError::Crashed { message },
    }
}

/// Map a failed exit to a distinct error kind, or `None` for an ordinary exit.
fn classify_exit(status: ExitStatus, stderr: &str, stdout_tail: &str) -> Option<ProcessError> {
    if status.success() {
        return None;
    }
    if let Some(signal) = termination_signal(status) {
        return Some(ProcessError::Crashed {
            message: format!("terminated by signal {signal}"),
        });
    }
    if let Some(found) = AUTH_FAILURE
        .find(stderr)
        .or_else(|| AUTH_FAILURE.find(stdout_tail))
    {
        return Some(ProcessError::AuthenticationRequired {
            message: found.as_str().to_string(),
        });
    }
    if status.code() == Some(USAGE_ERROR_CODE) {
        let detail = stderr
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("usage error");
        return Some(ProcessError::MalformedInvocation {
            message: detail.to_string(),
        });
    }
    None
}

#[cfg(unix)]
fn termination_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn termination_signal(_status: ExitStatus) -> Option<i32> {
    None
}

fn keep_tail(tail: &mut String, chunk: &str) {
    tail.push_str(chunk);
    if tail.len() > STDOUT_TAIL_BYTES {
        let mut cut = tail.len() - STDOUT_TAIL_BYTES;
        while !tail.is_char_boundary(cut) {
            cut += 1;
        }
        tail.drain(..cut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str, timeout: Duration) -> ProcessRequest {
        ProcessRequest {
            workdir: std::env::temp_dir(),
            prompt: prompt.to_string(),
            timeout,
            continuation_token: None,
            output_limit_bytes: 64 * 1024,
            cancel: CancelToken::new(),
        }
    }

    fn shell(script: &str) -> CliProcessExecutor {
        CliProcessExecutor::new(&["sh".to_string(), "-c".to_string(), script.to_string()])
            .expect("executor")
    }

    #[test]
    fn empty_command_is_malformed() {
        let err = CliProcessExecutor::new(&[]).unwrap_err();
        assert!(matches!(err, ProcessError::MalformedInvocation { .. }));
    }

    #[test]
    fn resume_token_is_appended() {
        let executor = CliProcessExecutor::new(&CliProcessExecutor::default_command())
            .expect("executor");
        let mut req = request("p", Duration::from_secs(1));
        req.continuation_token = Some("abc".to_string());
        let args = executor.command_args(&req);
        assert_eq!(&args[args.len() - 2..], ["--resume", "abc"]);
        assert_eq!(args[0], "-p");
    }

    #[test]
    fn keep_tail_bounds_memory_on_char_boundaries() {
        let mut tail = String::new();
        keep_tail(&mut tail, &"é".repeat(STDOUT_TAIL_BYTES));
        assert!(tail.len() <= STDOUT_TAIL_BYTES);
        assert!(tail.chars().all(|ch| ch == 'é'));
    }

    #[cfg(unix)]
    #[test]
    fn prompt_goes_to_stdin_and_output_streams_back() {
        let executor = CliProcessExecutor::new(&["cat".to_string()]).expect("executor");
        let mut seen = String::new();
        let exit = executor
            .execute(&request("{\"result\":\"ok\"}\n", Duration::from_secs(10)), &mut |chunk| {
                seen.push_str(chunk);
            })
            .expect("execute");
        assert!(exit.success());
        assert_eq!(seen, "{\"result\":\"ok\"}\n");
    }

    #[cfg(unix)]
    #[test]
    fn ordinary_failures_return_exit_code() {
        let exit = shell("exit 1")
            .execute(&request("p", Duration::from_secs(10)), &mut |_| {})
            .expect("execute");
        assert_eq!(exit.code, Some(1));
    }

    #[cfg(unix)]
    #[test]
    fn usage_errors_are_malformed_invocations() {
        let err = shell("echo 'unknown option --bogus' >&2; exit 2")
            .execute(&request("p", Duration::from_secs(10)), &mut |_| {})
            .unwrap_err();
        assert_eq!(
            err,
            ProcessError::MalformedInvocation {
                message: "unknown option --bogus".to_string()
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn auth_phrases_are_detected() {
        let err = shell("echo 'Invalid API key · Please run /login' >&2; exit 1")
            .execute(&request("p", Duration::from_secs(10)), &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, ProcessError::AuthenticationRequired { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn signals_are_crashes() {
        let err = shell("kill -9 $$")
            .execute(&request("p", Duration::from_secs(10)), &mut |_| {})
            .unwrap_err();
        assert_eq!(
            err,
            ProcessError::Crashed {
                message: "terminated by signal 9".to_string()
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn missing_binary_is_malformed_invocation() {
        let executor =
            CliProcessExecutor::new(&["pairloop-no-such-binary".to_string()]).expect("executor");
        let err = executor
            .execute(&request("p", Duration::from_secs(10)), &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, ProcessError::MalformedInvocation { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn slow_process_times_out() {
        let err = shell("sleep 5")
            .execute(&request("p", Duration::from_millis(200)), &mut |_| {})
            .unwrap_err();
        assert_eq!(
            err,
            ProcessError::Timeout {
                timeout: Duration::from_millis(200)
            }
        );
    }
}
