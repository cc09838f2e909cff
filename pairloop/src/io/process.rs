//! Helpers for running child processes with timeouts, cancellation and
//! streamed, bounded output.

use std::io::{ErrorKind, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::cancel::CancelToken;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 8192;

/// How a streamed command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Result of [`run_command_streaming`]. Stdout went to the chunk callback.
#[derive(Debug)]
pub struct StreamOutcome {
    pub end: StreamEnd,
    pub stderr: Vec<u8>,
    pub stderr_truncated: usize,
    pub stdout_bytes: usize,
    pub stdout_truncated: usize,
}

/// Run a command, feeding decoded stdout chunks to `on_chunk` as they arrive.
///
/// The child is killed when `timeout` elapses or `cancel` is set. Stdout is
/// decoded as UTF-8 with multi-byte sequences carried across reads; bytes past
/// `output_limit_bytes` are drained but not forwarded. Stderr is captured up to
/// the same limit.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_streaming(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancelToken,
    on_chunk: &mut dyn FnMut(&str),
) -> Result<StreamOutcome> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };
    let deadline = Instant::now() + timeout;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (tx, rx) = mpsc::channel();
    let stdout_handle = thread::spawn(move || forward_stream(stdout, output_limit_bytes, tx));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    // The write blocks once the pipe buffer fills, so it must not hold up the
    // deadline and cancel checks below.
    let stdin_handle = match stdin {
        Some(input) => {
            let child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            Some(thread::spawn(move || write_stdin(child_stdin, &input)))
        }
        None => None,
    };

    let mut stopped = None;
    loop {
        if cancel.is_cancelled() {
            stopped = Some(StreamEnd::Cancelled);
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            stopped = Some(StreamEnd::TimedOut);
            break;
        }
        match rx.recv_timeout(POLL_INTERVAL.min(deadline - now)) {
            Ok(chunk) => on_chunk(&chunk),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let status = match stopped {
        Some(end) => Err(end),
        None => wait_until(&mut child, deadline, cancel)?,
    };
    let end = match status {
        Ok(status) => StreamEnd::Exited(status),
        Err(end) => {
            warn!(?end, "stopping command");
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?;
            // Readers and the stdin writer are left to finish on their own; a
            // grandchild may still hold the pipes open.
            debug!("command killed");
            return Ok(StreamOutcome {
                end,
                stderr: Vec::new(),
                stderr_truncated: 0,
                stdout_bytes: 0,
                stdout_truncated: 0,
            });
        }
    };

    if let Some(handle) = stdin_handle {
        join_output(handle).context("join stdin")?;
    }
    let (stdout_bytes, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status_code(&end), "command finished");
    Ok(StreamOutcome {
        end,
        stderr,
        stderr_truncated,
        stdout_bytes,
        stdout_truncated,
    })
}

/// Wait for exit after stdout closed, still honouring deadline and cancel.
fn wait_until(
    child: &mut Child,
    deadline: Instant,
    cancel: &CancelToken,
) -> Result<Result<ExitStatus, StreamEnd>> {
    loop {
        if cancel.is_cancelled() {
            return Ok(Err(StreamEnd::Cancelled));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(Err(StreamEnd::TimedOut));
        }
        let wait = POLL_INTERVAL.min(deadline - now);
        if let Some(status) = child.wait_timeout(wait).context("wait for command")? {
            return Ok(Ok(status));
        }
    }
}

fn status_code(end: &StreamEnd) -> Option<i32> {
    match end {
        StreamEnd::Exited(status) => status.code(),
        StreamEnd::TimedOut | StreamEnd::Cancelled => None,
    }
}

fn join_output<T>(handle: thread::JoinHandle<Result<T>>) -> Result<T> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("pipe thread panicked")),
    }
}

/// Write the whole prompt, then close stdin so the child sees EOF.
fn write_stdin<W: Write>(mut writer: W, input: &[u8]) -> Result<()> {
    match writer.write_all(input) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::BrokenPipe => {
            warn!("child closed stdin before reading the whole prompt");
            Ok(())
        }
        Err(e) => Err(e).context("write stdin"),
    }
}

/// Read `reader` to the end, sending decoded text until `limit` bytes were sent.
fn forward_stream<R: Read>(
    mut reader: R,
    limit: usize,
    tx: Sender<String>,
) -> Result<(usize, usize)> {
    let mut pending = Vec::new();
    let mut sent = 0usize;
    let mut truncated = 0usize;
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(sent);
        let keep = n.min(remaining);
        truncated += n - keep;
        if keep == 0 {
            continue;
        }
        sent += keep;
        pending.extend_from_slice(&chunk[..keep]);
        let text = take_utf8(&mut pending);
        // The receiver only goes away once the command was stopped.
        if !text.is_empty() && tx.send(text).is_err() {
            return Ok((sent, truncated));
        }
    }

    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
    }
    Ok((sent, truncated))
}

/// Decode the longest prefix of `pending` that does not end inside a
/// multi-byte sequence, leaving the incomplete tail in place.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let split = match std::str::from_utf8(pending) {
        Err(err) if err.error_len().is_none() => err.valid_up_to(),
        _ => pending.len(),
    };
    let rest = pending.split_off(split);
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = rest;
    text
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_utf8_carries_partial_sequences() {
        let bytes = "héllo".as_bytes();
        let mut pending = bytes[..2].to_vec();
        assert_eq!(take_utf8(&mut pending), "h");
        assert_eq!(pending, vec![0xc3]);
        pending.extend_from_slice(&bytes[2..]);
        assert_eq!(take_utf8(&mut pending), "éllo");
        assert!(pending.is_empty());
    }

    #[test]
    fn forward_stream_respects_limit() {
        let (tx, rx) = mpsc::channel();
        let (sent, truncated) = forward_stream(&b"abcdefgh"[..], 5, tx).expect("forward");
        let received: String = rx.iter().collect();
        assert_eq!(received, "abcde");
        assert_eq!((sent, truncated), (5, 3));
    }

    #[cfg(unix)]
    #[test]
    fn streams_stdout_and_reports_exit() {
        let cmd = Command::new("cat");
        let mut seen = String::new();
        let outcome = run_command_streaming(
            cmd,
            Some(b"hello\nworld\n"),
            Duration::from_secs(10),
            1024,
            &CancelToken::new(),
            &mut |chunk: &str| seen.push_str(chunk),
        )
        .expect("run");

        assert_eq!(seen, "hello\nworld\n");
        assert!(matches!(outcome.end, StreamEnd::Exited(status) if status.success()));
        assert_eq!(outcome.stdout_bytes, 12);
    }

    #[cfg(unix)]
    #[test]
    fn kills_command_at_deadline() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 5");
        let started = Instant::now();
        let outcome = run_command_streaming(
            cmd,
            None,
            Duration::from_millis(200),
            1024,
            &CancelToken::new(),
            &mut |_: &str| {},
        )
        .expect("run");

        assert_eq!(outcome.end, StreamEnd::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn deadline_holds_while_child_ignores_large_prompt() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 5");
        let prompt = vec![b'x'; 256 * 1024];
        let started = Instant::now();
        let outcome = run_command_streaming(
            cmd,
            Some(&prompt),
            Duration::from_millis(200),
            1024,
            &CancelToken::new(),
            &mut |_: &str| {},
        )
        .expect("run");

        assert_eq!(outcome.end, StreamEnd::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn write_stdin_tolerates_closed_pipe() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(ErrorKind::BrokenPipe.into())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        write_stdin(Closed, b"prompt").expect("broken pipe is not an error");
    }

    #[cfg(unix)]
    #[test]
    fn cancelled_token_stops_command() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 5");
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = run_command_streaming(
            cmd,
            None,
            Duration::from_secs(10),
            1024,
            &cancel,
            &mut |_: &str| {},
        )
        .expect("run");
        assert_eq!(outcome.end, StreamEnd::Cancelled);
    }
}
