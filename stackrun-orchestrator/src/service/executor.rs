//! Execution Engine
//!
//! Runs the engine's apply for a prepared run. Both output channels are read
//! line by line by their own task; every non-empty line is sequenced and
//! persisted through the run's [`RunLogWriter`] as it arrives. The result is
//! classified once the process has exited and both readers have drained, or
//! the drain grace period has passed.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use stackrun_core::domain::log::StreamKind;
use stackrun_core::domain::run::{RunOutput, RunStatus};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::service::log::RunLogWriter;
use crate::service::preparer::PreparedRun;

/// Largest captured tail of either channel kept in the run output
pub const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// Markers the engine prints when another update holds the stack
const LOCK_MARKERS: &[&str] = &["currently locked", "lock file", "pulumi cancel"];

/// Why the process stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Exited(Option<i32>),
    TimedOut,
    Cancelled,
}

/// Text captured from one channel
#[derive(Debug, Default)]
struct Capture {
    text: String,
    read_error: Option<String>,
}

/// Apply a prepared run and build its terminal output
///
/// Never fails: every problem becomes a `failed` output. Line persistence
/// failures are logged and do not change the classification.
pub async fn execute(
    config: &Config,
    prepared: &PreparedRun,
    writer: Arc<RunLogWriter>,
    cancel: CancellationToken,
) -> RunOutput {
    let fqdn = prepared.stack_fqdn();
    let run_id = writer.run_id();

    let mut cmd = prepared.command(
        &config.engine_binary,
        &["up", "--stack", &fqdn, "--yes", "--skip-preview"],
    );
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    tracing::info!(
        run_id = %run_id,
        kind = %prepared.kind,
        "Starting {} up for stack {}",
        config.engine_binary,
        fqdn
    );

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let mut output = engine_output(&fqdn, RunStatus::Failed, "", "", None);
            output.error = Some(format!("failed to start {}: {}", config.engine_binary, e));
            return output;
        }
    };

    let stop_reading = CancellationToken::new();
    let stdout_task = spawn_reader(
        child.stdout.take(),
        StreamKind::Stdout,
        writer.clone(),
        stop_reading.clone(),
    );
    let stderr_task = spawn_reader(
        child.stderr.take(),
        StreamKind::Stderr,
        writer.clone(),
        stop_reading.clone(),
    );

    let termination = tokio::select! {
        () = cancel.cancelled() => {
            tracing::warn!(run_id = %run_id, "Run cancelled, killing engine");
            child.kill().await.ok();
            Termination::Cancelled
        }
        result = tokio::time::timeout(config.deploy_timeout, child.wait()) => {
            match result {
                Ok(Ok(status)) => Termination::Exited(status.code()),
                Ok(Err(e)) => {
                    tracing::error!(run_id = %run_id, "Failed waiting for engine: {}", e);
                    Termination::Exited(None)
                }
                Err(_) => {
                    tracing::warn!(
                        run_id = %run_id,
                        "Engine exceeded {}s, killing it",
                        config.deploy_timeout.as_secs()
                    );
                    child.kill().await.ok();
                    Termination::TimedOut
                }
            }
        }
    };

    // Descendants of the engine can inherit its pipes and keep them open
    // after it is gone
    let drain_deadline = {
        let stop = stop_reading.clone();
        let grace = config.output_drain_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            stop.cancel();
        })
    };
    let stdout = join_reader(stdout_task).await;
    let stderr = join_reader(stderr_task).await;
    drain_deadline.abort();

    let lines = writer.sequenced().await;
    tracing::info!(
        run_id = %run_id,
        lines,
        "Engine finished: {:?}",
        termination
    );

    classify(&fqdn, termination, stdout, stderr, config.deploy_timeout)
}

fn spawn_reader<R>(
    pipe: Option<R>,
    stream_kind: StreamKind,
    writer: Arc<RunLogWriter>,
    stop: CancellationToken,
) -> JoinHandle<Capture>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut capture = Capture::default();
        let Some(pipe) = pipe else {
            return capture;
        };

        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = tokio::select! {
                () = stop.cancelled() => {
                    tracing::warn!(
                        run_id = %writer.run_id(),
                        stream_kind = %stream_kind,
                        "Engine output still open after exit, no longer reading it"
                    );
                    break;
                }
                read = reader.read_until(b'\n', &mut buf) => read,
            };

            match read {
                Ok(0) => break,
                Ok(_) => {
                    let line = decode_line(&buf);
                    capture.text.push_str(&line);
                    capture.text.push('\n');
                    trim_to_tail(&mut capture.text, MAX_CAPTURE_BYTES);

                    if line.trim().is_empty() {
                        continue;
                    }

                    if let Err(e) = writer.append(&line, stream_kind).await {
                        tracing::error!(
                            run_id = %writer.run_id(),
                            sequence_num = e.sequence_num,
                            stream_kind = %stream_kind,
                            "Dropping log line: {}",
                            e
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        run_id = %writer.run_id(),
                        stream_kind = %stream_kind,
                        "Error reading engine output: {}",
                        e
                    );
                    capture.read_error = Some(e.to_string());
                    break;
                }
            }
        }

        capture
    })
}

/// One line without its terminator; invalid UTF-8 is replaced, not rejected
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

async fn join_reader(task: JoinHandle<Capture>) -> Capture {
    task.await.unwrap_or_else(|e| Capture {
        text: String::new(),
        read_error: Some(format!("reader task failed: {}", e)),
    })
}

/// Drop leading bytes so at most `limit` remain, on a character boundary
fn trim_to_tail(text: &mut String, limit: usize) {
    if text.len() <= limit {
        return;
    }
    let mut cut = text.len() - limit;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    text.drain(..cut);
}

fn engine_output(
    fqdn: &str,
    status: RunStatus,
    stdout: &str,
    stderr: &str,
    exit_code: Option<i32>,
) -> RunOutput {
    RunOutput {
        timestamp: chrono::Utc::now(),
        status,
        error_type: Some("pulumi".to_string()),
        stack_fqdn: Some(fqdn.to_string()),
        stdout: Some(stdout.to_string()),
        stderr: Some(stderr.to_string()),
        exit_code,
        error: None,
    }
}

fn classify(
    fqdn: &str,
    termination: Termination,
    stdout: Capture,
    stderr: Capture,
    deploy_timeout: Duration,
) -> RunOutput {
    let exit_code = match termination {
        Termination::Exited(code) => code,
        Termination::TimedOut | Termination::Cancelled => Some(-1),
    };

    let read_error = stdout.read_error.as_ref().or(stderr.read_error.as_ref());
    let succeeded = termination == Termination::Exited(Some(0)) && read_error.is_none();

    let status = if succeeded {
        RunStatus::Success
    } else {
        RunStatus::Failed
    };
    let mut output = engine_output(fqdn, status, &stdout.text, &stderr.text, exit_code);
    if succeeded {
        return output;
    }

    let code = exit_code.unwrap_or(-1);
    let combined = format!("{}{}", stderr.text, stdout.text);

    let message = if LOCK_MARKERS.iter().any(|m| combined.contains(m)) {
        format!(
            "Stack is locked by another Pulumi process. This usually happens when:\n\
             1. A previous deployment is still running\n\
             2. A previous deployment was interrupted and didn't clean up\n\
             3. Multiple deployments are trying to run simultaneously\n\n\
             Solution: Wait for the other process to finish, or manually cancel the lock:\n  \
             pulumi cancel --stack {} --yes\n\n\
             Original error:\n{}",
            fqdn, combined
        )
    } else if termination == Termination::TimedOut {
        format!(
            "Deployment timed out after {} minutes and the engine was killed. \
             Plugin downloads, very large stacks or slow networks can cause this.\n\n\
             Last output:\n{}",
            deploy_timeout.as_secs() / 60,
            stdout.text
        )
    } else if termination == Termination::Cancelled {
        format!(
            "Deployment was interrupted (process killed). Exit code: {}\n\nLast output:\n{}",
            code, stdout.text
        )
    } else if !stderr.text.is_empty() {
        stderr.text.clone()
    } else if !stdout.text.is_empty() {
        let t = &stdout.text;
        if t.contains("error") || t.contains("Error") || t.contains("failed") {
            t.clone()
        } else {
            format!("Engine command failed with exit code {}\n\nOutput:\n{}", code, t)
        }
    } else if let Some(e) = read_error {
        e.clone()
    } else {
        format!("Engine command failed with exit code {}", code)
    };

    output.error = Some(message);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(text: &str) -> Capture {
        Capture {
            text: text.to_string(),
            read_error: None,
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(1800);

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"plain\n"), "plain");
        assert_eq!(decode_line(b"crlf\r\n"), "crlf");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"caf\xe9\n"), "caf\u{fffd}");
    }

    #[test]
    fn test_trim_to_tail() {
        let mut text = "abcdef".to_string();
        trim_to_tail(&mut text, 4);
        assert_eq!(text, "cdef");

        let mut text = "é".repeat(4);
        trim_to_tail(&mut text, 3);
        assert_eq!(text, "é");

        let mut text = "short".to_string();
        trim_to_tail(&mut text, 64);
        assert_eq!(text, "short");
    }

    #[test]
    fn test_classify_success() {
        let output = classify(
            "a/b/c",
            Termination::Exited(Some(0)),
            capture("done\n"),
            capture(""),
            TIMEOUT,
        );
        assert_eq!(output.status, RunStatus::Success);
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.error, None);
        assert_eq!(output.stack_fqdn.as_deref(), Some("a/b/c"));
    }

    #[test]
    fn test_classify_read_error_fails_zero_exit() {
        let stdout = Capture {
            text: String::new(),
            read_error: Some("connection reset by peer".to_string()),
        };
        let output = classify("a/b/c", Termination::Exited(Some(0)), stdout, capture(""), TIMEOUT);
        assert_eq!(output.status, RunStatus::Failed);
        assert_eq!(
            output.error.as_deref(),
            Some("connection reset by peer")
        );
    }

    #[test]
    fn test_lock_message_takes_precedence() {
        let output = classify(
            "acme/net/prod",
            Termination::TimedOut,
            capture(""),
            capture("error: the stack is currently locked by 1 lock(s)\n"),
            TIMEOUT,
        );
        let error = output.error.unwrap();
        assert!(error.starts_with("Stack is locked"));
        assert!(error.contains("pulumi cancel --stack acme/net/prod --yes"));
        assert!(error.contains("currently locked by 1 lock(s)"));
    }

    #[test]
    fn test_timeout_and_cancel_messages() {
        let output = classify("a/b/c", Termination::TimedOut, capture("partial\n"), capture(""), TIMEOUT);
        assert_eq!(output.exit_code, Some(-1));
        let error = output.error.unwrap();
        assert!(error.contains("timed out after 30 minutes"));
        assert!(error.contains("partial"));

        let output = classify("a/b/c", Termination::Cancelled, capture(""), capture(""), TIMEOUT);
        assert!(output.error.unwrap().starts_with("Deployment was interrupted"));
    }

    #[test]
    fn test_failure_message_precedence() {
        let output = classify(
            "a/b/c",
            Termination::Exited(Some(2)),
            capture("error: in stdout\n"),
            capture("boom\n"),
            TIMEOUT,
        );
        assert_eq!(output.error.as_deref(), Some("boom\n"));

        let output = classify(
            "a/b/c",
            Termination::Exited(Some(2)),
            capture("Error: bad input\n"),
            capture(""),
            TIMEOUT,
        );
        assert_eq!(output.error.as_deref(), Some("Error: bad input\n"));

        let output = classify(
            "a/b/c",
            Termination::Exited(Some(2)),
            capture("just text\n"),
            capture(""),
            TIMEOUT,
        );
        assert_eq!(
            output.error.as_deref(),
            Some("Engine command failed with exit code 2\n\nOutput:\njust text\n")
        );

        let output = classify("a/b/c", Termination::Exited(Some(3)), capture(""), capture(""), TIMEOUT);
        assert_eq!(
            output.error.as_deref(),
            Some("Engine command failed with exit code 3")
        );
    }
}
