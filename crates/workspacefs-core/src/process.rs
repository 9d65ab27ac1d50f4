//! External tool invocation with output capture and cancellation.

use std::io;
use std::io::Read;
use std::process::Command;
use std::process::ExitStatus;
use std::process::Stdio;
use std::thread;
use std::time::Duration;

use tracing::debug;
use tracing::warn;

use crate::CancelToken;
use crate::MaterializeError;
use crate::Result;

/// How often a running child is checked for exit and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Exit status and interleaved stdout/stderr of a finished tool.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    /// Exit status of the process.
    pub status: ExitStatus,
    /// Combined stdout and stderr, lossily decoded.
    pub output: String,
}

/// Runs `command` to completion, capturing stdout and stderr into one
/// stream.
///
/// The child is polled until it exits. If `cancel` fires first, the child is
/// killed and reaped, and the cancellation error is returned. A non-zero exit
/// is reported as [`MaterializeError::ExternalTool`] carrying the captured
/// output.
///
/// # Errors
///
/// Returns an error if the process cannot be spawned, is cancelled, or exits
/// unsuccessfully.
pub fn run_captured(mut command: Command, cancel: &CancelToken) -> Result<CapturedOutput> {
    cancel.check()?;

    let program = command.get_program().to_string_lossy().into_owned();
    let (mut reader, writer) = io::pipe()?;
    let stderr_writer = writer.try_clone()?;
    command
        .stdin(Stdio::null())
        .stdout(writer)
        .stderr(stderr_writer);

    debug!(program = %program, args = ?command.get_args().collect::<Vec<_>>(), "spawning");
    let mut child = command.spawn()?;
    // The command still owns the write ends; drop them so the reader sees EOF.
    drop(command);

    let collector = thread::spawn(move || {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).map(|_| buffer)
    });

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if let Err(err) = cancel.check() {
            debug!(program = %program, "killing cancelled process");
            if let Err(kill_err) = child.kill() {
                warn!(program = %program, error = %kill_err, "failed to kill process");
            }
            child.wait()?;
            // The collector is left detached: a grandchild may still hold
            // the pipe open.
            return Err(err);
        }
        thread::sleep(POLL_INTERVAL);
    };

    let output = collector
        .join()
        .map_err(|_| io::Error::other("output collector panicked"))??;
    let output = String::from_utf8_lossy(&output).into_owned();

    if !status.success() {
        return Err(MaterializeError::ExternalTool {
            program,
            status,
            output,
        });
    }

    Ok(CapturedOutput { status, output })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn test_captures_stdout_and_stderr() {
        let out = run_captured(sh("echo out; echo err >&2"), &CancelToken::new())
            .expect("script should succeed");
        assert!(out.status.success());
        assert!(out.output.contains("out"));
        assert!(out.output.contains("err"));
    }

    #[test]
    fn test_nonzero_exit_is_external_tool_error() {
        let err = run_captured(sh("echo broken >&2; exit 3"), &CancelToken::new())
            .expect_err("script should fail");
        match err {
            MaterializeError::ExternalTool {
                program,
                status,
                output,
            } => {
                assert_eq!(program, "sh");
                assert_eq!(status.code(), Some(3));
                assert!(output.contains("broken"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_program_is_io_error() {
        let err = run_captured(
            Command::new("/nonexistent/workspacefs-tool"),
            &CancelToken::new(),
        )
        .expect_err("spawn should fail");
        assert!(matches!(err, MaterializeError::Io(_)));
    }

    #[test]
    fn test_already_cancelled_does_not_spawn() {
        let token = CancelToken::new();
        token.cancel();
        let err = run_captured(Command::new("/nonexistent/workspacefs-tool"), &token)
            .expect_err("should be cancelled");
        assert!(matches!(err, MaterializeError::Cancelled));
    }

    #[test]
    fn test_cancel_kills_running_process() {
        let token = CancelToken::new();
        let remote = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            remote.cancel();
        });

        let start = Instant::now();
        let mut cmd = Command::new("sleep");
        cmd.arg("10");
        let err = run_captured(cmd, &token).expect_err("should be cancelled");
        canceller.join().unwrap();

        assert!(matches!(err, MaterializeError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_deadline_kills_running_process() {
        let token = CancelToken::with_timeout(Duration::from_millis(100));
        let start = Instant::now();
        let mut cmd = Command::new("sleep");
        cmd.arg("10");
        let err = run_captured(cmd, &token).expect_err("should time out");
        assert!(matches!(err, MaterializeError::DeadlineExceeded));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
