//! Process execution
//!
//! Spawns one command, captures its output and classifies how it ended:
//! - Shell lines run through `sh -c` (`cmd /C` on Windows)
//! - Argument vectors run directly, without a shell
//! - stdout and stderr are drained concurrently with the wait
//! - An optional timeout kills the child

use async_trait::async_trait;
use sluice_core::domain::script::Command;
use sluice_core::error::{FailureReason, ProcessError};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::time;
use tracing::{debug, warn};

use super::output_tail::OutputTail;

/// Captured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Last output chunks in arrival order
    pub tail: Vec<String>,
}

/// Runs a single command to completion
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs `command` and waits for it to exit
    ///
    /// # Arguments
    /// * `command` - Command to run
    /// * `working_dir` - Directory to run in (inherits the runner's when None)
    ///
    /// # Returns
    /// The captured output on exit code 0, a [`ProcessError`] carrying
    /// whatever was captured otherwise
    async fn run(
        &self,
        command: &Command,
        working_dir: Option<&Path>,
    ) -> Result<ProcessOutput, ProcessError>;
}

/// [`ProcessRunner`] backed by real OS processes
///
/// Children are spawned with `kill_on_drop`, so dropping the future of a
/// running command (e.g. a cancelled sibling) also kills the process.
#[derive(Debug, Clone)]
pub struct SystemProcessRunner {
    tail_chunks: usize,
    timeout: Option<Duration>,
}

impl SystemProcessRunner {
    /// Creates a runner without a time limit
    ///
    /// # Arguments
    /// * `tail_chunks` - Number of trailing output chunks kept per command
    pub fn new(tail_chunks: usize) -> Self {
        Self {
            tail_chunks,
            timeout: None,
        }
    }

    /// Sets the per-command time limit
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    async fn wait(&self, child: &mut Child) -> Result<ExitStatus, FailureReason> {
        let Some(limit) = self.timeout else {
            return child
                .wait()
                .await
                .map_err(|e| FailureReason::Io(e.to_string()));
        };

        match time::timeout(limit, child.wait()).await {
            Ok(status) => status.map_err(|e| FailureReason::Io(e.to_string())),
            Err(_) => {
                warn!("Process {:?} exceeded {:?}, killing it", child.id(), limit);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill process: {}", e);
                }
                Err(FailureReason::TimedOut(limit))
            }
        }
    }
}

impl Default for SystemProcessRunner {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    async fn run(
        &self,
        command: &Command,
        working_dir: Option<&Path>,
    ) -> Result<ProcessOutput, ProcessError> {
        let mut process = build_process(command);
        if let Some(dir) = working_dir {
            process.current_dir(dir);
        }
        process
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running `{}` in {:?}", command, working_dir);

        let mut child = process.spawn().map_err(|e| {
            ProcessError::without_output(command, FailureReason::Spawn(e.to_string()))
        })?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let tail = OutputTail::new(self.tail_chunks);

        let (status, stdout, stderr) = tokio::join!(
            self.wait(&mut child),
            drain(stdout_pipe, tail.clone()),
            drain(stderr_pipe, tail.clone()),
        );

        let (stdout, stderr) = match (stdout, stderr) {
            (Ok(stdout), Ok(stderr)) => (stdout, stderr),
            (Err(e), _) | (_, Err(e)) => {
                return Err(ProcessError::without_output(
                    command,
                    FailureReason::Io(e.to_string()),
                ));
            }
        };

        match status {
            Ok(status) if status.success() => {
                debug!(
                    "Command completed successfully: stdout_len={}, stderr_len={}",
                    stdout.len(),
                    stderr.len()
                );
                Ok(ProcessOutput {
                    stdout,
                    stderr,
                    tail: tail.snapshot(),
                })
            }
            Ok(status) => {
                let reason = match status.code() {
                    Some(code) => FailureReason::Exited(code),
                    None => FailureReason::Signaled,
                };
                debug!("Command `{}` failed: {}", command, reason);
                Err(ProcessError::new(command, reason, stdout, stderr))
            }
            Err(reason) => Err(ProcessError::new(command, reason, stdout, stderr)),
        }
    }
}

fn build_process(command: &Command) -> tokio::process::Command {
    match command {
        Command::Shell(line) => {
            #[cfg(windows)]
            let mut process = {
                let mut process = tokio::process::Command::new("cmd");
                process.arg("/C");
                process
            };
            #[cfg(not(windows))]
            let mut process = {
                let mut process = tokio::process::Command::new("sh");
                process.arg("-c");
                process
            };
            process.arg(line);
            process
        }
        Command::Exec { program, args } => {
            let mut process = tokio::process::Command::new(program);
            process.args(args);
            process
        }
    }
}

/// Reads a pipe to the end, feeding every chunk to the tail
async fn drain<R>(pipe: Option<R>, tail: OutputTail) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return Ok(String::new());
    };

    let mut collected = Vec::new();
    let mut buf = vec![0u8; 8192];
    // Start of the bytes not yet pushed to the tail
    let mut flushed = 0;
    loop {
        let n = pipe.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&buf[..n]);

        let end = complete_prefix(&collected[flushed..]) + flushed;
        if end > flushed {
            tail.push(String::from_utf8_lossy(&collected[flushed..end]).into_owned());
            flushed = end;
        }
    }
    if flushed < collected.len() {
        tail.push(String::from_utf8_lossy(&collected[flushed..]).into_owned());
    }

    Ok(String::from_utf8_lossy(&collected).into_owned())
}

/// Length of `bytes` without a UTF-8 sequence cut off at the end
///
/// Invalid bytes elsewhere are left to the lossy conversion.
fn complete_prefix(bytes: &[u8]) -> usize {
    let start = bytes.len().saturating_sub(3);
    for i in (start..bytes.len()).rev() {
        if let Err(e) = std::str::from_utf8(&bytes[i..]) {
            if e.valid_up_to() == 0 && e.error_len().is_none() {
                return i;
            }
        }
    }
    bytes.len()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout() {
        let runner = SystemProcessRunner::default();
        let output = runner
            .run(&Command::shell("echo hello && echo warn >&2"), None)
            .await
            .unwrap();

        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "warn\n");
        assert!(!output.tail.is_empty());
    }

    #[tokio::test]
    async fn test_argv_is_not_interpreted_by_a_shell() {
        let runner = SystemProcessRunner::default();
        let output = runner
            .run(&Command::exec("echo", ["$HOME", "a && b"]), None)
            .await
            .unwrap();

        assert_eq!(output.stdout, "$HOME a && b\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_keeps_output() {
        let runner = SystemProcessRunner::default();
        let err = runner
            .run(&Command::shell("echo partial; echo broken >&2; exit 3"), None)
            .await
            .unwrap_err();

        assert_eq!(err.exit_code, Some(3));
        assert_eq!(err.reason, FailureReason::Exited(3));
        assert_eq!(err.stdout, "partial\n");
        assert_eq!(err.stderr, "broken\n");
        assert_eq!(err.command, "echo partial; echo broken >&2; exit 3");
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let runner = SystemProcessRunner::default();
        let err = runner
            .run(&Command::exec("sluice-no-such-program", Vec::<String>::new()), None)
            .await
            .unwrap_err();

        assert!(matches!(err.reason, FailureReason::Spawn(_)));
        assert_eq!(err.exit_code, None);
    }

    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();

        let runner = SystemProcessRunner::default();
        let output = runner
            .run(&Command::shell("cat marker.txt"), Some(dir.path()))
            .await
            .unwrap();

        assert_eq!(output.stdout, "here");
    }

    #[tokio::test]
    async fn test_tail_is_bounded() {
        let runner = SystemProcessRunner::new(2);
        let output = runner
            .run(
                &Command::shell("for i in 1 2 3 4 5; do echo line $i; sleep 0.05; done"),
                None,
            )
            .await
            .unwrap();

        assert!(output.tail.len() <= 2);
        assert!(output.tail.last().unwrap().ends_with("line 5\n"));
        assert!(output.stdout.starts_with("line 1\n"));
    }

    #[tokio::test]
    async fn test_tail_keeps_characters_split_across_reads() {
        // "é" is 0xC3 0xA9; the first read ends between the two bytes
        let pipe = AsyncReadExt::chain(&b"caf\xc3"[..], &b"\xa9 ok\n"[..]);
        let tail = OutputTail::new(5);

        let collected = drain(Some(pipe), tail.clone()).await.unwrap();

        assert_eq!(collected, "café ok\n");
        assert_eq!(tail.snapshot().concat(), "café ok\n");
        assert!(tail.snapshot().iter().all(|chunk| !chunk.contains('\u{FFFD}')));
    }

    #[test]
    fn test_complete_prefix() {
        assert_eq!(complete_prefix(b"abc"), 3);
        assert_eq!(complete_prefix(b"ab\xc3"), 2);
        assert_eq!(complete_prefix(b"a\xe2\x82"), 1);
        assert_eq!(complete_prefix("a€".as_bytes()), 4);
        assert_eq!(complete_prefix(b"a\xff"), 2);
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let runner = SystemProcessRunner::default().with_timeout(Some(Duration::from_millis(100)));
        let started = std::time::Instant::now();
        let err = runner
            .run(&Command::exec("sleep", ["5"]), None)
            .await
            .unwrap_err();

        assert_eq!(err.reason, FailureReason::TimedOut(Duration::from_millis(100)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
