//! Error types shared by the runner and the report formatter
//!
//! - [`ProcessError`]: one command failed
//! - [`AggregateError`]: one or more commands of a script failed, with a
//!   per-group completion map
//! - [`DetectionError`]: the change detector could not answer
//! - [`PipelineError`]: what a failed stage carries into the report

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::domain::script::{Command, TaskGroup};
use crate::domain::stage::GroupSummary;

/// Why a process did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Process exited with a nonzero code
    Exited(i32),
    /// Process was terminated by a signal
    Signaled,
    /// Process could not be started
    Spawn(String),
    /// Reading output or waiting for the process failed
    Io(String),
    /// Process exceeded the configured timeout and was killed
    TimedOut(Duration),
    /// Process was aborted because a sibling failed
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Exited(code) => write!(f, "exit code {}", code),
            FailureReason::Signaled => write!(f, "terminated by signal"),
            FailureReason::Spawn(msg) => write!(f, "failed to start: {}", msg),
            FailureReason::Io(msg) => write!(f, "i/o error: {}", msg),
            FailureReason::TimedOut(after) => write!(f, "timed out after {:?}", after),
            FailureReason::Cancelled => write!(f, "cancelled after a sibling failed"),
        }
    }
}

/// A single command failed
#[derive(Debug, Clone, Error)]
#[error("command `{command}` failed: {reason}")]
pub struct ProcessError {
    /// The command as it was configured
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub reason: FailureReason,
}

impl ProcessError {
    pub fn new(command: &Command, reason: FailureReason, stdout: String, stderr: String) -> Self {
        let exit_code = match reason {
            FailureReason::Exited(code) => Some(code),
            _ => None,
        };

        Self {
            command: command.to_string(),
            exit_code,
            stdout,
            stderr,
            reason,
        }
    }

    /// Failure without any captured output
    pub fn without_output(command: &Command, reason: FailureReason) -> Self {
        Self::new(command, reason, String::new(), String::new())
    }
}

/// Completion status of one task group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    Done,
    Failed,
    NotStarted,
}

/// Outcome of one command inside a group
#[derive(Debug, Clone)]
pub struct CommandReport {
    pub command: String,
    pub done: bool,
    pub error: Option<ProcessError>,
}

/// Outcome of one task group
#[derive(Debug, Clone)]
pub struct GroupReport {
    pub name: String,
    pub status: GroupStatus,
    pub commands: Vec<CommandReport>,
}

impl GroupReport {
    /// Report for a group that was never dispatched
    pub fn not_started(group: &TaskGroup) -> Self {
        Self {
            name: group.name.clone(),
            status: GroupStatus::NotStarted,
            commands: group
                .commands
                .iter()
                .map(|command| CommandReport {
                    command: command.to_string(),
                    done: false,
                    error: None,
                })
                .collect(),
        }
    }

    /// Looks up a command by its display form
    pub fn command(&self, command: &str) -> Option<&CommandReport> {
        self.commands.iter().find(|c| c.command == command)
    }

    /// Condensed `{done, error}` view kept in stage results
    pub fn summary(&self) -> GroupSummary {
        let error = self
            .commands
            .iter()
            .filter_map(|c| c.error.as_ref())
            .map(ToString::to_string)
            .collect::<Vec<_>>();

        GroupSummary {
            name: self.name.clone(),
            done: self.status == GroupStatus::Done,
            error: if error.is_empty() {
                None
            } else {
                Some(error.join("; "))
            },
        }
    }
}

/// One or more commands of a script failed
///
/// Holds a report for every declared group, in order, so the notification
/// can show which groups completed, which failed and which never started.
#[derive(Debug, Clone)]
pub struct AggregateError {
    pub groups: Vec<GroupReport>,
}

impl AggregateError {
    pub fn group(&self, name: &str) -> Option<&GroupReport> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn failed_groups(&self) -> impl Iterator<Item = &GroupReport> {
        self.groups
            .iter()
            .filter(|g| g.status == GroupStatus::Failed)
    }

    /// First process error in declaration order
    pub fn first_failure(&self) -> Option<&ProcessError> {
        self.groups
            .iter()
            .flat_map(|g| g.commands.iter())
            .find_map(|c| c.error.as_ref())
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed: Vec<&str> = self.failed_groups().map(|g| g.name.as_str()).collect();
        write!(f, "task group(s) failed: {}", failed.join(", "))
    }
}

impl std::error::Error for AggregateError {}

/// The change detector could not answer
#[derive(Debug, Clone, Error)]
pub enum DetectionError {
    #[error("detector command failed: {0}")]
    Command(#[from] ProcessError),

    #[error("unexpected detector output: {0}")]
    Output(String),
}

/// Error recorded for the stage that failed
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}
