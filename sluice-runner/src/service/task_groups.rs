//! Task group execution
//!
//! Groups of a script run one after another; the commands inside a group
//! run concurrently. A group is entered only when every command of the
//! previous group succeeded. On failure the caller gets an
//! [`AggregateError`] describing every group: done, failed (with the
//! per-command errors) or not started.

use serde::{Deserialize, Serialize};
use sluice_core::domain::script::{Script, TaskGroup};
use sluice_core::domain::stage::TaskResult;
use sluice_core::error::{
    AggregateError, CommandReport, FailureReason, GroupReport, GroupStatus, ProcessError,
};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::process::{ProcessOutput, ProcessRunner};

/// What happens to the other commands of a group once one fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupFailurePolicy {
    /// Siblings keep running; the group fails once all of them finished
    #[default]
    RunToCompletion,
    /// Siblings are aborted (and their processes killed) on the first failure
    CancelOnFirstFailure,
}

/// Runs scripts as sequential groups of concurrent commands
#[derive(Clone)]
pub struct TaskGroupExecutor {
    runner: Arc<dyn ProcessRunner>,
    policy: GroupFailurePolicy,
}

impl TaskGroupExecutor {
    /// Creates a new executor
    ///
    /// # Arguments
    /// * `runner` - Runs the individual commands
    /// * `policy` - Sibling handling when a command fails
    pub fn new(runner: Arc<dyn ProcessRunner>, policy: GroupFailurePolicy) -> Self {
        Self { runner, policy }
    }

    /// Runs every group of `script` in `working_dir`
    ///
    /// # Returns
    /// The results of all commands in declaration order, or the per-group
    /// completion map when any command failed
    pub async fn run_groups(
        &self,
        script: &Script,
        working_dir: &Path,
    ) -> Result<Vec<TaskResult>, AggregateError> {
        let groups = script.task_groups();
        let mut reports = Vec::with_capacity(groups.len());
        let mut results = Vec::new();
        let mut failed = false;

        for group in &groups {
            if failed {
                debug!("Skipping task group '{}' after failure", group.name);
                reports.push(GroupReport::not_started(group));
                continue;
            }

            info!(
                "Running task group '{}' ({} command(s))",
                group.name,
                group.commands.len()
            );

            let (report, group_results) = self.run_group(group, working_dir).await;
            if report.status == GroupStatus::Failed {
                error!("Task group '{}' failed", group.name);
                failed = true;
            }

            results.extend(group_results);
            reports.push(report);
        }

        if failed {
            Err(AggregateError { groups: reports })
        } else {
            Ok(results)
        }
    }

    /// Runs all commands of one group concurrently and waits for them
    pub async fn run_group(
        &self,
        group: &TaskGroup,
        working_dir: &Path,
    ) -> (GroupReport, Vec<TaskResult>) {
        let mut set = JoinSet::new();
        for (index, command) in group.commands.iter().cloned().enumerate() {
            let runner = Arc::clone(&self.runner);
            let dir = working_dir.to_path_buf();
            set.spawn(async move {
                let outcome = runner.run(&command, Some(&dir)).await;
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Option<Result<ProcessOutput, ProcessError>>> =
            (0..group.commands.len()).map(|_| None).collect();
        let mut aborted = false;

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    if let Err(e) = &outcome {
                        warn!("{}", e);
                        if self.policy == GroupFailurePolicy::CancelOnFirstFailure && !aborted {
                            info!("Cancelling remaining commands of '{}'", group.name);
                            set.abort_all();
                            aborted = true;
                        }
                    }
                    outcomes[index] = Some(outcome);
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!("Command task in group '{}' panicked: {}", group.name, e),
            }
        }

        let mut commands = Vec::with_capacity(outcomes.len());
        let mut results = Vec::new();

        for (command, outcome) in group.commands.iter().zip(outcomes) {
            match outcome {
                Some(Ok(output)) => {
                    commands.push(CommandReport {
                        command: command.to_string(),
                        done: true,
                        error: None,
                    });
                    results.push(TaskResult {
                        command: command.clone(),
                        stdout: output.stdout,
                        stderr: output.stderr,
                        tail: output.tail,
                        success: true,
                    });
                }
                Some(Err(err)) => commands.push(CommandReport {
                    command: command.to_string(),
                    done: false,
                    error: Some(err),
                }),
                None => {
                    let reason = if aborted {
                        FailureReason::Cancelled
                    } else {
                        FailureReason::Io("command task panicked".to_string())
                    };
                    commands.push(CommandReport {
                        command: command.to_string(),
                        done: false,
                        error: Some(ProcessError::without_output(command, reason)),
                    });
                }
            }
        }

        let status = if commands.iter().all(|c| c.done) {
            GroupStatus::Done
        } else {
            GroupStatus::Failed
        };

        let report = GroupReport {
            name: group.name.clone(),
            status,
            commands,
        };

        (report, results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use sluice_core::domain::script::Command;
    use std::time::Duration;

    fn group(name: &str, commands: &[&str]) -> TaskGroup {
        TaskGroup::new(
            name,
            commands.iter().map(|c| Command::shell(*c)).collect(),
        )
    }

    fn executor(runner: Arc<ScriptedRunner>, policy: GroupFailurePolicy) -> TaskGroupExecutor {
        TaskGroupExecutor::new(runner, policy)
    }

    #[tokio::test]
    async fn test_all_groups_succeed_in_order() {
        let runner = Arc::new(ScriptedRunner::new().respond("npm run build", "built"));
        let script = Script::Groups(vec![
            group("install", &["npm ci"]),
            group("build", &["npm run build"]),
        ]);

        let results = executor(runner.clone(), GroupFailurePolicy::default())
            .run_groups(&script, Path::new("/srv/build"))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[1].stdout, "built");
        assert_eq!(runner.calls(), vec!["npm ci", "npm run build"]);
        assert_eq!(
            runner.working_dir_of("npm ci").as_deref(),
            Some(Path::new("/srv/build"))
        );
    }

    #[tokio::test]
    async fn test_commands_of_a_group_run_concurrently() {
        let delay = Duration::from_millis(200);
        let runner = Arc::new(
            ScriptedRunner::new()
                .delay("a", delay)
                .delay("b", delay)
                .delay("c", delay),
        );
        let script = Script::Groups(vec![group("parallel", &["a", "b", "c"])]);

        let started = std::time::Instant::now();
        executor(runner.clone(), GroupFailurePolicy::default())
            .run_groups(&script, Path::new("."))
            .await
            .unwrap();

        assert_eq!(runner.peak_concurrency(), 3);
        assert!(started.elapsed() < Duration::from_millis(550));
    }

    #[tokio::test]
    async fn test_groups_never_overlap() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .delay("first", Duration::from_millis(50))
                .delay("second", Duration::from_millis(50)),
        );
        let script = Script::Groups(vec![group("one", &["first"]), group("two", &["second"])]);

        executor(runner.clone(), GroupFailurePolicy::default())
            .run_groups(&script, Path::new("."))
            .await
            .unwrap();

        assert_eq!(runner.peak_concurrency(), 1);
    }

    #[tokio::test]
    async fn test_failure_blocks_later_groups() {
        let runner = Arc::new(ScriptedRunner::new().fail("B", 1));
        let script = Script::Groups(vec![group("G1", &["A", "B", "C"]), group("G2", &["D"])]);

        let err = executor(runner.clone(), GroupFailurePolicy::RunToCompletion)
            .run_groups(&script, Path::new("."))
            .await
            .unwrap_err();

        let g1 = err.group("G1").unwrap();
        assert_eq!(g1.status, GroupStatus::Failed);
        assert!(g1.command("A").unwrap().done);
        assert!(g1.command("C").unwrap().done);

        let b = g1.command("B").unwrap();
        assert!(!b.done);
        assert_eq!(b.error.as_ref().unwrap().exit_code, Some(1));

        assert_eq!(err.group("G2").unwrap().status, GroupStatus::NotStarted);
        assert!(!runner.calls().contains(&"D".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_policy_aborts_siblings() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .fail("fast-fail", 2)
                .delay("slow", Duration::from_secs(10)),
        );
        let script = Script::Groups(vec![group("G", &["slow", "fast-fail"])]);

        let err = tokio::time::timeout(
            Duration::from_secs(3),
            executor(runner, GroupFailurePolicy::CancelOnFirstFailure)
                .run_groups(&script, Path::new(".")),
        )
        .await
        .expect("cancelled sibling should not be awaited")
        .unwrap_err();

        let g = err.group("G").unwrap();
        let slow = g.command("slow").unwrap();
        assert_eq!(slow.error.as_ref().unwrap().reason, FailureReason::Cancelled);
        assert_eq!(
            g.command("fast-fail").unwrap().error.as_ref().unwrap().exit_code,
            Some(2)
        );
    }

    #[tokio::test]
    async fn test_single_command_script() {
        let runner = Arc::new(ScriptedRunner::new().fail("make", 2));
        let script = Script::Single(Command::shell("make"));

        let err = executor(runner, GroupFailurePolicy::default())
            .run_groups(&script, Path::new("."))
            .await
            .unwrap_err();

        assert_eq!(err.groups.len(), 1);
        assert_eq!(err.first_failure().unwrap().exit_code, Some(2));
    }
}
