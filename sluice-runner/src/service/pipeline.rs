//! Pipeline execution
//!
//! Drives one deployment through its stages:
//! - Build and Test run their scripts in the build directory
//! - Deploy synchronizes the build directory into the deploy directory
//! - PostDeploy stamps the commit hash into deployed files
//! - Restart restarts the deployed service
//! - PostTasks (only when configured) run in the deploy directory
//!
//! Stages run strictly in that order. The first failing stage ends the run;
//! later stages are never attempted. Stages without configuration are
//! recorded as skipped.

use sluice_core::domain::branch::BranchInfo;
use sluice_core::domain::run::PipelineRun;
use sluice_core::domain::script::{Command, Script};
use sluice_core::domain::stage::{GroupSummary, Stage, StageResult};
use sluice_core::error::{PipelineError, ProcessError};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::commit_tag::substitute_commit_tag;
use super::process::ProcessRunner;
use super::task_groups::TaskGroupExecutor;
use crate::config::Config;
use crate::repository::Detector;

type StageOutcome = Result<StageResult, (StageResult, PipelineError)>;

/// Runs the configured stages for one commit
#[derive(Clone)]
pub struct PipelineRunner {
    config: Arc<Config>,
    runner: Arc<dyn ProcessRunner>,
    detector: Arc<dyn Detector>,
    executor: TaskGroupExecutor,
}

impl PipelineRunner {
    /// Creates a new pipeline runner
    ///
    /// # Arguments
    /// * `config` - Scripts, directories and commit tag
    /// * `runner` - Runs single commands (sync, restart)
    /// * `detector` - Source of the commit metadata captured at run start
    pub fn new(
        config: Arc<Config>,
        runner: Arc<dyn ProcessRunner>,
        detector: Arc<dyn Detector>,
    ) -> Self {
        let executor = TaskGroupExecutor::new(Arc::clone(&runner), config.group_failure_policy);
        Self {
            config,
            runner,
            detector,
            executor,
        }
    }

    /// Stages this pipeline will go through, in order
    pub fn declared_stages(&self) -> Vec<Stage> {
        let mut stages = vec![
            Stage::Build,
            Stage::Test,
            Stage::Deploy,
            Stage::PostDeploy,
            Stage::Restart,
        ];
        if self.config.post_tasks.is_some() {
            stages.push(Stage::PostTasks);
        }
        stages
    }

    /// Runs every declared stage until one fails
    ///
    /// # Arguments
    /// * `fallback` - Branch reported by the trigger, used when the
    ///   detector cannot describe the checkout
    ///
    /// # Returns
    /// The finished run; it is always in a terminal state
    pub async fn execute(&self, fallback: Option<&BranchInfo>) -> PipelineRun {
        let branch = self.capture_branch(fallback).await;
        let mut run = PipelineRun::start(branch, self.declared_stages());
        info!("Starting run {} for {}", run.id, run.branch.label);

        while let Some(stage) = run.next_stage() {
            run = run.enter(stage);
            info!("Stage {}: {}", run.stage_results.len() + 1, stage);

            let outcome = self.guarded_stage(stage, &run.branch).await;
            run = match outcome {
                Ok(result) => {
                    if result.skipped {
                        info!("Stage {} skipped (not configured)", stage);
                    } else {
                        info!("Stage {} completed", stage);
                    }
                    run.record(result)
                }
                Err((result, err)) => {
                    error!("Stage {} failed: {}", stage, err);
                    run.fail(result, err)
                }
            };
        }

        if !run.state.is_terminal() {
            run = run.succeed();
        }

        info!("Run {} finished: {}", run.id, run.outcome);
        run
    }

    /// Captures the commit being deployed, once per run
    async fn capture_branch(&self, fallback: Option<&BranchInfo>) -> BranchInfo {
        match self.detector.branch_info().await {
            Ok(branch) => branch,
            Err(e) => {
                warn!("Failed to read branch metadata: {}", e);
                fallback.cloned().unwrap_or_else(BranchInfo::unknown)
            }
        }
    }

    /// Runs one stage in its own task; a panic fails the stage with an
    /// unexpected error instead of tearing down the run
    async fn guarded_stage(&self, stage: Stage, branch: &BranchInfo) -> StageOutcome {
        let this = self.clone();
        let branch = branch.clone();
        let task = tokio::spawn(async move { this.execute_stage(stage, &branch).await });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = PipelineError::Unexpected(format!("stage {} aborted: {}", stage, e));
                Err((StageResult::failed(stage, vec![summary(stage.title(), &err)]), err))
            }
        }
    }

    async fn execute_stage(&self, stage: Stage, branch: &BranchInfo) -> StageOutcome {
        let config = &self.config;
        match stage {
            Stage::Build => {
                self.run_script(stage, config.build_script.as_ref(), config.build_dir())
                    .await
            }
            Stage::Test => {
                self.run_script(stage, config.test_script.as_ref(), config.build_dir())
                    .await
            }
            Stage::Deploy => {
                let sync = config.sync_command.with_args([
                    dir_arg(config.build_dir()),
                    dir_arg(&config.deploy_path),
                ]);
                self.run_command(stage, Some(&sync), config.build_dir()).await
            }
            Stage::PostDeploy => self.tag_commit(branch).await,
            Stage::Restart => {
                self.run_command(stage, config.restart_script.as_ref(), &config.deploy_path)
                    .await
            }
            Stage::PostTasks => {
                self.run_script(stage, config.post_tasks.as_ref(), &config.deploy_path)
                    .await
            }
        }
    }

    async fn run_script(
        &self,
        stage: Stage,
        script: Option<&Script>,
        working_dir: &Path,
    ) -> StageOutcome {
        let Some(script) = script else {
            return Ok(StageResult::skipped(stage));
        };

        match self.executor.run_groups(script, working_dir).await {
            Ok(results) => {
                debug!("{} command(s) succeeded in {}", results.len(), stage);
                let summaries = script
                    .task_groups()
                    .into_iter()
                    .map(|group| GroupSummary::done(group.name))
                    .collect();
                Ok(StageResult::completed(stage, summaries))
            }
            Err(err) => {
                let summaries = err.groups.iter().map(|group| group.summary()).collect();
                Err((StageResult::failed(stage, summaries), err.into()))
            }
        }
    }

    async fn run_command(
        &self,
        stage: Stage,
        command: Option<&Command>,
        working_dir: &Path,
    ) -> StageOutcome {
        let Some(command) = command else {
            return Ok(StageResult::skipped(stage));
        };

        match self.runner.run(command, Some(working_dir)).await {
            Ok(_) => Ok(StageResult::completed(
                stage,
                vec![GroupSummary::done(command.to_string())],
            )),
            Err(err) => Err((
                StageResult::failed(stage, vec![failed_summary(&err)]),
                err.into(),
            )),
        }
    }

    async fn tag_commit(&self, branch: &BranchInfo) -> StageOutcome {
        let stage = Stage::PostDeploy;
        let Some(marker) = self.config.commit_tag.clone() else {
            return Ok(StageResult::skipped(stage));
        };

        let summary_name = format!("Replace {}", marker);
        if branch.commit_hash.is_empty() {
            let err = PipelineError::Unexpected(
                "no commit hash was captured for this run".to_string(),
            );
            return Err((StageResult::failed(stage, vec![summary(&summary_name, &err)]), err));
        }

        let root = self.config.deploy_path.clone();
        let hash = branch.commit_hash.clone();
        let outcome =
            tokio::task::spawn_blocking(move || substitute_commit_tag(&root, &marker, &hash)).await;

        let err = match outcome {
            Ok(Ok(updated)) => {
                info!("Commit tag replaced in {} file(s)", updated);
                return Ok(StageResult::completed(
                    stage,
                    vec![GroupSummary::done(summary_name)],
                ));
            }
            Ok(Err(e)) => PipelineError::Unexpected(format!("commit tag substitution failed: {}", e)),
            Err(e) => PipelineError::Unexpected(format!("commit tag task failed: {}", e)),
        };

        Err((StageResult::failed(stage, vec![summary(&summary_name, &err)]), err))
    }
}

/// Directory argument for the sync command; the trailing slash makes the
/// contents (not the directory itself) the subject of the copy
fn dir_arg(path: &Path) -> String {
    let path = path.to_string_lossy();
    format!("{}/", path.trim_end_matches('/'))
}

fn failed_summary(err: &ProcessError) -> GroupSummary {
    GroupSummary {
        name: err.command.clone(),
        done: false,
        error: Some(err.reason.to_string()),
    }
}

fn summary(name: &str, err: &PipelineError) -> GroupSummary {
    GroupSummary {
        name: name.to_string(),
        done: false,
        error: Some(err.to_string()),
    }
}
