//! Pipeline run domain types
//!
//! A [`PipelineRun`] is an immutable value: every stage boundary consumes
//! the previous value and returns a new one, so no state is shared across
//! the asynchronous steps that build it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::branch::BranchInfo;
use crate::domain::stage::{PipelineState, Stage, StageResult};
use crate::error::PipelineError;

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Pending,
    Succeeded,
    Failed,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Pending => write!(f, "pending"),
            RunOutcome::Succeeded => write!(f, "succeeded"),
            RunOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// The stage that stopped a run and what it failed with
#[derive(Debug, Clone)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: PipelineError,
}

/// How a stage appears in the report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMark {
    Completed,
    Failed,
    /// Not configured, deliberately not run
    Skipped,
    /// Never attempted because an earlier stage failed
    Blocked,
    /// Run still in progress
    Pending,
}

/// One execution of the pipeline for one commit
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub id: Uuid,
    pub branch: BranchInfo,
    /// Stages declared for this run, in execution order
    pub stages: Vec<Stage>,
    pub state: PipelineState,
    pub stage_results: Vec<StageResult>,
    pub outcome: RunOutcome,
    pub failure: Option<StageFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Creates an idle run for the given commit
    pub fn start(branch: BranchInfo, stages: Vec<Stage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            branch,
            stages,
            state: PipelineState::Idle,
            stage_results: Vec::new(),
            outcome: RunOutcome::Pending,
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// The stage that must run next, if any
    pub fn next_stage(&self) -> Option<Stage> {
        if self.outcome != RunOutcome::Pending {
            return None;
        }
        self.stages.get(self.stage_results.len()).copied()
    }

    /// Moves the state machine into `stage`
    pub fn enter(self, stage: Stage) -> Self {
        debug_assert_eq!(self.next_stage(), Some(stage), "stages must run in order");
        Self {
            state: stage.state(),
            ..self
        }
    }

    /// Records a successful (or skipped) stage
    pub fn record(self, result: StageResult) -> Self {
        debug_assert!(result.success, "failed stages go through fail()");
        debug_assert_eq!(self.next_stage(), Some(result.stage));

        let mut stage_results = self.stage_results;
        stage_results.push(result);
        Self {
            stage_results,
            ..self
        }
    }

    /// Records the failing stage and terminates the run
    pub fn fail(self, result: StageResult, error: PipelineError) -> Self {
        debug_assert_eq!(self.next_stage(), Some(result.stage));

        let stage = result.stage;
        let mut stage_results = self.stage_results;
        stage_results.push(result);
        Self {
            state: PipelineState::Failed,
            stage_results,
            outcome: RunOutcome::Failed,
            failure: Some(StageFailure { stage, error }),
            finished_at: Some(Utc::now()),
            ..self
        }
    }

    /// Terminates the run successfully
    pub fn succeed(self) -> Self {
        debug_assert_eq!(self.next_stage(), None);
        Self {
            state: PipelineState::Succeeded,
            outcome: RunOutcome::Succeeded,
            finished_at: Some(Utc::now()),
            ..self
        }
    }

    pub fn result_for(&self, stage: Stage) -> Option<&StageResult> {
        self.stage_results.iter().find(|r| r.stage == stage)
    }

    /// Marker for a declared stage
    pub fn mark(&self, stage: Stage) -> StageMark {
        match self.result_for(stage) {
            Some(result) if result.skipped => StageMark::Skipped,
            Some(result) if result.success => StageMark::Completed,
            Some(_) => StageMark::Failed,
            None if self.outcome == RunOutcome::Failed => StageMark::Blocked,
            None => StageMark::Pending,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    /// Wall time of a finished run
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stage::GroupSummary;

    fn stages() -> Vec<Stage> {
        vec![Stage::Build, Stage::Test, Stage::Deploy]
    }

    #[test]
    fn test_successful_run() {
        let mut run = PipelineRun::start(BranchInfo::new("master", "abc1234"), stages());
        assert_eq!(run.state, PipelineState::Idle);

        while let Some(stage) = run.next_stage() {
            run = run.enter(stage);
            assert_eq!(run.state, stage.state());
            run = run.record(StageResult::completed(stage, vec![GroupSummary::done("g")]));
        }
        let run = run.succeed();

        assert_eq!(run.state, PipelineState::Succeeded);
        assert!(run.is_success());
        assert!(run.finished_at.is_some());
        assert!(stages().iter().all(|s| run.mark(*s) == StageMark::Completed));
    }

    #[test]
    fn test_failure_blocks_later_stages() {
        let run = PipelineRun::start(BranchInfo::new("master", "abc1234"), stages())
            .enter(Stage::Build)
            .record(StageResult::completed(Stage::Build, vec![]))
            .enter(Stage::Test);
        let run = run.fail(
            StageResult::failed(Stage::Test, vec![]),
            PipelineError::Unexpected("boom".to_string()),
        );

        assert_eq!(run.state, PipelineState::Failed);
        assert_eq!(run.outcome, RunOutcome::Failed);
        assert_eq!(run.failure.as_ref().unwrap().stage, Stage::Test);
        assert_eq!(run.stage_results.len(), 2);
        assert!(run.result_for(Stage::Deploy).is_none());
        assert_eq!(run.next_stage(), None);

        assert_eq!(run.mark(Stage::Build), StageMark::Completed);
        assert_eq!(run.mark(Stage::Test), StageMark::Failed);
        assert_eq!(run.mark(Stage::Deploy), StageMark::Blocked);
    }

    #[test]
    fn test_skipped_and_pending_marks() {
        let run = PipelineRun::start(BranchInfo::unknown(), stages())
            .enter(Stage::Build)
            .record(StageResult::skipped(Stage::Build));

        assert_eq!(run.mark(Stage::Build), StageMark::Skipped);
        assert_eq!(run.mark(Stage::Test), StageMark::Pending);
        assert_eq!(run.next_stage(), Some(Stage::Test));
    }
}
