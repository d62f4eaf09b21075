//! Stage domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::script::Command;

/// One step of the deployment pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Build,
    Test,
    Deploy,
    PostDeploy,
    Restart,
    PostTasks,
}

impl Stage {
    /// Every stage in its fixed order
    pub const ORDER: [Stage; 6] = [
        Stage::Build,
        Stage::Test,
        Stage::Deploy,
        Stage::PostDeploy,
        Stage::Restart,
        Stage::PostTasks,
    ];

    /// Pipeline state while this stage is running
    pub fn state(self) -> PipelineState {
        match self {
            Stage::Build => PipelineState::Building,
            Stage::Test => PipelineState::Testing,
            Stage::Deploy => PipelineState::Deploying,
            Stage::PostDeploy => PipelineState::PostDeploying,
            Stage::Restart => PipelineState::Restarting,
            Stage::PostTasks => PipelineState::PostTasks,
        }
    }

    /// Human readable name used in reports
    pub fn title(self) -> &'static str {
        match self {
            Stage::Build => "Build",
            Stage::Test => "Test",
            Stage::Deploy => "Deploy",
            Stage::PostDeploy => "Post-deploy",
            Stage::Restart => "Restart",
            Stage::PostTasks => "Post tasks",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// State machine of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    Building,
    Testing,
    Deploying,
    PostDeploying,
    Restarting,
    PostTasks,
    Succeeded,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Succeeded | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "Idle"),
            PipelineState::Building => write!(f, "Building"),
            PipelineState::Testing => write!(f, "Testing"),
            PipelineState::Deploying => write!(f, "Deploying"),
            PipelineState::PostDeploying => write!(f, "PostDeploying"),
            PipelineState::Restarting => write!(f, "Restarting"),
            PipelineState::PostTasks => write!(f, "PostTasks"),
            PipelineState::Succeeded => write!(f, "Succeeded"),
            PipelineState::Failed => write!(f, "Failed"),
        }
    }
}

/// Output of one successful command
///
/// Folded into a [`StageResult`] and discarded once the stage finishes.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub command: Command,
    pub stdout: String,
    pub stderr: String,
    /// Last output chunks, bounded regardless of total output
    pub tail: Vec<String>,
    pub success: bool,
}

/// Completion marker of one task group inside a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub name: String,
    pub done: bool,
    pub error: Option<String>,
}

impl GroupSummary {
    pub fn done(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: true,
            error: None,
        }
    }
}

/// Result of one executed (or deliberately skipped) stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub task_results: Vec<GroupSummary>,
    pub success: bool,
    /// Stage was not configured and did not run
    pub skipped: bool,
    pub finished_at: DateTime<Utc>,
}

impl StageResult {
    pub fn completed(stage: Stage, task_results: Vec<GroupSummary>) -> Self {
        Self {
            stage,
            task_results,
            success: true,
            skipped: false,
            finished_at: Utc::now(),
        }
    }

    pub fn skipped(stage: Stage) -> Self {
        Self {
            stage,
            task_results: Vec::new(),
            success: true,
            skipped: true,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(stage: Stage, task_results: Vec<GroupSummary>) -> Self {
        Self {
            stage,
            task_results,
            success: false,
            skipped: false,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_maps_to_states() {
        let states: Vec<_> = Stage::ORDER.iter().map(|s| s.state()).collect();
        assert_eq!(
            states,
            [
                PipelineState::Building,
                PipelineState::Testing,
                PipelineState::Deploying,
                PipelineState::PostDeploying,
                PipelineState::Restarting,
                PipelineState::PostTasks,
            ]
        );
        assert!(states.iter().all(|s| !s.is_terminal()));
    }

    #[test]
    fn test_skipped_stage_counts_as_success() {
        let result = StageResult::skipped(Stage::Restart);
        assert!(result.success);
        assert!(result.skipped);
        assert!(result.task_results.is_empty());
    }
}
