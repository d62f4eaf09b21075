//! Service layer
//!
//! Services contain the business logic of the runner: running processes,
//! executing task groups, driving the stage pipeline and delivering the
//! resulting report.
//!
//! Services with more than one implementation are trait-based to enable
//! testing and dependency injection.

mod commit_tag;
mod deployment;
mod output_tail;
mod pipeline;
mod process;
mod task_groups;

// Re-export traits
pub use deployment::DeploymentService;
pub use process::ProcessRunner;

// Re-export implementations
pub use deployment::StandardDeploymentService;
pub use process::SystemProcessRunner;

pub use deployment::{Trigger, TriggerReason};
pub use pipeline::PipelineRunner;
pub use task_groups::GroupFailurePolicy;

#[cfg(test)]
pub use process::ProcessOutput;
