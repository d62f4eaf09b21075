//! Deployment service
//!
//! One deployment = run the pipeline, format the report, deliver it.
//! Delivery failures are logged and never change the outcome of the run.

use async_trait::async_trait;
use sluice_client::{ClientError, Notifier};
use sluice_core::domain::branch::BranchInfo;
use sluice_core::domain::run::{PipelineRun, RunOutcome};
use sluice_core::report::ReportFormatter;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::pipeline::PipelineRunner;

/// Why a deployment was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    /// The detector reported a new commit
    Changed,
    /// Debug mode runs on every tick
    Debug,
    /// Requested from outside the poll loop
    Manual,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerReason::Changed => write!(f, "change detected"),
            TriggerReason::Debug => write!(f, "debug mode"),
            TriggerReason::Manual => write!(f, "manual trigger"),
        }
    }
}

/// Request to deploy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub reason: TriggerReason,
    /// Branch known when the trigger fired, if any
    pub branch: Option<BranchInfo>,
}

impl Trigger {
    pub fn new(reason: TriggerReason, branch: Option<BranchInfo>) -> Self {
        Self { reason, branch }
    }

    pub fn manual() -> Self {
        Self::new(TriggerReason::Manual, None)
    }
}

/// Service trait for running one deployment end to end
#[async_trait]
pub trait DeploymentService: Send + Sync {
    /// Runs the pipeline and reports its result
    ///
    /// # Arguments
    /// * `trigger` - What started this deployment
    ///
    /// # Returns
    /// The outcome of the pipeline run
    async fn deploy(&self, trigger: Trigger) -> RunOutcome;
}

/// Standard implementation of DeploymentService
pub struct StandardDeploymentService {
    pipeline: PipelineRunner,
    formatter: ReportFormatter,
    notifier: Option<Arc<dyn Notifier>>,
}

impl StandardDeploymentService {
    /// Creates a new deployment service
    ///
    /// # Arguments
    /// * `pipeline` - Runs the stages
    /// * `formatter` - Turns finished runs into webhook payloads
    /// * `notifier` - Delivers the payloads; reports are only logged when None
    pub fn new(
        pipeline: PipelineRunner,
        formatter: ReportFormatter,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        Self {
            pipeline,
            formatter,
            notifier,
        }
    }

    async fn report(&self, run: &PipelineRun) {
        let payload = self.formatter.format(run);

        let Some(notifier) = &self.notifier else {
            info!("Report for run {}: {}", run.id, payload.text);
            for attachment in &payload.attachments {
                info!("{}\n{}", attachment.title, attachment.text);
            }
            return;
        };

        match notifier.send(&payload).await {
            Ok(()) => info!("Report for run {} delivered", run.id),
            Err(e) if e.is_client_error() => error!(
                "Report for run {} {}, check the notification settings: {}",
                run.id,
                delivery_failure(&e),
                e
            ),
            Err(e) => warn!(
                "Report for run {} {}: {}",
                run.id,
                delivery_failure(&e),
                e
            ),
        }
    }
}

/// Short description of why a report was not delivered
///
/// A 4xx answer will repeat for every run until the settings change; a 5xx
/// or a network failure may clear up by the next run.
fn delivery_failure(err: &ClientError) -> &'static str {
    if err.is_client_error() {
        "rejected by the webhook"
    } else if err.is_server_error() {
        "not accepted, webhook unavailable"
    } else {
        "not delivered"
    }
}

#[async_trait]
impl DeploymentService for StandardDeploymentService {
    async fn deploy(&self, trigger: Trigger) -> RunOutcome {
        info!("Deploying ({})", trigger.reason);

        let run = self.pipeline.execute(trigger.branch.as_ref()).await;
        self.report(&run).await;

        run.outcome
    }
}
