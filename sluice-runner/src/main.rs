//! Sluice Runner
//!
//! Watches a git branch and deploys every new commit.
//!
//! Architecture:
//! - Configuration: JSON file, environment overlay and `SLUICE_*` variables
//! - Repositories: change detection over the git checkout
//! - Services: process execution, task groups, the stage pipeline and
//!   report delivery
//! - Scheduler: the change gate, which polls and serializes deployments
//!
//! Each deployment runs Build, Test, Deploy, PostDeploy, Restart and
//! optional post tasks, then posts a report to the configured webhook.
//! SIGUSR1 requests a deployment outside the poll schedule.

mod config;
mod repository;
mod scheduler;
mod service;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use sluice_client::{Notifier, WebhookNotifier};
use sluice_core::report::ReportFormatter;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::repository::{Detector, GitDetector, check_git_available};
use crate::scheduler::{ChangeGate, GateConfig, forward_ctrl_c, tally_runs};
use crate::service::{
    DeploymentService, PipelineRunner, ProcessRunner, StandardDeploymentService,
    SystemProcessRunner,
};

#[derive(Parser, Debug)]
#[command(name = "sluice-runner", version, about = "Continuous deployment runner")]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "SLUICE_CONFIG", default_value = "sluice.json")]
    config: PathBuf,

    /// Environment overlay to merge (reads `<stem>.<env>.json`)
    #[arg(short, long, env = "SLUICE_ENV")]
    env: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sluice_runner=info,sluice_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Sluice Runner");

    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args.config, args.env.as_deref())
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    info!(
        "Loaded configuration: watching {}/{} in {}, deploying to {}",
        config.remote,
        config.branch,
        config.path.display(),
        config.deploy_path.display()
    );
    let config = Arc::new(config);

    check_git_available()?;

    // Initialize services
    let runner: Arc<dyn ProcessRunner> = Arc::new(
        SystemProcessRunner::new(config.output_tail_chunks).with_timeout(config.command_timeout),
    );
    let detector: Arc<dyn Detector> =
        Arc::new(GitDetector::from_config(Arc::clone(&runner), &config));
    let notifier = build_notifier(&config)?;

    let pipeline = PipelineRunner::new(Arc::clone(&config), runner, Arc::clone(&detector));
    let deployer: Arc<dyn DeploymentService> = Arc::new(StandardDeploymentService::new(
        pipeline,
        ReportFormatter::new(config.report_settings()),
        notifier,
    ));

    info!("Services initialized");

    let (gate, handle) = ChangeGate::new(GateConfig::from(config.as_ref()), detector, deployer);

    let tally = tokio::spawn(tally_runs(handle.subscribe()));

    forward_ctrl_c(handle.clone());
    #[cfg(unix)]
    scheduler::forward_manual_triggers(handle.clone())
        .context("Failed to listen for SIGUSR1")?;

    info!("Runner initialized successfully");
    info!(
        "Poll interval: {:?}, debug mode: {}",
        config.poll_interval, config.is_debug
    );

    if let Err(e) = gate.run().await {
        error!("Change gate error: {}", e);
        return Err(e);
    }

    drop(handle);

    match tally.await {
        Ok(tally) => info!(
            "Processed {} deployment(s): {} succeeded, {} failed, {} aborted",
            tally.total(),
            tally.succeeded,
            tally.failed,
            tally.aborted
        ),
        Err(e) => warn!("Run tally task failed: {}", e),
    }

    Ok(())
}

/// Builds the webhook notifier, if notifications are configured
fn build_notifier(config: &Config) -> Result<Option<Arc<dyn Notifier>>> {
    let Some(notification) = &config.notification else {
        info!("No notification configured, reports will only be logged");
        return Ok(None);
    };

    let notifier = WebhookNotifier::new(&notification.url, &notification.hook_path)
        .context("Invalid notification settings")?;
    info!("Reports will be posted to {}", notification.url);

    Ok(Some(Arc::new(notifier)))
}
