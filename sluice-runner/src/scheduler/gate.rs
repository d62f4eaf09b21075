//! Change gate
//!
//! Polls the detector and starts deployments, at most one at a time.
//!
//! A single loop owns all scheduling state:
//! - the busy flag is a one-permit semaphore; the permit is moved into the
//!   task running the deployment and released when that task ends, however
//!   it ends
//! - ticks while busy are no-ops
//! - triggers arriving while busy overwrite a single pending slot, so any
//!   number of them collapse into one follow-up run with the latest branch
//! - failed change checks are retried with a fixed delay, then abandoned
//!   until the next tick

use anyhow::Result;
use sluice_core::domain::branch::BranchInfo;
use sluice_core::domain::run::RunOutcome;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast, mpsc};
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{Config, RetryConfig};
use crate::repository::{Detection, Detector};
use crate::service::{DeploymentService, Trigger, TriggerReason};

/// Events buffered per subscriber before the slowest one starts lagging
const EVENT_CAPACITY: usize = 256;

/// Gate settings
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub poll_interval: Duration,
    /// Deploy on every tick without consulting the detector
    pub always_run: bool,
    pub retry: RetryConfig,
}

impl From<&Config> for GateConfig {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            always_run: config.is_debug,
            retry: config.detector_retry.clone(),
        }
    }
}

/// Observable gate activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    /// A change check answered
    Checked { changed: bool },
    /// A change check failed; another attempt may follow
    DetectionFailed { attempt: u32, error: String },
    /// Every attempt of this tick failed
    DetectionAbandoned { attempts: u32 },
    /// A deployment started
    Triggered {
        reason: TriggerReason,
        branch: Option<BranchInfo>,
    },
    /// A tick arrived while a deployment was running
    SkippedBusy,
    /// A trigger arrived while busy and replaced the pending one
    Coalesced { branch: Option<BranchInfo> },
    /// A deployment ended; None when the deployment task panicked
    RunFinished { outcome: Option<RunOutcome> },
    /// The gate loop exited; no events follow
    Stopped,
}

enum GateCommand {
    Trigger(Trigger),
    Shutdown,
}

/// Cloneable handle for talking to a running gate
#[derive(Clone)]
pub struct GateHandle {
    commands: mpsc::UnboundedSender<GateCommand>,
    events: broadcast::Sender<GateEvent>,
    busy: Arc<Semaphore>,
}

impl GateHandle {
    /// Requests a deployment outside the poll schedule
    ///
    /// Starts immediately when idle; while busy it becomes the pending
    /// follow-up run, replacing any earlier pending trigger.
    pub fn trigger(&self, trigger: Trigger) -> Result<()> {
        self.commands
            .send(GateCommand::Trigger(trigger))
            .map_err(|_| anyhow::anyhow!("change gate is not running"))
    }

    /// Stops polling; the gate exits once the running deployment ends
    pub fn shutdown(&self) {
        let _ = self.commands.send(GateCommand::Shutdown);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GateEvent> {
        self.events.subscribe()
    }

    /// Whether a deployment is running right now
    pub fn is_busy(&self) -> bool {
        self.busy.available_permits() == 0
    }
}

/// Poll scheduler serializing deployments
pub struct ChangeGate {
    config: GateConfig,
    detector: Arc<dyn Detector>,
    deployer: Arc<dyn DeploymentService>,
    busy: Arc<Semaphore>,
    events: broadcast::Sender<GateEvent>,
    commands: mpsc::UnboundedReceiver<GateCommand>,
    pending: Option<Trigger>,
    in_flight: usize,
}

impl ChangeGate {
    /// Creates a new gate and its handle
    ///
    /// # Arguments
    /// * `config` - Poll interval, debug mode and detector retry policy
    /// * `detector` - Answers whether the watched branch changed
    /// * `deployer` - Runs one deployment
    pub fn new(
        config: GateConfig,
        detector: Arc<dyn Detector>,
        deployer: Arc<dyn DeploymentService>,
    ) -> (Self, GateHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let busy = Arc::new(Semaphore::new(1));

        let handle = GateHandle {
            commands: command_tx,
            events: events.clone(),
            busy: Arc::clone(&busy),
        };

        let gate = Self {
            config,
            detector,
            deployer,
            busy,
            events,
            commands: command_rx,
            pending: None,
            in_flight: 0,
        };

        (gate, handle)
    }

    /// Runs the gate until shutdown is requested and the running
    /// deployment (if any) has finished
    ///
    /// The first tick fires immediately.
    pub async fn run(mut self) -> Result<()> {
        info!(
            "Starting change gate (interval: {:?}, always run: {})",
            self.config.poll_interval, self.config.always_run
        );

        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let mut ticker = time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stopping = false;

        loop {
            tokio::select! {
                _ = ticker.tick(), if !stopping => self.on_tick(&done_tx).await,
                command = self.commands.recv(), if !stopping => match command {
                    Some(GateCommand::Trigger(trigger)) => self.on_trigger(trigger, &done_tx),
                    Some(GateCommand::Shutdown) | None => {
                        info!("Shutting down change gate");
                        stopping = true;
                    }
                },
                Some(outcome) = done_rx.recv() => self.on_finished(outcome, stopping, &done_tx),
            }

            if stopping && self.in_flight == 0 {
                break;
            }
        }

        info!("Change gate stopped");
        self.emit(GateEvent::Stopped);
        Ok(())
    }

    async fn on_tick(&mut self, done: &mpsc::UnboundedSender<Option<RunOutcome>>) {
        if self.is_busy() {
            debug!("Deployment in progress, skipping tick");
            self.emit(GateEvent::SkippedBusy);
            return;
        }

        if let Some(trigger) = self.pending.take() {
            self.start(trigger, done);
            return;
        }

        if self.config.always_run {
            self.start(Trigger::new(TriggerReason::Debug, None), done);
            return;
        }

        if let Some(detection) = self.detect().await {
            if detection.changed {
                self.start(Trigger::new(TriggerReason::Changed, detection.branch), done);
            }
        }
    }

    fn on_trigger(&mut self, trigger: Trigger, done: &mpsc::UnboundedSender<Option<RunOutcome>>) {
        if !self.is_busy() {
            self.start(trigger, done);
            return;
        }

        if self.pending.is_some() {
            debug!("Replacing pending trigger");
        }
        info!("Deployment in progress, trigger ({}) deferred", trigger.reason);
        self.emit(GateEvent::Coalesced {
            branch: trigger.branch.clone(),
        });
        self.pending = Some(trigger);
    }

    fn on_finished(
        &mut self,
        outcome: Option<RunOutcome>,
        stopping: bool,
        done: &mpsc::UnboundedSender<Option<RunOutcome>>,
    ) {
        self.in_flight -= 1;
        match outcome {
            Some(outcome) => info!("Deployment finished: {}", outcome),
            None => error!("Deployment ended without an outcome"),
        }
        self.emit(GateEvent::RunFinished { outcome });

        let Some(trigger) = self.pending.take() else {
            return;
        };

        if stopping {
            info!("Dropping pending trigger ({}) on shutdown", trigger.reason);
        } else {
            info!("Starting deferred deployment ({})", trigger.reason);
            self.start(trigger, done);
        }
    }

    /// Asks the detector, retrying failures with a fixed delay
    ///
    /// Each attempt is bounded by the retry timeout; a check that runs over
    /// is dropped (killing its git process) and counts as a failure.
    async fn detect(&self) -> Option<Detection> {
        let retry = &self.config.retry;
        let attempts = retry.max_attempts.max(1);

        for attempt in 1..=attempts {
            let error = match time::timeout(retry.timeout, self.detector.check()).await {
                Ok(Ok(detection)) => {
                    debug!("Change check: changed={}", detection.changed);
                    self.emit(GateEvent::Checked {
                        changed: detection.changed,
                    });
                    return Some(detection);
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("change check timed out after {:?}", retry.timeout),
            };

            warn!(
                "Change check failed (attempt {}/{}): {}",
                attempt, attempts, error
            );
            self.emit(GateEvent::DetectionFailed { attempt, error });
            if attempt < attempts {
                time::sleep(retry.delay).await;
            }
        }

        error!(
            "Change check failed {} time(s), waiting for the next tick",
            attempts
        );
        self.emit(GateEvent::DetectionAbandoned { attempts });
        None
    }

    fn start(&mut self, trigger: Trigger, done: &mpsc::UnboundedSender<Option<RunOutcome>>) {
        let permit = match Arc::clone(&self.busy).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!("Deployment already running, keeping trigger pending");
                self.pending = Some(trigger);
                return;
            }
        };

        info!("Starting deployment ({})", trigger.reason);
        self.emit(GateEvent::Triggered {
            reason: trigger.reason,
            branch: trigger.branch.clone(),
        });
        self.in_flight += 1;

        let deployer = Arc::clone(&self.deployer);
        let done = done.clone();
        tokio::spawn(async move {
            let outcome = Self::supervise(deployer, trigger, permit).await;
            let _ = done.send(outcome);
        });
    }

    /// Runs one deployment in its own task so a panic cannot escape
    async fn supervise(
        deployer: Arc<dyn DeploymentService>,
        trigger: Trigger,
        _permit: OwnedSemaphorePermit,
    ) -> Option<RunOutcome> {
        let deployment = tokio::spawn(async move { deployer.deploy(trigger).await });

        match deployment.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Deployment task failed: {}", e);
                None
            }
        }
        // Permit is automatically released when dropped
    }

    fn is_busy(&self) -> bool {
        self.busy.available_permits() == 0
    }

    fn emit(&self, event: GateEvent) {
        let _ = self.events.send(event);
    }
}
