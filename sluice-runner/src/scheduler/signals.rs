//! Process signals driving the change gate
//!
//! - Ctrl-C asks the gate to shut down once the running deployment ends
//! - SIGUSR1 (unix only) requests a deployment without waiting for a
//!   change, e.g. `kill -USR1 $(pidof sluice-runner)`

use tracing::{info, warn};

use super::gate::GateHandle;

/// Shuts the gate down on Ctrl-C
pub fn forward_ctrl_c(handle: GateHandle) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, finishing current deployment before exit");
                handle.shutdown();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}

/// Turns every SIGUSR1 into a manual deployment trigger
///
/// The listener is registered before this returns, so signals sent right
/// after the call are not lost. The forwarding task ends once the gate
/// stops accepting triggers.
#[cfg(unix)]
pub fn forward_manual_triggers(handle: GateHandle) -> std::io::Result<()> {
    use crate::service::Trigger;
    use tokio::signal::unix::{SignalKind, signal};

    let mut signals = signal(SignalKind::user_defined1())?;
    tokio::spawn(async move {
        while signals.recv().await.is_some() {
            if handle.is_busy() {
                info!("Received SIGUSR1, deployment queued after the running one");
            } else {
                info!("Received SIGUSR1, requesting deployment");
            }

            if let Err(e) = handle.trigger(Trigger::manual()) {
                warn!("Dropping SIGUSR1 trigger: {}", e);
                break;
            }
        }
    });

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::scheduler::gate::{ChangeGate, GateConfig, GateEvent};
    use crate::service::{DeploymentService, Trigger, TriggerReason};
    use crate::testing::FakeDetector;
    use async_trait::async_trait;
    use sluice_core::domain::run::RunOutcome;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast::error::RecvError;

    #[derive(Default)]
    struct CountingDeployer {
        manual: AtomicUsize,
    }

    #[async_trait]
    impl DeploymentService for CountingDeployer {
        async fn deploy(&self, trigger: Trigger) -> RunOutcome {
            if trigger.reason == TriggerReason::Manual {
                self.manual.fetch_add(1, Ordering::SeqCst);
            }
            RunOutcome::Succeeded
        }
    }

    #[tokio::test]
    async fn test_sigusr1_triggers_manual_deployment() {
        let deployer = Arc::new(CountingDeployer::default());
        let config = GateConfig {
            poll_interval: Duration::from_secs(3600),
            always_run: false,
            retry: RetryConfig::default(),
        };
        let (gate, handle) =
            ChangeGate::new(config, Arc::new(FakeDetector::new(None)), deployer.clone());
        let mut events = handle.subscribe();
        let task = tokio::spawn(gate.run());

        forward_manual_triggers(handle.clone()).unwrap();
        let status = std::process::Command::new("kill")
            .args(["-USR1", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(GateEvent::RunFinished { .. }) => break,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => panic!("gate closed its event channel"),
                }
            }
        })
        .await
        .expect("SIGUSR1 should start a deployment");

        handle.shutdown();
        task.await.unwrap().unwrap();
        assert_eq!(deployer.manual.load(Ordering::SeqCst), 1);
    }
}
