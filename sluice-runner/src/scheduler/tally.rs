//! Counts finished deployments from the gate's event stream

use sluice_core::domain::run::RunOutcome;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use super::gate::GateEvent;

/// Deployments finished during one gate lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTally {
    pub succeeded: usize,
    pub failed: usize,
    /// Deployments whose task ended without an outcome
    pub aborted: usize,
}

impl RunTally {
    fn record(&mut self, outcome: Option<RunOutcome>) {
        match outcome {
            Some(RunOutcome::Succeeded) => self.succeeded += 1,
            Some(_) => self.failed += 1,
            None => self.aborted += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.aborted
    }
}

/// Consumes gate events until the gate stops
pub async fn tally_runs(mut events: broadcast::Receiver<GateEvent>) -> RunTally {
    let mut tally = RunTally::default();
    loop {
        match events.recv().await {
            Ok(GateEvent::RunFinished { outcome }) => tally.record(outcome),
            Ok(GateEvent::Stopped) | Err(RecvError::Closed) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!("Run tally missed {} gate event(s)", skipped);
            }
        }
    }
    tally
}
