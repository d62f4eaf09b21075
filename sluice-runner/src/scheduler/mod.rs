//! Scheduler layer for the runner
//!
//! This layer decides when deployments run: it polls for changes, accepts
//! external triggers and makes sure only one deployment is active at a
//! time.

pub mod gate;
pub mod signals;
pub mod tally;

pub use gate::{ChangeGate, GateConfig};
pub use signals::forward_ctrl_c;
#[cfg(unix)]
pub use signals::forward_manual_triggers;
pub use tally::tally_runs;
