//! Core domain types
//!
//! This module contains the structures a deployment run is built from.
//! They are produced by the runner while executing and consumed by the
//! report formatter once the run has finished.

pub mod branch;
pub mod run;
pub mod script;
pub mod stage;
