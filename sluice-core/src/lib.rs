//! Sluice Core
//!
//! Core types and abstractions for the Sluice deployment orchestrator.
//!
//! This crate contains:
//! - Domain types: branches, commands, scripts, stages and pipeline runs
//! - Errors: the failure taxonomy shared by the runner and the report
//! - Report: rendering of a finished run into a notification
//! - DTOs: the notification payload delivered to the webhook
//!
//! Note: process execution and scheduling live in the runner, delivery in the client.

pub mod domain;
pub mod dto;
pub mod error;
pub mod report;
