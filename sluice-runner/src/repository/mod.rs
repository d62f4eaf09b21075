//! Repository layer
//!
//! Repositories answer questions about the watched source checkout. They
//! know nothing about stages, reports or scheduling.
//!
//! All repositories are trait-based to enable testing and mocking.

mod git;

use async_trait::async_trait;
use sluice_core::domain::branch::BranchInfo;
use sluice_core::error::DetectionError;

pub use git::{GitDetector, check_git_available};

/// Answer of a change check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// The watched branch moved since the last check
    pub changed: bool,
    /// Metadata of the new head, when the detector captured it
    pub branch: Option<BranchInfo>,
}

impl Detection {
    pub fn unchanged() -> Self {
        Self {
            changed: false,
            branch: None,
        }
    }

    pub fn changed(branch: BranchInfo) -> Self {
        Self {
            changed: true,
            branch: Some(branch),
        }
    }
}

/// Change detection over a source repository
#[async_trait]
pub trait Detector: Send + Sync {
    /// Checks whether the watched branch changed
    ///
    /// A detector that reports a change has already brought the local
    /// checkout up to date with it.
    async fn check(&self) -> Result<Detection, DetectionError>;

    /// Metadata of the commit currently checked out
    async fn branch_info(&self) -> Result<BranchInfo, DetectionError>;
}
