//! Git change detection
//!
//! Watches one branch of a remote:
//! - `git fetch <remote> <branch>`
//! - compares `HEAD` with `<remote>/<branch>`
//! - on a difference, fast-forwards the checkout (or hard-resets it in
//!   strict mode) and reports the new head
//!
//! Every git invocation is an argument vector; nothing is passed through
//! a shell.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sluice_core::domain::branch::BranchInfo;
use sluice_core::domain::script::Command;
use sluice_core::error::DetectionError;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use super::{Detection, Detector};
use crate::config::Config;
use crate::service::ProcessRunner;

/// Checks that git is installed and available
pub fn check_git_available() -> Result<()> {
    let output = std::process::Command::new("git")
        .arg("--version")
        .output()
        .context("Failed to execute 'git --version'. Is git installed?")?;

    if !output.status.success() {
        anyhow::bail!("Git is not working correctly");
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!("Git is available: {}", version.trim());

    Ok(())
}

/// [`Detector`] over a local git checkout
pub struct GitDetector {
    runner: Arc<dyn ProcessRunner>,
    path: PathBuf,
    remote: String,
    branch: String,
    strict: bool,
}

impl GitDetector {
    /// Creates a new git detector
    ///
    /// # Arguments
    /// * `runner` - Runs the git commands
    /// * `path` - The checkout to watch
    /// * `remote` - Remote name (e.g., "origin")
    /// * `branch` - Branch on that remote
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        path: impl Into<PathBuf>,
        remote: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            path: path.into(),
            remote: remote.into(),
            branch: branch.into(),
            strict: false,
        }
    }

    /// Creates a detector for the checkout described by `config`
    pub fn from_config(runner: Arc<dyn ProcessRunner>, config: &Config) -> Self {
        Self::new(runner, &config.path, &config.remote, &config.branch).strict(config.strict)
    }

    /// Hard-resets to the remote instead of fast-forwarding
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    fn upstream(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }

    async fn git<const N: usize>(&self, args: [&str; N]) -> Result<String, DetectionError> {
        let output = self
            .runner
            .run(&Command::exec("git", args), Some(&self.path))
            .await?;
        Ok(output.stdout.trim().to_string())
    }
}

#[async_trait]
impl Detector for GitDetector {
    async fn check(&self) -> Result<Detection, DetectionError> {
        let upstream = self.upstream();

        self.git(["fetch", self.remote.as_str(), self.branch.as_str()]).await?;
        let local = self.git(["rev-parse", "HEAD"]).await?;
        let remote = self.git(["rev-parse", upstream.as_str()]).await?;

        if local == remote {
            debug!("{} is up to date at {}", upstream, local);
            return Ok(Detection::unchanged());
        }

        info!("{} moved: {} -> {}", upstream, local, remote);
        if self.strict {
            self.git(["reset", "--hard", upstream.as_str()]).await?;
        } else {
            self.git(["merge", "--ff-only", upstream.as_str()]).await?;
        }

        let branch = self.branch_info().await?;
        Ok(Detection::changed(branch))
    }

    async fn branch_info(&self) -> Result<BranchInfo, DetectionError> {
        let hash = self.git(["rev-parse", "HEAD"]).await?;
        if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DetectionError::Output(format!(
                "unexpected commit hash '{}'",
                hash
            )));
        }

        let name = self.git(["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        let name = if name.is_empty() || name == "HEAD" {
            self.branch.clone()
        } else {
            name
        };

        Ok(BranchInfo::new(name, hash))
    }
}
