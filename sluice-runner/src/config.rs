//! Runner configuration
//!
//! Defines everything the runner needs: what to watch, where to build and
//! deploy, the scripts of each stage and where to send reports.
//!
//! Configuration is read from a JSON file (camelCase keys). An optional
//! environment overlay `<stem>.<env>.json` next to it is deep-merged on top,
//! then `SLUICE_*` environment variables override individual settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sluice_client::DEFAULT_WEBHOOK_URL;
use sluice_core::domain::script::{Command, Script};
use sluice_core::report::ReportSettings;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::service::GroupFailurePolicy;

/// Runner configuration
///
/// Intervals and limits are configurable to allow tuning for different
/// deployment targets (sandbox vs production, small vs large builds).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// How often the watched branch is checked, in seconds
    #[serde(with = "secs")]
    pub poll_interval: Duration,

    /// Git remote to fetch from
    pub remote: String,

    /// Branch to watch
    pub branch: String,

    /// Discard local changes when syncing to the remote branch
    pub strict: bool,

    /// Repository checkout that is watched
    pub path: PathBuf,

    /// Directory the build and test scripts run in (defaults to `path`)
    pub build_path: Option<PathBuf>,

    /// Directory the build output is synchronized to
    pub deploy_path: PathBuf,

    pub build_script: Option<Script>,
    pub test_script: Option<Script>,

    /// Tasks run in the deploy directory after the restart
    pub post_tasks: Option<Script>,

    /// Command restarting the deployed service
    pub restart_script: Option<Command>,

    /// Marker replaced with the deployed commit hash in deployed files
    pub commit_tag: Option<String>,

    /// Run the pipeline on every tick, without waiting for a change
    pub is_debug: bool,

    pub success_text: String,
    pub failed_text: String,

    /// Where reports are sent; reports are only logged when absent
    pub notification: Option<NotificationConfig>,

    /// Program and leading arguments of the build-to-deploy sync;
    /// source and destination directories are appended
    pub sync_command: Command,

    /// What happens to sibling commands when one command of a group fails
    pub group_failure_policy: GroupFailurePolicy,

    /// Per-command time limit in seconds (no limit when absent)
    #[serde(with = "opt_secs")]
    pub command_timeout: Option<Duration>,

    /// Number of trailing output chunks kept per command
    pub output_tail_chunks: usize,

    pub detector_retry: RetryConfig,
}

/// Webhook routing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    #[serde(default = "default_webhook_url")]
    pub url: String,
    pub hook_path: String,
    pub channel: Option<String>,
    pub username: Option<String>,
    pub icon_emoji: Option<String>,
}

/// Retry policy for failed change checks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Attempts per tick before giving up until the next tick
    pub max_attempts: u32,

    /// Fixed delay between two attempts, in seconds
    #[serde(with = "secs")]
    pub delay: Duration,

    /// Time limit for a single attempt, in seconds
    #[serde(with = "secs")]
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
            timeout: Duration::from_secs(120),
        }
    }
}

fn default_webhook_url() -> String {
    DEFAULT_WEBHOOK_URL.to_string()
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(path: PathBuf, deploy_path: PathBuf) -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            remote: "origin".to_string(),
            branch: "master".to_string(),
            strict: false,
            path,
            build_path: None,
            deploy_path,
            build_script: None,
            test_script: None,
            post_tasks: None,
            restart_script: None,
            commit_tag: None,
            is_debug: false,
            success_text: ReportSettings::default().success_text,
            failed_text: ReportSettings::default().failed_text,
            notification: None,
            sync_command: Command::exec("rsync", ["-a", "--exclude", ".git"]),
            group_failure_policy: GroupFailurePolicy::default(),
            command_timeout: None,
            output_tail_chunks: 5,
            detector_retry: RetryConfig::default(),
        }
    }

    /// Loads configuration from a file, its environment overlay and
    /// environment variables
    ///
    /// # Arguments
    /// * `path` - Base JSON configuration file
    /// * `environment` - Overlay name (e.g., "production" reads `<stem>.production.json`)
    pub fn load(path: &Path, environment: Option<&str>) -> Result<Self> {
        let mut merged = read_json(path)?;

        if let Some(env) = environment {
            let overlay_path = overlay_path(path, env);
            if overlay_path.exists() {
                let overlay = read_json(&overlay_path)?;
                merge_json(&mut merged, overlay);
            } else {
                tracing::debug!("No overlay at {}", overlay_path.display());
            }
        }

        let mut config: Config = serde_json::from_value(merged)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Applies environment overrides
    ///
    /// Recognized variables:
    /// - SLUICE_POLL_INTERVAL (seconds)
    /// - SLUICE_REMOTE
    /// - SLUICE_BRANCH
    /// - SLUICE_DEBUG (true/false/1/0)
    /// - SLUICE_HOOK_PATH (only when a notification block is configured)
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secs) = lookup("SLUICE_POLL_INTERVAL").and_then(|s| s.parse::<u64>().ok()) {
            self.poll_interval = Duration::from_secs(secs);
        }

        if let Some(remote) = lookup("SLUICE_REMOTE") {
            self.remote = remote;
        }

        if let Some(branch) = lookup("SLUICE_BRANCH") {
            self.branch = branch;
        }

        if let Some(debug) = lookup("SLUICE_DEBUG") {
            self.is_debug = matches!(debug.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let (Some(hook_path), Some(notification)) =
            (lookup("SLUICE_HOOK_PATH"), self.notification.as_mut())
        {
            notification.hook_path = hook_path;
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            anyhow::bail!("pollInterval must be greater than 0");
        }

        if self.remote.trim().is_empty() {
            anyhow::bail!("remote cannot be empty");
        }

        if self.branch.trim().is_empty() {
            anyhow::bail!("branch cannot be empty");
        }

        if self.deploy_path.as_os_str().is_empty() {
            anyhow::bail!("deployPath must be set");
        }

        for (name, script) in [
            ("buildScript", &self.build_script),
            ("testScript", &self.test_script),
            ("postTasks", &self.post_tasks),
        ] {
            if let Some(script) = script {
                script
                    .validate()
                    .map_err(|e| anyhow::anyhow!("{}: {}", name, e))?;
            }
        }

        if let Some(restart) = &self.restart_script {
            Script::Single(restart.clone())
                .validate()
                .map_err(|e| anyhow::anyhow!("restartScript: {}", e))?;
        }

        if matches!(&self.commit_tag, Some(tag) if tag.is_empty()) {
            anyhow::bail!("commitTag cannot be an empty string");
        }

        if !matches!(self.sync_command, Command::Exec { .. }) {
            anyhow::bail!("syncCommand must be an argument vector, not a shell line");
        }

        if self.output_tail_chunks == 0 {
            anyhow::bail!("outputTailChunks must be greater than 0");
        }

        if self.detector_retry.max_attempts == 0 {
            anyhow::bail!("detectorRetry.maxAttempts must be greater than 0");
        }

        if self.detector_retry.timeout.is_zero() {
            anyhow::bail!("detectorRetry.timeout must be greater than 0");
        }

        if let Some(notification) = &self.notification {
            if notification.hook_path.trim().is_empty() {
                anyhow::bail!("notification.hookPath cannot be empty");
            }
        }

        Ok(())
    }

    /// Directory the build and test scripts run in
    pub fn build_dir(&self) -> &Path {
        self.build_path.as_deref().unwrap_or(&self.path)
    }

    /// Texts and routing for the report formatter
    pub fn report_settings(&self) -> ReportSettings {
        let notification = self.notification.as_ref();
        ReportSettings {
            success_text: self.success_text.clone(),
            failed_text: self.failed_text.clone(),
            channel: notification.and_then(|n| n.channel.clone()),
            username: notification.and_then(|n| n.username.clone()),
            icon_emoji: notification.and_then(|n| n.icon_emoji.clone()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(PathBuf::from("."), PathBuf::new())
    }
}

fn read_json(path: &Path) -> Result<JsonValue> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

/// `deploy.json` + `production` -> `deploy.production.json`
fn overlay_path(path: &Path, environment: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{}.{}.json", stem, environment))
}

/// Deep-merges `overlay` into `base`; objects merge key by key, anything
/// else is replaced
fn merge_json(base: &mut JsonValue, overlay: JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base), JsonValue::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|secs| secs.map(Duration::from_secs))
    }
}
