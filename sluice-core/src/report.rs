//! Report formatting
//!
//! Renders a finished [`PipelineRun`] into a [`NotificationPayload`]: one
//! line per declared stage, followed by either a short summary or the
//! detail of the error that stopped the run. Output excerpts are cut from
//! the tail so the message size stays bounded whatever the commands print.
//!
//! Nothing in here performs I/O.

use crate::domain::run::{PipelineRun, RunOutcome, StageMark};
use crate::dto::notification::{Attachment, COLOR_DANGER, COLOR_GOOD, NotificationPayload};
use crate::error::{AggregateError, GroupStatus, PipelineError, ProcessError};

/// Maximum characters of stdout shown per failed command
pub const STDOUT_EXCERPT_CHARS: usize = 500;

/// Maximum characters of stderr or raw error text shown
pub const ERROR_EXCERPT_CHARS: usize = 1000;

const MARK_COMPLETED: &str = ":white_check_mark:";
const MARK_FAILED: &str = ":x:";
const MARK_BLOCKED: &str = ":no_entry_sign:";
const MARK_SKIPPED: &str = ":heavy_minus_sign:";
const MARK_PENDING: &str = ":hourglass:";

/// Texts and routing applied to every notification
#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub success_text: String,
    pub failed_text: String,
    pub channel: Option<String>,
    pub username: Option<String>,
    pub icon_emoji: Option<String>,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            success_text: "Deployment SUCCESS".to_string(),
            failed_text: "Deployment FAILED!".to_string(),
            channel: None,
            username: None,
            icon_emoji: None,
        }
    }
}

/// Turns pipeline runs into notification payloads
#[derive(Debug, Clone)]
pub struct ReportFormatter {
    settings: ReportSettings,
    stdout_limit: usize,
    error_limit: usize,
}

impl ReportFormatter {
    pub fn new(settings: ReportSettings) -> Self {
        Self {
            settings,
            stdout_limit: STDOUT_EXCERPT_CHARS,
            error_limit: ERROR_EXCERPT_CHARS,
        }
    }

    /// Overrides the excerpt bounds
    pub fn with_limits(mut self, stdout_limit: usize, error_limit: usize) -> Self {
        self.stdout_limit = stdout_limit;
        self.error_limit = error_limit;
        self
    }

    pub fn format(&self, run: &PipelineRun) -> NotificationPayload {
        let success = run.is_success();
        let (text, color) = if success {
            (&self.settings.success_text, COLOR_GOOD)
        } else {
            (&self.settings.failed_text, COLOR_DANGER)
        };

        let progress = Attachment {
            pretext: Some(format!("Branch {}", run.branch.label)),
            color: color.to_string(),
            title: "Stages".to_string(),
            text: self.stage_lines(run),
        };

        let detail = match (&run.outcome, &run.failure) {
            (RunOutcome::Succeeded, _) => Attachment {
                pretext: None,
                color: COLOR_GOOD.to_string(),
                title: "Deployed".to_string(),
                text: self.summary(run),
            },
            (_, Some(failure)) => Attachment {
                pretext: None,
                color: COLOR_DANGER.to_string(),
                title: format!("{} failed", failure.stage),
                text: self.error_detail(&failure.error),
            },
            (_, None) => Attachment {
                pretext: None,
                color: COLOR_DANGER.to_string(),
                title: "Run incomplete".to_string(),
                text: format!("Run stopped in state {}", run.state),
            },
        };

        NotificationPayload {
            text: text.clone(),
            channel: self.settings.channel.clone(),
            username: self.settings.username.clone(),
            icon_emoji: self.settings.icon_emoji.clone(),
            attachments: vec![progress, detail],
        }
    }

    fn stage_lines(&self, run: &PipelineRun) -> String {
        run.stages
            .iter()
            .map(|stage| match run.mark(*stage) {
                StageMark::Completed => format!("{} {}", MARK_COMPLETED, stage),
                StageMark::Failed => format!("{} {}", MARK_FAILED, stage),
                StageMark::Skipped => format!("{} {} (skipped)", MARK_SKIPPED, stage),
                StageMark::Blocked => format!("{} {} (not started)", MARK_BLOCKED, stage),
                StageMark::Pending => format!("{} {} (pending)", MARK_PENDING, stage),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn summary(&self, run: &PipelineRun) -> String {
        let seconds = run.duration().map(|d| d.num_seconds()).unwrap_or_default();
        format!(
            "{} ({}) deployed in {}s",
            run.branch.label, run.branch.commit_hash, seconds
        )
    }

    /// Detail block for the error that stopped the run
    pub fn error_detail(&self, error: &PipelineError) -> String {
        match error {
            PipelineError::Process(err) => self.process_detail(err, ""),
            PipelineError::Aggregate(err) => self.aggregate_detail(err),
            PipelineError::Unexpected(message) => format!(
                "Unexpected error:\n```\n{}\n```",
                tail_chars(message, self.error_limit)
            ),
        }
    }

    fn aggregate_detail(&self, error: &AggregateError) -> String {
        let mut lines = Vec::new();

        for group in &error.groups {
            match group.status {
                GroupStatus::Done => lines.push(format!("{} {}", MARK_COMPLETED, group.name)),
                GroupStatus::NotStarted => {
                    lines.push(format!("{} {} (not started)", MARK_BLOCKED, group.name))
                }
                GroupStatus::Failed => {
                    lines.push(format!("{} {}", MARK_FAILED, group.name));
                    for command in &group.commands {
                        match &command.error {
                            Some(err) => {
                                lines.push(format!("    {} `{}`", MARK_FAILED, command.command));
                                lines.push(self.process_detail(err, "    "));
                            }
                            None if command.done => lines.push(format!(
                                "    {} `{}`",
                                MARK_COMPLETED, command.command
                            )),
                            None => lines.push(format!(
                                "    {} `{}` (not finished)",
                                MARK_BLOCKED, command.command
                            )),
                        }
                    }
                }
            }
        }

        lines.join("\n")
    }

    fn process_detail(&self, error: &ProcessError, indent: &str) -> String {
        let mut lines = vec![format!("{}Command: `{}`", indent, error.command)];

        match error.exit_code {
            Some(code) => lines.push(format!("{}Exit code: {}", indent, code)),
            None => lines.push(format!("{}Exit code: none ({})", indent, error.reason)),
        }

        let stdout = error.stdout.trim_end();
        if !stdout.is_empty() {
            lines.push(format!(
                "{}stdout:\n```\n{}\n```",
                indent,
                tail_chars(stdout, self.stdout_limit)
            ));
        }

        let stderr = error.stderr.trim_end();
        if !stderr.is_empty() {
            lines.push(format!(
                "{}stderr:\n```\n{}\n```",
                indent,
                tail_chars(stderr, self.error_limit)
            ));
        }

        lines.join("\n")
    }
}

/// Last `limit` characters of `text`
pub fn tail_chars(text: &str, limit: usize) -> &str {
    let count = text.chars().count();
    if count <= limit {
        return text;
    }
    text.char_indices()
        .nth(count - limit)
        .map(|(idx, _)| &text[idx..])
        .unwrap_or_default()
}
