//! Sluice notification client
//!
//! Delivers run reports to a Slack-compatible incoming webhook.
//!
//! The runner only depends on the [`Notifier`] trait; [`WebhookNotifier`] is
//! the HTTP implementation.
//!
//! # Example
//!
//! ```no_run
//! use sluice_client::{Notifier, WebhookNotifier};
//! use sluice_core::dto::notification::NotificationPayload;
//!
//! # async fn example(payload: NotificationPayload) -> sluice_client::Result<()> {
//! let notifier = WebhookNotifier::new("https://hooks.slack.com", "/services/T000/B000/XXX")?;
//! notifier.send(&payload).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
mod notify;

// Re-export commonly used types
pub use error::{ClientError, Result};

use async_trait::async_trait;
use reqwest::Client;
use sluice_core::dto::notification::NotificationPayload;

/// Default webhook host
pub const DEFAULT_WEBHOOK_URL: &str = "https://hooks.slack.com";

/// Delivers a formatted report to a human-facing channel
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends one payload
    ///
    /// Failures are reported to the caller, which is expected to log them;
    /// they never change the outcome of the run being reported.
    async fn send(&self, payload: &NotificationPayload) -> Result<()>;
}

/// HTTP notifier posting JSON to `<base_url><hook_path>`
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    /// Base URL of the webhook host (e.g., "https://hooks.slack.com")
    base_url: String,
    /// Path of the webhook, always starting with '/'
    hook_path: String,
    /// HTTP client instance
    client: Client,
}

impl WebhookNotifier {
    /// Create a new webhook notifier
    ///
    /// # Arguments
    /// * `base_url` - Scheme and host of the webhook
    /// * `hook_path` - Path of the webhook on that host
    pub fn new(base_url: impl Into<String>, hook_path: impl Into<String>) -> Result<Self> {
        Self::with_client(base_url, hook_path, Client::new())
    }

    /// Create a new webhook notifier with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(
        base_url: impl Into<String>,
        hook_path: impl Into<String>,
        client: Client,
    ) -> Result<Self> {
        let base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ClientError::InvalidConfig(format!(
                "webhook url must start with http:// or https://, got '{}'",
                base_url
            )));
        }

        let hook_path = hook_path.into();
        let hook_path = if hook_path.starts_with('/') {
            hook_path
        } else {
            format!("/{}", hook_path)
        };

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            hook_path,
            client,
        })
    }

    /// Full URL the payload is posted to
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, self.hook_path)
    }

    /// Check the status code of a webhook response
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_composition() {
        let notifier = WebhookNotifier::new("https://hooks.slack.com/", "services/T/B/X").unwrap();
        assert_eq!(notifier.endpoint(), "https://hooks.slack.com/services/T/B/X");
    }

    #[test]
    fn test_endpoint_keeps_leading_slash() {
        let notifier = WebhookNotifier::new("http://localhost:9000", "/hook").unwrap();
        assert_eq!(notifier.endpoint(), "http://localhost:9000/hook");
    }

    #[test]
    fn test_rejects_url_without_scheme() {
        let err = WebhookNotifier::new("hooks.slack.com", "/hook").unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(_)));
    }
}
