//! Webhook delivery

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use sluice_core::dto::notification::NotificationPayload;
use tracing::debug;

use crate::error::Result;
use crate::{Notifier, WebhookNotifier};

const CLIENT_AGENT: &str = concat!("sluice/", env!("CARGO_PKG_VERSION"));

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, payload: &NotificationPayload) -> Result<()> {
        let url = self.endpoint();
        debug!("Posting notification to {}", url);

        let response = self
            .client
            .post(&url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, CLIENT_AGENT)
            .json(payload)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
