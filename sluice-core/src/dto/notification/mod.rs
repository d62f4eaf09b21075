//! Notification DTOs
//!
//! Slack-compatible incoming-webhook message. Produced by the report
//! formatter, delivered by the client.

use serde::{Deserialize, Serialize};

/// Attachment color for successful runs
pub const COLOR_GOOD: &str = "good";

/// Attachment color for failed runs
pub const COLOR_DANGER: &str = "danger";

/// Message posted to the webhook after a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_emoji: Option<String>,

    pub attachments: Vec<Attachment>,
}

/// A colored block of the message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pretext: Option<String>,

    pub color: String,
    pub title: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_routing_fields_are_omitted() {
        let payload = NotificationPayload {
            text: "Build SUCCESS".to_string(),
            channel: None,
            username: Some("deploy-bot".to_string()),
            icon_emoji: None,
            attachments: vec![Attachment {
                pretext: None,
                color: COLOR_GOOD.to_string(),
                title: "Stages".to_string(),
                text: "ok".to_string(),
            }],
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("channel").is_none());
        assert!(json.get("icon_emoji").is_none());
        assert_eq!(json["username"], "deploy-bot");
        assert!(json["attachments"][0].get("pretext").is_none());
        assert_eq!(json["attachments"][0]["color"], "good");
    }
}
