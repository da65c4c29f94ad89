//! Messages, push payloads and notifications exchanged with pages and the
//! hosting platform. None of these carry decision logic of their own.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound page -> worker messages, tagged on `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
    #[serde(rename = "GET_VERSION")]
    GetVersion,
    #[serde(rename = "PORTFOLIO_HUB_PERFORMANCE")]
    PerformanceMetric {
        #[serde(default)]
        metric: Value,
    },
}

impl WorkerMessage {
    /// `None` for anything that is not a known message.
    pub fn parse(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Reply sent back over the message's reply port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageReply {
    Version { version: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl PushPayload {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    /// Page opened when the notification is clicked.
    pub url: String,
    pub actions: Vec<NotificationAction>,
}

/// Vibration pattern in milliseconds
const VIBRATE_PATTERN: [u32; 3] = [200, 100, 200];

impl Notification {
    pub fn from_push(payload: PushPayload, display_name: &str, icon: &str) -> Self {
        Self {
            title: payload.title,
            body: payload.body,
            icon: icon.to_string(),
            badge: icon.to_string(),
            vibrate: VIBRATE_PATTERN.to_vec(),
            url: payload.url.unwrap_or_else(|| "/".to_string()),
            actions: vec![
                NotificationAction {
                    action: "open".to_string(),
                    title: format!("Open {}", display_name),
                },
                NotificationAction {
                    action: "close".to_string(),
                    title: "Close".to_string(),
                },
            ],
        }
    }
}
