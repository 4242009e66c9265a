use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::status::VideoStatus;
use crate::engines::VideoTask;

/// A provider-side status observation, from a webhook or from polling.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderUpdate {
    pub status: VideoStatus,
    pub url: Option<String>,
    pub error: Option<String>,
    pub progress: Option<i32>,
    /// Request the observation belongs to, when the source says so.
    pub request_id: Option<String>,
}

impl ProviderUpdate {
    pub fn from_task(status: VideoStatus, task: VideoTask, request_id: &str) -> Self {
        Self {
            status,
            url: task.url,
            error: task.error,
            progress: None,
            request_id: Some(request_id.to_string()),
        }
    }
}

/// What `apply_update` did with an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The video was already terminal, or the update was for an older request.
    Ignored(VideoStatus),
    InProgress,
    Completed,
    Retrying { retry_count: i32 },
    Failed,
    Cancelled,
}

/// Body of a provider webhook call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub percentage: Option<Value>,
}

impl WebhookPayload {
    pub fn into_update(self) -> ProviderUpdate {
        let url = self
            .payload
            .as_ref()
            .and_then(|p| p.pointer("/video/url"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let error = self.error.and_then(|e| match e {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        });

        // a bare progress ping carries no status
        let status = match self.status.as_deref() {
            Some(token) => VideoStatus::from_engine(token),
            None if self.percentage.is_some() => VideoStatus::Processing,
            None => VideoStatus::Error,
        };

        ProviderUpdate {
            status,
            url,
            error,
            progress: self.percentage.as_ref().map(parse_percentage),
            request_id: self.request_id,
        }
    }
}

/// Percentage as sent by providers: a number, a `"45%"` string or null.
/// Null and unparsable values give -1; the rest is clamped to -1..=100.
pub fn parse_percentage(value: &Value) -> i32 {
    let raw = match value {
        Value::Number(n) => n.as_f64().map(|f| f.round() as i64),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    };
    raw.map(|p| p.clamp(-1, 100) as i32).unwrap_or(-1)
}
