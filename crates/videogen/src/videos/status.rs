use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum VideoStatus {
    Draft,
    Init,
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Draft => "draft",
            VideoStatus::Init => "init",
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
            VideoStatus::Error => "error",
            VideoStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VideoStatus::Completed | VideoStatus::Error | VideoStatus::Cancelled
        )
    }

    pub fn terminal() -> [VideoStatus; 3] {
        [
            VideoStatus::Completed,
            VideoStatus::Error,
            VideoStatus::Cancelled,
        ]
    }

    pub fn can_transition_to(&self, next: VideoStatus) -> bool {
        use VideoStatus::*;
        match self {
            Draft => matches!(next, Init | Error | Cancelled),
            Init => matches!(next, Init | Processing | Error | Cancelled),
            Processing => matches!(next, Processing | Init | Completed | Error | Cancelled),
            Completed | Error | Cancelled => false,
        }
    }

    /// Translate a provider status token. Unknown tokens map to `Error`.
    pub fn from_engine(token: &str) -> VideoStatus {
        let key: String = token
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .map(|c| c.to_ascii_uppercase())
            .collect();

        match key.as_str() {
            "INQUEUE" | "QUEUED" | "INPROGRESS" | "PENDING" | "RUNNING" | "THROTTLED"
            | "PROCESSING" => VideoStatus::Processing,
            "COMPLETED" | "SUCCEEDED" | "SUCCESS" | "OK" => VideoStatus::Completed,
            "CANCELLED" | "CANCELED" => VideoStatus::Cancelled,
            _ => VideoStatus::Error,
        }
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VideoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(VideoStatus::Draft),
            "init" => Ok(VideoStatus::Init),
            "processing" => Ok(VideoStatus::Processing),
            "completed" => Ok(VideoStatus::Completed),
            "error" => Ok(VideoStatus::Error),
            "cancelled" => Ok(VideoStatus::Cancelled),
            other => Err(format!("unknown video status: {other}")),
        }
    }
}
