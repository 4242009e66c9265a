use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engines::Options;
use crate::videos::{Video, VideoResult, VideoStatus};

#[derive(Debug, Deserialize)]
pub struct CreateVideoRequest {
    pub prompt: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub engine: String,
    #[serde(default)]
    pub options: Option<Options>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Public view of a video. Billing and bookkeeping fields stay internal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub prompt: String,
    pub image_url: Option<String>,
    pub engine: String,
    pub options: Options,
    pub webhook_url: Option<String>,

    pub status: VideoStatus,
    pub task_progress: i32,
    pub retry_count: i32,
    pub result: Option<VideoResult>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Video> for VideoView {
    fn from(v: Video) -> Self {
        Self {
            id: v.id,
            user_id: v.user_id,
            prompt: v.user_prompt,
            image_url: v.image_url,
            engine: v.engine,
            options: v.options.0,
            webhook_url: v.webhook_url,
            status: v.status,
            task_progress: v.task_progress,
            retry_count: v.retry_count,
            result: v.result.map(|r| r.0),
            created_at: v.created_at,
            updated_at: v.updated_at,
            completed_at: v.completed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListVideosQuery {
    pub status: Option<VideoStatus>,
    pub limit: Option<i64>,
    pub cursor_created_at: Option<DateTime<Utc>>,
    pub cursor_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListVideosResponse {
    pub items: Vec<VideoView>,
    pub next_cursor_created_at: Option<DateTime<Utc>>,
    pub next_cursor_id: Option<Uuid>,
}
