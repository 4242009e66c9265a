use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::model::{Video, VideoReport};
use super::status::VideoStatus;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The record changed since it was read.
    #[error("video {0} was modified concurrently")]
    Conflict(Uuid),

    #[error("video {0} not found")]
    NotFound(Uuid),
}

/// Keyset cursor for listing, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<VideoStatus>,
    pub limit: i64,
    pub cursor: Option<ListCursor>,
}

/// Persistence for video records and their report trail.
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn insert(&self, video: &Video) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Video>, StoreError>;

    /// Optimistic write. Succeeds only while the stored version still equals
    /// `video.version`; returns the saved record with the bumped version.
    async fn save(&self, video: &Video) -> Result<Video, StoreError>;

    async fn list_for_user(&self, user_id: Uuid, filter: &ListFilter) -> Result<Vec<Video>, StoreError>;

    /// Videos with a provider request in flight, submitted at or before
    /// `submitted_before`, oldest first.
    async fn list_outstanding(
        &self,
        submitted_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Video>, StoreError>;

    /// `init` videos without a request id whose retry is due.
    async fn list_due_resubmissions(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Video>, StoreError>;

    async fn add_report(&self, report: &VideoReport) -> Result<(), StoreError>;

    async fn list_reports(&self, video_id: Uuid) -> Result<Vec<VideoReport>, StoreError>;
}
