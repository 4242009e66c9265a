use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::model::{Video, VideoReport};
use super::status::VideoStatus;
use super::store::{ListFilter, StoreError, VideoStore};

/// In-process [`VideoStore`] with the same versioning rules as Postgres.
/// Used by tests and the single-node dev setup.
#[derive(Default)]
pub struct MemoryVideoStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    videos: HashMap<Uuid, Video>,
    reports: Vec<VideoReport>,
}

impl MemoryVideoStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // a panic while holding the lock leaves plain data behind, still usable
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl VideoStore for MemoryVideoStore {
    async fn insert(&self, video: &Video) -> Result<(), StoreError> {
        self.lock().videos.insert(video.id, video.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Video>, StoreError> {
        Ok(self.lock().videos.get(&id).cloned())
    }

    async fn save(&self, video: &Video) -> Result<Video, StoreError> {
        let mut inner = self.lock();
        let current = inner
            .videos
            .get_mut(&video.id)
            .ok_or(StoreError::NotFound(video.id))?;

        if current.version != video.version {
            return Err(StoreError::Conflict(video.id));
        }

        let mut saved = video.clone();
        saved.version += 1;
        saved.updated_at = Utc::now();
        *current = saved.clone();
        Ok(saved)
    }

    async fn list_for_user(&self, user_id: Uuid, filter: &ListFilter) -> Result<Vec<Video>, StoreError> {
        let limit = filter.limit.clamp(1, 100) as usize;
        let mut rows: Vec<Video> = self
            .lock()
            .videos
            .values()
            .filter(|v| v.user_id == user_id)
            .filter(|v| filter.status.map_or(true, |s| v.status == s))
            .filter(|v| {
                filter
                    .cursor
                    .map_or(true, |c| (v.created_at, v.id) < (c.created_at, c.id))
            })
            .cloned()
            .collect();

        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn list_outstanding(
        &self,
        submitted_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Video>, StoreError> {
        let mut rows: Vec<Video> = self
            .lock()
            .videos
            .values()
            .filter(|v| v.request_id.is_some() && !v.status.is_terminal())
            .filter(|v| v.submitted_at.is_some_and(|t| t <= submitted_before))
            .cloned()
            .collect();

        rows.sort_by_key(|v| (v.submitted_at, v.id));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn list_due_resubmissions(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Video>, StoreError> {
        let mut rows: Vec<Video> = self
            .lock()
            .videos
            .values()
            .filter(|v| v.status == VideoStatus::Init && v.request_id.is_none())
            .filter(|v| v.retry_at.is_some_and(|t| t <= now))
            .cloned()
            .collect();

        rows.sort_by_key(|v| (v.retry_at, v.id));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn add_report(&self, report: &VideoReport) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.videos.contains_key(&report.video_id) {
            return Err(StoreError::NotFound(report.video_id));
        }
        inner.reports.push(report.clone());
        Ok(())
    }

    async fn list_reports(&self, video_id: Uuid) -> Result<Vec<VideoReport>, StoreError> {
        Ok(self
            .lock()
            .reports
            .iter()
            .filter(|r| r.video_id == video_id)
            .cloned()
            .collect())
    }
}
