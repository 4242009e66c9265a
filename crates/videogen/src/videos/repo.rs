use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::model::{Video, VideoReport};
use super::status::VideoStatus;
use super::store::{ListFilter, StoreError, VideoStore};

/// Postgres-backed [`VideoStore`].
#[derive(Clone)]
pub struct PgVideoStore {
    pool: PgPool,
}

impl PgVideoStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl VideoStore for PgVideoStore {
    async fn insert(&self, v: &Video) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO videos (
                id, user_id, user_prompt, prompt, image_url, engine, options, webhook_url,
                request_id, status, task_progress, retry_count, usage_id, usage_cancelled,
                poll_failures, submitted_at, retry_at, completed_at, result,
                version, created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8,
                $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19,
                $20, $21, $22
            )
            "#,
        )
        .bind(v.id)
        .bind(v.user_id)
        .bind(&v.user_prompt)
        .bind(&v.prompt)
        .bind(&v.image_url)
        .bind(&v.engine)
        .bind(v.options.clone())
        .bind(&v.webhook_url)
        .bind(&v.request_id)
        .bind(v.status)
        .bind(v.task_progress)
        .bind(v.retry_count)
        .bind(&v.usage_id)
        .bind(v.usage_cancelled)
        .bind(v.poll_failures)
        .bind(v.submitted_at)
        .bind(v.retry_at)
        .bind(v.completed_at)
        .bind(v.result.clone())
        .bind(v.version)
        .bind(v.created_at)
        .bind(v.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Video>, StoreError> {
        let video = sqlx::query_as::<_, Video>("SELECT * FROM videos WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(video)
    }

    async fn save(&self, v: &Video) -> Result<Video, StoreError> {
        let saved = sqlx::query_as::<_, Video>(
            r#"
            UPDATE videos
            SET prompt = $3,
                options = $4,
                request_id = $5,
                status = $6,
                task_progress = $7,
                retry_count = $8,
                usage_id = $9,
                usage_cancelled = $10,
                poll_failures = $11,
                submitted_at = $12,
                retry_at = $13,
                completed_at = $14,
                result = $15,
                version = version + 1,
                updated_at = now()
            WHERE id = $1 AND version = $2
            RETURNING *
            "#,
        )
        .bind(v.id)
        .bind(v.version)
        .bind(&v.prompt)
        .bind(v.options.clone())
        .bind(&v.request_id)
        .bind(v.status)
        .bind(v.task_progress)
        .bind(v.retry_count)
        .bind(&v.usage_id)
        .bind(v.usage_cancelled)
        .bind(v.poll_failures)
        .bind(v.submitted_at)
        .bind(v.retry_at)
        .bind(v.completed_at)
        .bind(v.result.clone())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(saved) = saved {
            return Ok(saved);
        }

        let exists: Option<(i64,)> = sqlx::query_as("SELECT version FROM videos WHERE id = $1")
            .bind(v.id)
            .fetch_optional(&self.pool)
            .await?;

        match exists {
            Some(_) => Err(StoreError::Conflict(v.id)),
            None => Err(StoreError::NotFound(v.id)),
        }
    }

    async fn list_for_user(&self, user_id: Uuid, filter: &ListFilter) -> Result<Vec<Video>, StoreError> {
        let limit = filter.limit.clamp(1, 100);
        let (cursor_created_at, cursor_id) = filter
            .cursor
            .map(|c| (Some(c.created_at), Some(c.id)))
            .unwrap_or((None, None));

        let rows = sqlx::query_as::<_, Video>(
            r#"
            SELECT *
            FROM videos
            WHERE user_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL OR (created_at, id) < ($3, $4))
            ORDER BY created_at DESC, id DESC
            LIMIT $5
            "#,
        )
        .bind(user_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(cursor_created_at)
        .bind(cursor_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn list_outstanding(
        &self,
        submitted_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Video>, StoreError> {
        let terminal: Vec<&str> = VideoStatus::terminal().iter().map(|s| s.as_str()).collect();

        let rows = sqlx::query_as::<_, Video>(
            r#"
            SELECT *
            FROM videos
            WHERE request_id IS NOT NULL
              AND status <> ALL($1)
              AND submitted_at <= $2
            ORDER BY submitted_at ASC, id ASC
            LIMIT $3
            "#,
        )
        .bind(&terminal)
        .bind(submitted_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn list_due_resubmissions(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Video>, StoreError> {
        let rows = sqlx::query_as::<_, Video>(
            r#"
            SELECT *
            FROM videos
            WHERE status = 'init'
              AND request_id IS NULL
              AND retry_at IS NOT NULL
              AND retry_at <= $1
            ORDER BY retry_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn add_report(&self, r: &VideoReport) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO video_reports (id, video_id, kind, message, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(r.id)
        .bind(r.video_id)
        .bind(r.kind)
        .bind(&r.message)
        .bind(r.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_reports(&self, video_id: Uuid) -> Result<Vec<VideoReport>, StoreError> {
        let rows = sqlx::query_as::<_, VideoReport>(
            r#"
            SELECT id, video_id, kind, message, created_at
            FROM video_reports
            WHERE video_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(video_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
