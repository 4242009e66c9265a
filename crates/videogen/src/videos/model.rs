use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use super::retry::{RetryConfig, RetryDecision};
use super::status::VideoStatus;
use crate::engines::Options;
use crate::error::VideoError;

pub const FALLBACK_WIDTH: i32 = 512;
pub const FALLBACK_HEIGHT: i32 = 512;
pub const FALLBACK_DURATION: f64 = 5.0;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Video {
    pub id: Uuid,
    pub user_id: Uuid,

    pub user_prompt: String,
    pub prompt: String,
    pub image_url: Option<String>,
    pub engine: String,
    pub options: Json<Options>,
    pub webhook_url: Option<String>,

    pub request_id: Option<String>,
    pub status: VideoStatus,
    pub task_progress: i32,
    pub retry_count: i32,
    pub usage_id: Option<String>,
    pub usage_cancelled: bool,
    pub poll_failures: i32,

    pub submitted_at: Option<DateTime<Utc>>,
    pub retry_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Json<VideoResult>>,

    /// Bumped on every successful save; stale writers get a conflict.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewVideo {
    pub user_id: Uuid,
    pub prompt: String,
    pub image_url: Option<String>,
    pub engine: String,
    /// Already validated, defaults filled in.
    pub options: Options,
    pub webhook_url: Option<String>,
}

/// The finished artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoResult {
    pub url: String,
    pub width: i32,
    pub height: i32,
    pub duration: f64,
}

impl VideoResult {
    pub fn with_fallback_attributes(url: String) -> Self {
        Self {
            url,
            width: FALLBACK_WIDTH,
            height: FALLBACK_HEIGHT,
            duration: FALLBACK_DURATION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum ReportKind {
    Info,
    Retry,
    Error,
    Billing,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VideoReport {
    pub id: Uuid,
    pub video_id: Uuid,
    pub kind: ReportKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl VideoReport {
    pub fn new(video_id: Uuid, kind: ReportKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            video_id,
            kind,
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

/// Collapse runs of whitespace into single spaces.
pub fn normalize_prompt(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl Video {
    pub fn new(input: NewVideo, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            prompt: normalize_prompt(&input.prompt),
            user_prompt: input.prompt,
            image_url: input.image_url,
            engine: input.engine,
            options: Json(input.options),
            webhook_url: input.webhook_url,
            request_id: None,
            status: VideoStatus::Draft,
            task_progress: 0,
            retry_count: 0,
            usage_id: None,
            usage_cancelled: false,
            poll_failures: 0,
            submitted_at: None,
            retry_at: None,
            completed_at: None,
            result: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, next: VideoStatus) -> Result<(), VideoError> {
        if !self.status.can_transition_to(next) {
            return Err(VideoError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_submitted(&mut self, request_id: String, now: DateTime<Utc>) -> Result<(), VideoError> {
        self.transition(VideoStatus::Processing)?;
        self.request_id = Some(request_id);
        self.submitted_at = Some(now);
        self.retry_at = None;
        self.poll_failures = 0;
        Ok(())
    }

    /// Count a provider failure and decide between rescheduling and giving up.
    ///
    /// On retry the request id is cleared and the video goes back to `init`
    /// with `retry_at` set; once the limit is passed it becomes `error`.
    pub fn register_failure(
        &mut self,
        cfg: &RetryConfig,
        now: DateTime<Utc>,
        rng: &mut impl Rng,
    ) -> Result<RetryDecision, VideoError> {
        if self.status.is_terminal() {
            return Err(VideoError::AlreadyFinished(self.status));
        }

        self.retry_count += 1;
        let decision = RetryDecision::decide(self.retry_count, cfg, now, rng);
        match decision {
            RetryDecision::Retry { due_at, .. } => {
                self.transition(VideoStatus::Init)?;
                self.request_id = None;
                self.submitted_at = None;
                self.retry_at = Some(due_at);
                self.poll_failures = 0;
            }
            RetryDecision::Exhausted => {
                self.transition(VideoStatus::Error)?;
                self.retry_at = None;
            }
        }
        Ok(decision)
    }

    pub fn complete(&mut self, result: VideoResult, now: DateTime<Utc>) -> Result<(), VideoError> {
        self.transition(VideoStatus::Completed)?;
        self.task_progress = 100;
        self.completed_at = Some(now);
        self.result = Some(Json(result));
        self.retry_at = None;
        Ok(())
    }

    /// Take the usage id for cancellation, at most once per video.
    pub fn claim_usage_cancellation(&mut self) -> Option<String> {
        if self.usage_cancelled {
            return None;
        }
        let usage = self.usage_id.clone()?;
        self.usage_cancelled = true;
        Some(usage)
    }

    pub fn set_progress(&mut self, percentage: i32) {
        if percentage >= 0 {
            self.task_progress = percentage.min(100);
        }
    }

    /// Waiting in `init` for a (re)submission whose time has come.
    pub fn is_due_for_submission(&self, now: DateTime<Utc>) -> bool {
        self.status == VideoStatus::Init
            && self.request_id.is_none()
            && self.retry_at.map_or(true, |t| t <= now)
    }

    pub fn result_url(&self) -> Option<&str> {
        self.result.as_ref().map(|r| r.0.url.as_str())
    }
}
