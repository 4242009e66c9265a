use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::service::VideoService;
use super::update::UpdateOutcome;
use crate::config::Config;
use crate::error::VideoError;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval: Duration,
    /// Head start given to webhooks before a request is polled.
    pub grace: Duration,
    pub batch: i64,
}

impl SweepConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            interval: cfg.poll_interval,
            grace: cfg.poll_grace,
            batch: cfg.sweep_batch,
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            grace: Duration::from_secs(60),
            batch: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    /// Outstanding requests polled.
    pub checked: usize,
    /// Polls that moved a video (completed, failed, retried, cancelled).
    pub updated: usize,
    /// Due retries handed back to the provider.
    pub resubmitted: usize,
    /// Per-video errors, logged and counted against the video.
    pub failed: usize,
}

/// Periodic safety net for lost webhooks and scheduled retries.
#[derive(Clone)]
pub struct PollSweeper {
    service: VideoService,
    cfg: SweepConfig,
}

impl PollSweeper {
    pub fn new(service: VideoService, cfg: SweepConfig) -> Self {
        Self { service, cfg }
    }

    /// Sweep on every tick until `cancel` fires. The first tick is immediate.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.cfg.interval.as_secs(),
            grace_secs = self.cfg.grace.as_secs(),
            batch = self.cfg.batch,
            "poll sweep started"
        );

        // tokio panics on a zero period
        let mut interval = tokio::time::interval(self.cfg.interval.max(MIN_INTERVAL));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("poll sweep stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep_once().await {
                        Ok(s) if s == SweepSummary::default() => {
                            tracing::debug!("poll sweep: nothing to do");
                        }
                        Ok(s) => {
                            tracing::info!(
                                checked = s.checked,
                                updated = s.updated,
                                resubmitted = s.resubmitted,
                                failed = s.failed,
                                "poll sweep finished"
                            );
                        }
                        Err(e) => tracing::error!(error = %e, "poll sweep failed"),
                    }
                }
            }
        }
    }

    /// One pass: poll outstanding requests, then resubmit due retries.
    ///
    /// Only listing errors abort the pass; a failure on one video never
    /// affects the others.
    pub async fn sweep_once(&self) -> Result<SweepSummary, VideoError> {
        let mut summary = SweepSummary::default();
        let grace = chrono::Duration::from_std(self.cfg.grace).unwrap_or(chrono::Duration::zero());
        let cutoff = Utc::now() - grace;

        for video in self.service.list_outstanding(cutoff, self.cfg.batch).await? {
            summary.checked += 1;
            match self.service.poll_video(&video).await {
                Ok(UpdateOutcome::InProgress | UpdateOutcome::Ignored(_)) => {}
                Ok(_) => summary.updated += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(video_id = %video.id, error = %e, "poll failed");
                    if let Some(request_id) = video.request_id.as_deref() {
                        let reason = e.to_string();
                        if let Err(e) = self
                            .service
                            .record_poll_failure(video.id, request_id, &reason)
                            .await
                        {
                            tracing::error!(video_id = %video.id, error = %e, "could not record poll failure");
                        }
                    }
                }
            }
        }

        for video in self
            .service
            .list_due_resubmissions(Utc::now(), self.cfg.batch)
            .await?
        {
            match self.service.submit(video.id).await {
                Ok(_) => summary.resubmitted += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(video_id = %video.id, error = %e, "resubmission failed");
                }
            }
        }

        Ok(summary)
    }
}
