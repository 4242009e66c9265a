//! Video orchestration: creation, submission, provider updates, retries and
//! finalization.
//!
//! Every state change goes through [`VideoService::modify`], a read-modify-write
//! against the versioned record. A writer that loses the race re-reads and
//! re-decides, so the webhook handler, the poll sweep and the API can act on
//! the same video concurrently without double charging or double finalizing.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::StdRng, SeedableRng};
use sqlx::PgPool;
use uuid::Uuid;

use super::model::{
    NewVideo, ReportKind, Video, VideoReport, VideoResult, FALLBACK_DURATION, FALLBACK_HEIGHT,
    FALLBACK_WIDTH,
};
use super::repo::PgVideoStore;
use super::retry::{RetryConfig, RetryDecision};
use super::status::VideoStatus;
use super::store::{ListFilter, StoreError, VideoStore};
use super::update::{ProviderUpdate, UpdateOutcome};
use crate::billing::{BillingError, BillingGate, HttpBillingGate};
use crate::config::{webhook_url, Config};
use crate::engines::{Engine, EngineDescriptor, EngineRegistry, GenerationRequest, Options};
use crate::error::VideoError;
use crate::notify::{HttpNotifier, Notifier};
use crate::storage::{
    asset_filename, AssetStore, HttpAssetStore, HttpMediaProbe, MediaAttributes, MediaProbe,
    StorageError, StoredAsset, VIDEO_DIRECTORY,
};

const MAX_WRITE_ROUNDS: usize = 3;

/// How long a submitter owns an `init` video before the sweep may take over.
const SUBMIT_LEASE_SECS: i64 = 300;

pub const INSUFFICIENT_BALANCE: &str = "Insufficient balance";
pub const UNVERIFIED_BALANCE: &str = "Unable to verify balance";

pub struct ServiceDeps {
    pub store: Arc<dyn VideoStore>,
    pub engines: EngineRegistry,
    pub billing: Arc<dyn BillingGate>,
    pub assets: Arc<dyn AssetStore>,
    pub probe: Arc<dyn MediaProbe>,
    pub notifier: Arc<dyn Notifier>,
}

impl ServiceDeps {
    /// Postgres store plus HTTP clients for providers, billing and files.
    pub fn from_config(cfg: &Config, pool: PgPool) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        Ok(Self {
            store: Arc::new(PgVideoStore::new(pool)),
            engines: EngineRegistry::with_default_engines(&cfg.providers, http.clone()),
            billing: Arc::new(HttpBillingGate::new(http.clone(), &cfg.billing)),
            assets: Arc::new(HttpAssetStore::new(http.clone(), &cfg.files)),
            probe: Arc::new(HttpMediaProbe::new(http.clone(), &cfg.files)),
            notifier: Arc::new(HttpNotifier::new(http)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub public_url: String,
    pub retry: RetryConfig,
    pub max_poll_failures: i32,
}

impl ServiceSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            public_url: cfg.public_url.clone(),
            retry: cfg.retry.clone(),
            max_poll_failures: cfg.max_poll_failures,
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            public_url: "http://localhost:8000".to_string(),
            retry: RetryConfig::default(),
            max_poll_failures: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateVideo {
    pub user_id: Uuid,
    pub prompt: String,
    pub image_url: Option<String>,
    pub engine: String,
    pub options: Options,
    pub webhook_url: Option<String>,
}

/// Result of a read-modify-write round.
enum Modified<T> {
    Saved(Video, T),
    /// The closure declined to change anything; carries the current record.
    Unchanged(Video),
}

/// Which provider request an observation is allowed to act on.
#[derive(Debug, Clone, Copy)]
enum RequestGuard<'a> {
    /// Waiting in `init` with no request in flight.
    Unsubmitted,
    /// The named request, or whatever request is in flight when `None`.
    Provider(Option<&'a str>),
}

impl RequestGuard<'_> {
    fn admits(&self, v: &Video) -> bool {
        if v.status.is_terminal() {
            return false;
        }
        match self {
            RequestGuard::Unsubmitted => v.status == VideoStatus::Init && v.request_id.is_none(),
            RequestGuard::Provider(Some(r)) => v.request_id.as_deref() == Some(*r),
            RequestGuard::Provider(None) => v.request_id.is_some(),
        }
    }
}

enum SubmitStep {
    Done(Video),
    RetryNow,
}

enum Metered {
    Charged(Video),
    Stop(SubmitStep),
}

#[derive(Clone)]
pub struct VideoService {
    store: Arc<dyn VideoStore>,
    engines: Arc<EngineRegistry>,
    billing: Arc<dyn BillingGate>,
    assets: Arc<dyn AssetStore>,
    probe: Arc<dyn MediaProbe>,
    notifier: Arc<dyn Notifier>,
    settings: Arc<ServiceSettings>,
}

impl VideoService {
    pub fn new(deps: ServiceDeps, settings: ServiceSettings) -> Self {
        Self {
            store: deps.store,
            engines: Arc::new(deps.engines),
            billing: deps.billing,
            assets: deps.assets,
            probe: deps.probe,
            notifier: deps.notifier,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn engines(&self) -> Vec<EngineDescriptor> {
        self.engines.descriptors()
    }

    // ----------------------------
    // Reads
    // ----------------------------

    /// Fetch a video, hiding it from anyone but its owner when `user_id` is given.
    pub async fn get(&self, id: Uuid, user_id: Option<Uuid>) -> Result<Video, VideoError> {
        let video = self.require(id).await?;
        match user_id {
            Some(u) if u != video.user_id => Err(VideoError::NotFound(id)),
            _ => Ok(video),
        }
    }

    pub async fn list(&self, user_id: Uuid, filter: &ListFilter) -> Result<Vec<Video>, VideoError> {
        Ok(self.store.list_for_user(user_id, filter).await?)
    }

    pub async fn reports(&self, id: Uuid, user_id: Option<Uuid>) -> Result<Vec<VideoReport>, VideoError> {
        self.get(id, user_id).await?;
        Ok(self.store.list_reports(id).await?)
    }

    pub async fn list_outstanding(
        &self,
        submitted_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Video>, VideoError> {
        Ok(self.store.list_outstanding(submitted_before, limit).await?)
    }

    pub async fn list_due_resubmissions(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Video>, VideoError> {
        Ok(self.store.list_due_resubmissions(now, limit).await?)
    }

    // ----------------------------
    // Creation and submission
    // ----------------------------

    /// Validate, persist and check the caller's balance.
    ///
    /// Invalid input creates nothing. An unfunded request leaves an `error`
    /// record behind and returns [`VideoError::InsufficientFunds`]. On success
    /// the video is in `init`, due for [`submit`](Self::submit).
    pub async fn create_video(&self, input: CreateVideo) -> Result<Video, VideoError> {
        let prompt = input.prompt.trim();
        if prompt.is_empty() {
            return Err(VideoError::Validation("prompt is required".to_string()));
        }

        let engine = self.engines.get(&input.engine)?;
        let image_url = input.image_url.filter(|u| !u.trim().is_empty());
        engine.check_inputs(image_url.as_deref())?;
        let options = engine.validate(&input.options)?;
        let price = engine.price(&options);

        let now = Utc::now();
        let mut video = Video::new(
            NewVideo {
                user_id: input.user_id,
                prompt: prompt.to_string(),
                image_url,
                engine: engine.descriptor().key.to_string(),
                options,
                webhook_url: input.webhook_url.filter(|u| !u.trim().is_empty()),
            },
            now,
        );
        video.transition(VideoStatus::Init)?;
        self.store.insert(&video).await?;

        let id = video.id;
        tracing::info!(video_id = %id, engine = %video.engine, price, "video created");

        match self.billing.check_quota(video.user_id, price).await {
            Ok(()) => {}
            Err(BillingError::InsufficientFunds(msg)) => {
                tracing::info!(video_id = %id, "quota declined");
                self.finish(id, RequestGuard::Unsubmitted, VideoStatus::Error, INSUFFICIENT_BALANCE)
                    .await?;
                return Err(VideoError::InsufficientFunds(msg));
            }
            Err(e) => {
                tracing::warn!(video_id = %id, error = %e, "quota check failed");
                self.finish(
                    id,
                    RequestGuard::Unsubmitted,
                    VideoStatus::Error,
                    &format!("{UNVERIFIED_BALANCE}: {e}"),
                )
                .await?;
                return Err(VideoError::Billing(e));
            }
        }

        let video = match self
            .modify(id, |v| {
                if !RequestGuard::Unsubmitted.admits(v) {
                    return Ok(None);
                }
                v.retry_at = Some(now);
                Ok(Some(()))
            })
            .await?
        {
            Modified::Saved(v, ()) | Modified::Unchanged(v) => v,
        };

        self.report(id, ReportKind::Info, "Video created.").await;
        Ok(video)
    }

    /// Submit a due `init` video to its provider.
    ///
    /// Charges the caller on the first attempt only. Failures go through the
    /// retry procedure; a retry that is due immediately is submitted in the
    /// same call. Videos that are not due are returned untouched.
    pub async fn submit(&self, id: Uuid) -> Result<Video, VideoError> {
        loop {
            let now = Utc::now();
            let claimed = self
                .modify(id, |v| {
                    if !v.is_due_for_submission(now) {
                        return Ok(None);
                    }
                    v.retry_at = Some(now + Duration::seconds(SUBMIT_LEASE_SECS));
                    Ok(Some(()))
                })
                .await?;

            let video = match claimed {
                Modified::Saved(v, ()) => v,
                Modified::Unchanged(v) => return Ok(v),
            };

            match self.submit_claimed(video).await? {
                SubmitStep::Done(v) => return Ok(v),
                SubmitStep::RetryNow => continue,
            }
        }
    }

    async fn submit_claimed(&self, video: Video) -> Result<SubmitStep, VideoError> {
        let id = video.id;

        let engine = match self.engines.get(&video.engine) {
            Ok(engine) => engine,
            Err(e) => {
                self.finish(id, RequestGuard::Unsubmitted, VideoStatus::Error, &e.to_string())
                    .await?;
                return Ok(SubmitStep::Done(self.require(id).await?));
            }
        };

        let video = if video.usage_id.is_none() {
            match self.meter(&video, engine.as_ref()).await? {
                Metered::Charged(v) => v,
                Metered::Stop(step) => return Ok(step),
            }
        } else {
            video
        };

        let hook = webhook_url(&self.settings.public_url, id);
        let submitted = engine
            .generate(GenerationRequest {
                prompt: &video.prompt,
                image_url: video.image_url.as_deref(),
                options: &video.options.0,
                webhook_url: Some(&hook),
            })
            .await;

        let request_id = match submitted {
            Ok(request_id) => request_id,
            Err(e) if !e.is_retryable() => {
                tracing::error!(video_id = %id, error = %e, code = e.code(), "submission rejected");
                self.finish(id, RequestGuard::Unsubmitted, VideoStatus::Error, &e.to_string())
                    .await?;
                return Ok(SubmitStep::Done(self.require(id).await?));
            }
            Err(e) => {
                tracing::warn!(video_id = %id, error = %e, code = e.code(), "submission failed");
                return self
                    .after_failure(id, RequestGuard::Unsubmitted, &e.to_string())
                    .await;
            }
        };

        let now = Utc::now();
        let saved = self
            .modify(id, |v| {
                if !RequestGuard::Unsubmitted.admits(v) {
                    return Ok(None);
                }
                v.mark_submitted(request_id.clone(), now)?;
                Ok(Some(()))
            })
            .await?;

        match saved {
            Modified::Saved(v, ()) => {
                tracing::info!(
                    video_id = %id,
                    engine = %v.engine,
                    request_id = %request_id,
                    retry_count = v.retry_count,
                    "video submitted"
                );
                self.report(id, ReportKind::Info, "Engine has been requested.").await;
                Ok(SubmitStep::Done(v))
            }
            Modified::Unchanged(v) => {
                tracing::warn!(
                    video_id = %id,
                    request_id = %request_id,
                    status = %v.status,
                    "video changed during submission, provider request dropped"
                );
                Ok(SubmitStep::Done(v))
            }
        }
    }

    /// Charge for the video before its first submission.
    async fn meter(&self, video: &Video, engine: &dyn Engine) -> Result<Metered, VideoError> {
        let id = video.id;
        let price = engine.price(&video.options.0);

        let usage_id = match self.billing.meter_cost(video.user_id, price).await {
            Ok(Some(usage_id)) => usage_id,
            Ok(None) | Err(BillingError::InsufficientFunds(_)) => {
                tracing::info!(video_id = %id, price, "metering declined");
                self.finish(id, RequestGuard::Unsubmitted, VideoStatus::Error, INSUFFICIENT_BALANCE)
                    .await?;
                return Ok(Metered::Stop(SubmitStep::Done(self.require(id).await?)));
            }
            Err(e) => {
                tracing::warn!(video_id = %id, error = %e, "metering failed");
                let reason = format!("Unable to meter usage: {e}");
                let step = self
                    .after_failure(id, RequestGuard::Unsubmitted, &reason)
                    .await?;
                return Ok(Metered::Stop(step));
            }
        };

        let saved = self
            .modify(id, |v| {
                if !RequestGuard::Unsubmitted.admits(v) || v.usage_id.is_some() {
                    return Ok(None);
                }
                v.usage_id = Some(usage_id.clone());
                Ok(Some(()))
            })
            .await?;

        match saved {
            Modified::Saved(v, ()) => {
                tracing::info!(video_id = %id, usage_id = %usage_id, price, "usage metered");
                self.report(id, ReportKind::Billing, format!("Charged {price} coins.")).await;
                Ok(Metered::Charged(v))
            }
            Modified::Unchanged(v) => {
                // never recorded on the video, so nobody else will cancel it
                self.release_usage(id, Some(usage_id)).await;
                Ok(Metered::Stop(SubmitStep::Done(v)))
            }
        }
    }

    async fn after_failure(
        &self,
        id: Uuid,
        guard: RequestGuard<'_>,
        reason: &str,
    ) -> Result<SubmitStep, VideoError> {
        let outcome = self.handle_failure(id, guard, reason).await?;
        let video = self.require(id).await?;
        if matches!(outcome, UpdateOutcome::Retrying { .. }) && video.is_due_for_submission(Utc::now()) {
            return Ok(SubmitStep::RetryNow);
        }
        Ok(SubmitStep::Done(video))
    }

    // ----------------------------
    // Provider updates
    // ----------------------------

    /// Apply a provider observation. Webhooks and the poll sweep both land here.
    ///
    /// Updates for terminal videos, or for a request other than the one in
    /// flight, are acknowledged and ignored.
    pub async fn apply_update(&self, id: Uuid, update: ProviderUpdate) -> Result<UpdateOutcome, VideoError> {
        let guard = RequestGuard::Provider(update.request_id.as_deref());
        let current = self.require(id).await?;

        if current.status.is_terminal() {
            tracing::debug!(video_id = %id, status = %current.status, "update for finished video ignored");
            return Ok(UpdateOutcome::Ignored(current.status));
        }
        if !guard.admits(&current) {
            tracing::debug!(
                video_id = %id,
                update_request = ?update.request_id,
                current_request = ?current.request_id,
                "stale provider update ignored"
            );
            return Ok(UpdateOutcome::Ignored(current.status));
        }

        match update.status {
            VideoStatus::Completed => self.finalize_success(current, update.url, guard).await,
            VideoStatus::Error => {
                let reason = update
                    .error
                    .unwrap_or_else(|| "Provider reported an error".to_string());
                self.fail_and_resubmit(id, guard, &reason).await
            }
            VideoStatus::Cancelled => {
                self.finish(id, guard, VideoStatus::Cancelled, "Provider cancelled the request.")
                    .await
            }
            VideoStatus::Draft | VideoStatus::Init | VideoStatus::Processing => {
                self.record_progress(id, guard, update.progress).await
            }
        }
    }

    async fn record_progress(
        &self,
        id: Uuid,
        guard: RequestGuard<'_>,
        progress: Option<i32>,
    ) -> Result<UpdateOutcome, VideoError> {
        let changed = self
            .modify(id, |v| {
                if !guard.admits(v) || v.status != VideoStatus::Processing {
                    return Ok(None);
                }
                let before = (v.task_progress, v.poll_failures);
                if let Some(p) = progress {
                    v.set_progress(p);
                }
                v.poll_failures = 0;
                if (v.task_progress, v.poll_failures) == before {
                    return Ok(None);
                }
                Ok(Some(()))
            })
            .await?;

        match changed {
            Modified::Unchanged(v) if v.status.is_terminal() => Ok(UpdateOutcome::Ignored(v.status)),
            _ => Ok(UpdateOutcome::InProgress),
        }
    }

    async fn fail_and_resubmit(
        &self,
        id: Uuid,
        guard: RequestGuard<'_>,
        reason: &str,
    ) -> Result<UpdateOutcome, VideoError> {
        let outcome = self.handle_failure(id, guard, reason).await?;
        if matches!(outcome, UpdateOutcome::Retrying { .. }) {
            if let Err(e) = self.submit(id).await {
                tracing::warn!(video_id = %id, error = %e, "resubmission failed");
            }
        }
        Ok(outcome)
    }

    /// Retry procedure: count the failure, then either reschedule or give up,
    /// releasing the charge.
    async fn handle_failure(
        &self,
        id: Uuid,
        guard: RequestGuard<'_>,
        reason: &str,
    ) -> Result<UpdateOutcome, VideoError> {
        let retry = &self.settings.retry;
        let now = Utc::now();

        let changed = self
            .modify(id, |v| {
                if !guard.admits(v) {
                    return Ok(None);
                }
                let mut rng = StdRng::from_entropy();
                let decision = v.register_failure(retry, now, &mut rng)?;
                let usage = match decision {
                    RetryDecision::Exhausted => v.claim_usage_cancellation(),
                    RetryDecision::Retry { .. } => None,
                };
                Ok(Some((decision, usage)))
            })
            .await?;

        match changed {
            Modified::Unchanged(v) => Ok(UpdateOutcome::Ignored(v.status)),
            Modified::Saved(v, (RetryDecision::Retry { retry_no, due_at }, _)) => {
                tracing::warn!(
                    video_id = %id,
                    retry_no,
                    max_retries = retry.max_retries,
                    due_at = %due_at,
                    reason,
                    "provider failure, retrying"
                );
                self.report(
                    id,
                    ReportKind::Retry,
                    format!("{reason}. Retrying ({retry_no}/{}).", retry.max_retries),
                )
                .await;
                Ok(UpdateOutcome::Retrying {
                    retry_count: v.retry_count,
                })
            }
            Modified::Saved(v, (RetryDecision::Exhausted, usage)) => {
                tracing::error!(video_id = %id, retry_count = v.retry_count, reason, "video failed");
                self.report(
                    id,
                    ReportKind::Error,
                    format!(
                        "Video generation failed after {} attempts: {reason}",
                        v.retry_count
                    ),
                )
                .await;
                self.release_usage(id, usage).await;
                self.notify(&v).await;
                Ok(UpdateOutcome::Failed)
            }
        }
    }

    async fn finalize_success(
        &self,
        current: Video,
        url: Option<String>,
        guard: RequestGuard<'_>,
    ) -> Result<UpdateOutcome, VideoError> {
        let id = current.id;

        let source_url = match url {
            Some(url) => Some(url),
            None => self.fetch_result_url(&current).await,
        };
        let Some(source_url) = source_url else {
            return self
                .fail_and_resubmit(id, guard, "Provider reported completion without a video")
                .await;
        };

        let hosted_url = self.rehost(&current, &source_url).await;
        let attrs = match self.probe.get_attributes(&hosted_url).await {
            Ok(attrs) => attrs,
            Err(e) => {
                tracing::warn!(video_id = %id, error = %e, "media probe failed, using defaults");
                MediaAttributes::default()
            }
        };
        let result = VideoResult {
            url: hosted_url,
            width: attrs.width.unwrap_or(FALLBACK_WIDTH),
            height: attrs.height.unwrap_or(FALLBACK_HEIGHT),
            duration: attrs.duration.unwrap_or(FALLBACK_DURATION),
        };

        let now = Utc::now();
        let changed = self
            .modify(id, |v| {
                if !guard.admits(v) {
                    return Ok(None);
                }
                v.complete(result.clone(), now)?;
                Ok(Some(()))
            })
            .await?;

        match changed {
            Modified::Saved(v, ()) => {
                tracing::info!(video_id = %id, url = %result.url, "video completed");
                self.report(id, ReportKind::Info, "Video completed.").await;
                self.notify(&v).await;
                Ok(UpdateOutcome::Completed)
            }
            Modified::Unchanged(v) => Ok(UpdateOutcome::Ignored(v.status)),
        }
    }

    async fn fetch_result_url(&self, video: &Video) -> Option<String> {
        let request_id = video.request_id.as_deref()?;
        let engine = self.engines.get(&video.engine).ok()?;
        match engine.get_result(request_id).await {
            Ok(task) => task.url,
            Err(e) => {
                tracing::warn!(video_id = %video.id, error = %e, "result lookup failed");
                None
            }
        }
    }

    /// Copy the provider's file into durable storage. Falls back to the
    /// provider URL if anything goes wrong.
    async fn rehost(&self, video: &Video, source_url: &str) -> String {
        match self.copy_to_storage(video, source_url).await {
            Ok(asset) => asset.url,
            Err(e) => {
                tracing::warn!(video_id = %video.id, error = %e, "re-hosting failed, keeping provider URL");
                self.report(
                    video.id,
                    ReportKind::Error,
                    format!("Could not re-host video, keeping provider URL: {e}"),
                )
                .await;
                source_url.to_string()
            }
        }
    }

    async fn copy_to_storage(&self, video: &Video, source_url: &str) -> Result<StoredAsset, StorageError> {
        let bytes = self.assets.download(source_url).await?;
        self.assets
            .upload(
                bytes,
                video.user_id,
                VIDEO_DIRECTORY,
                &asset_filename(video.id, source_url),
            )
            .await
    }

    // ----------------------------
    // Polling
    // ----------------------------

    /// Ask the provider about an outstanding request and apply the answer.
    pub async fn poll_video(&self, video: &Video) -> Result<UpdateOutcome, VideoError> {
        let Some(request_id) = video.request_id.as_deref() else {
            return Ok(UpdateOutcome::Ignored(video.status));
        };
        let engine = self.engines.get(&video.engine)?;

        let token = engine.get_status(request_id).await?;
        let status = VideoStatus::from_engine(&token);
        tracing::debug!(video_id = %video.id, token = %token, status = %status, "polled provider");

        let update = if status.is_terminal() {
            // the status token decides the outcome, with or without a result
            let mut update = match engine.get_result(request_id).await {
                Ok(task) => ProviderUpdate::from_task(status, task, request_id),
                Err(e) => {
                    tracing::warn!(video_id = %video.id, error = %e, "result lookup failed");
                    ProviderUpdate {
                        status,
                        url: None,
                        error: (status == VideoStatus::Error).then(|| e.to_string()),
                        progress: None,
                        request_id: Some(request_id.to_string()),
                    }
                }
            };
            if status == VideoStatus::Error && update.error.is_none() {
                update.error = Some(format!("Provider status {token}"));
            }
            update
        } else {
            ProviderUpdate {
                status,
                url: None,
                error: None,
                progress: None,
                request_id: Some(request_id.to_string()),
            }
        };

        self.apply_update(video.id, update).await
    }

    /// Count a failed poll. Too many in a row and the video is given up on.
    pub async fn record_poll_failure(
        &self,
        id: Uuid,
        request_id: &str,
        reason: &str,
    ) -> Result<UpdateOutcome, VideoError> {
        let guard = RequestGuard::Provider(Some(request_id));
        let max = self.settings.max_poll_failures;

        let changed = self
            .modify(id, |v| {
                if !guard.admits(v) {
                    return Ok(None);
                }
                v.poll_failures += 1;
                if v.poll_failures < max {
                    return Ok(Some(None));
                }
                v.transition(VideoStatus::Error)?;
                v.retry_at = None;
                Ok(Some(Some(v.claim_usage_cancellation())))
            })
            .await?;

        match changed {
            Modified::Unchanged(v) => Ok(UpdateOutcome::Ignored(v.status)),
            Modified::Saved(v, None) => {
                tracing::warn!(video_id = %id, poll_failures = v.poll_failures, reason, "poll failed");
                Ok(UpdateOutcome::InProgress)
            }
            Modified::Saved(v, Some(usage)) => {
                tracing::error!(video_id = %id, poll_failures = v.poll_failures, reason, "giving up on video");
                self.report(
                    id,
                    ReportKind::Error,
                    format!(
                        "Lost track of provider request after {} failed polls: {reason}",
                        v.poll_failures
                    ),
                )
                .await;
                self.release_usage(id, usage).await;
                self.notify(&v).await;
                Ok(UpdateOutcome::Failed)
            }
        }
    }

    // ----------------------------
    // Cancellation and terminal moves
    // ----------------------------

    /// Cancel a video on behalf of its owner (or an operator when `user_id`
    /// is `None`). Cancelled videos are never billed.
    pub async fn cancel_video(&self, id: Uuid, user_id: Option<Uuid>) -> Result<Video, VideoError> {
        let changed = self
            .modify(id, |v| {
                if user_id.is_some_and(|u| u != v.user_id) {
                    return Err(VideoError::NotFound(id));
                }
                if v.status.is_terminal() {
                    return Err(VideoError::AlreadyFinished(v.status));
                }
                v.transition(VideoStatus::Cancelled)?;
                v.retry_at = None;
                Ok(Some(v.claim_usage_cancellation()))
            })
            .await?;

        match changed {
            Modified::Saved(v, usage) => {
                tracing::info!(video_id = %id, "video cancelled");
                self.report(id, ReportKind::Info, "Video has been cancelled.").await;
                self.release_usage(id, usage).await;
                self.notify(&v).await;
                Ok(v)
            }
            Modified::Unchanged(v) => Ok(v),
        }
    }

    /// Move to a terminal status with a report, releasing any charge.
    async fn finish(
        &self,
        id: Uuid,
        guard: RequestGuard<'_>,
        next: VideoStatus,
        message: &str,
    ) -> Result<UpdateOutcome, VideoError> {
        let changed = self
            .modify(id, |v| {
                if !guard.admits(v) {
                    return Ok(None);
                }
                v.transition(next)?;
                v.retry_at = None;
                Ok(Some(v.claim_usage_cancellation()))
            })
            .await?;

        match changed {
            Modified::Unchanged(v) => Ok(UpdateOutcome::Ignored(v.status)),
            Modified::Saved(v, usage) => {
                let kind = match next {
                    VideoStatus::Error => ReportKind::Error,
                    _ => ReportKind::Info,
                };
                self.report(id, kind, message).await;
                self.release_usage(id, usage).await;
                self.notify(&v).await;
                Ok(match next {
                    VideoStatus::Cancelled => UpdateOutcome::Cancelled,
                    _ => UpdateOutcome::Failed,
                })
            }
        }
    }

    // ----------------------------
    // Plumbing
    // ----------------------------

    async fn require(&self, id: Uuid) -> Result<Video, VideoError> {
        self.store.get(id).await?.ok_or(VideoError::NotFound(id))
    }

    /// Read-modify-write with optimistic versioning.
    ///
    /// `apply` runs against a fresh copy each round. Returning `Ok(None)`
    /// leaves the record alone; `Err` aborts without writing.
    async fn modify<T, F>(&self, id: Uuid, mut apply: F) -> Result<Modified<T>, VideoError>
    where
        F: FnMut(&mut Video) -> Result<Option<T>, VideoError> + Send,
        T: Send,
    {
        let mut round = 1;
        loop {
            let mut video = self.require(id).await?;
            let Some(out) = apply(&mut video)? else {
                return Ok(Modified::Unchanged(video));
            };

            match self.store.save(&video).await {
                Ok(saved) => return Ok(Modified::Saved(saved, out)),
                Err(StoreError::Conflict(_)) if round < MAX_WRITE_ROUNDS => {
                    tracing::debug!(video_id = %id, round, "write conflict, re-reading");
                    round += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn report(&self, id: Uuid, kind: ReportKind, message: impl Into<String>) {
        let report = VideoReport::new(id, kind, message);
        if let Err(e) = self.store.add_report(&report).await {
            tracing::warn!(video_id = %id, error = %e, "failed to store report");
        }
    }

    async fn release_usage(&self, id: Uuid, usage_id: Option<String>) {
        let Some(usage_id) = usage_id else {
            return;
        };
        match self.billing.cancel_usage(&usage_id).await {
            Ok(()) => {
                tracing::info!(video_id = %id, usage_id = %usage_id, "usage cancelled");
                self.report(id, ReportKind::Billing, "Charge refunded.").await;
            }
            Err(e) => {
                tracing::error!(video_id = %id, usage_id = %usage_id, error = %e, "usage cancellation failed");
                self.report(
                    id,
                    ReportKind::Billing,
                    format!("Refund of usage {usage_id} failed: {e}"),
                )
                .await;
            }
        }
    }

    async fn notify(&self, video: &Video) {
        let Some(url) = video.webhook_url.as_deref() else {
            return;
        };
        if let Err(e) = self.notifier.notify(url, video).await {
            tracing::warn!(video_id = %video.id, error = %e, "caller notification failed");
        }
    }
}
