#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use videogen::billing::{BillingError, BillingGate};
use videogen::config::ProviderConfig;
use videogen::engines::{
    Engine, EngineDescriptor, EngineError, EngineRegistry, GenerationRequest, Options, VideoTask,
};
use videogen::notify::Notifier;
use videogen::storage::{AssetStore, MediaAttributes, MediaProbe, StorageError, StoredAsset};
use videogen::videos::retry::RetryConfig;
use videogen::videos::{
    CreateVideo, MemoryVideoStore, ServiceDeps, ServiceSettings, Video, VideoService, VideoStatus,
    VideoStore,
};

pub const TEXT_ENGINE: &str = "kling-text-video";
pub const IMAGE_ENGINE: &str = "kling-video";
/// Real provider engine, usable offline for validation only.
pub const UNSCRIPTED_ENGINE: &str = "runway";
pub const PROVIDER_URL: &str = "https://fal.media/files/out.mp4";

/// Connects to `TEST_DATABASE_URL`, migrates and empties the tables.
/// Returns `None` when no test database is configured.
pub async fn setup_db() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations failed");

    sqlx::query("TRUNCATE TABLE video_reports, videos CASCADE")
        .execute(&pool)
        .await
        .expect("truncate failed");

    Some(pool)
}

fn real_engine(key: &str) -> Arc<dyn Engine> {
    EngineRegistry::with_default_engines(&ProviderConfig::default(), reqwest::Client::new())
        .get(key)
        .expect("engine is registered")
}

// ----------------------------
// Engine
// ----------------------------

/// Engine with real descriptor and option rules but scripted provider calls.
pub struct ScriptedEngine {
    inner: Arc<dyn Engine>,
    submissions: Mutex<VecDeque<Result<String, EngineError>>>,
    statuses: Mutex<HashMap<String, Result<String, String>>>,
    results: Mutex<HashMap<String, VideoTask>>,
    rejected_results: Mutex<HashMap<String, (u16, String)>>,
    generated: AtomicUsize,
    webhooks: Mutex<Vec<Option<String>>>,
}

impl ScriptedEngine {
    pub fn wrapping(key: &str) -> Self {
        Self {
            inner: real_engine(key),
            submissions: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(HashMap::new()),
            results: Mutex::new(HashMap::new()),
            rejected_results: Mutex::new(HashMap::new()),
            generated: AtomicUsize::new(0),
            webhooks: Mutex::new(Vec::new()),
        }
    }

    /// Queue the outcome of the next `generate` call. Unscripted calls
    /// succeed with `req-<n>`.
    pub fn push_submission(&self, outcome: Result<String, EngineError>) {
        self.submissions.lock().unwrap().push_back(outcome);
    }

    pub fn set_status(&self, request_id: &str, token: &str) {
        self.statuses
            .lock()
            .unwrap()
            .insert(request_id.to_string(), Ok(token.to_string()));
    }

    pub fn fail_status(&self, request_id: &str, message: &str) {
        self.statuses
            .lock()
            .unwrap()
            .insert(request_id.to_string(), Err(message.to_string()));
    }

    pub fn set_result(&self, request_id: &str, task: VideoTask) {
        self.results
            .lock()
            .unwrap()
            .insert(request_id.to_string(), task);
    }

    /// Make `get_result` answer with a provider rejection, as fal does for failed requests.
    pub fn reject_result(&self, request_id: &str, status: u16, body: &str) {
        self.rejected_results
            .lock()
            .unwrap()
            .insert(request_id.to_string(), (status, body.to_string()));
    }

    pub fn generate_calls(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }

    pub fn webhooks(&self) -> Vec<Option<String>> {
        self.webhooks.lock().unwrap().clone()
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        self.inner.descriptor()
    }

    fn validate(&self, options: &Options) -> Result<Options, EngineError> {
        self.inner.validate(options)
    }

    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, EngineError> {
        let n = self.generated.fetch_add(1, Ordering::SeqCst) + 1;
        self.webhooks
            .lock()
            .unwrap()
            .push(request.webhook_url.map(str::to_string));

        let scripted = self.submissions.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(format!("req-{n}")))
    }

    async fn get_status(&self, request_id: &str) -> Result<String, EngineError> {
        match self.statuses.lock().unwrap().get(request_id).cloned() {
            Some(Ok(token)) => Ok(token),
            Some(Err(message)) => Err(EngineError::Transient(message)),
            None => Ok("IN_PROGRESS".to_string()),
        }
    }

    async fn get_result(&self, request_id: &str) -> Result<VideoTask, EngineError> {
        if let Some((status, body)) = self.rejected_results.lock().unwrap().get(request_id).cloned() {
            return Err(EngineError::Submission { status, body });
        }
        Ok(self
            .results
            .lock()
            .unwrap()
            .get(request_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ----------------------------
// Billing
// ----------------------------

pub struct FakeBilling {
    quota: Mutex<Option<f64>>,
    quota_down: AtomicBool,
    meter_outcomes: Mutex<VecDeque<Result<Option<String>, BillingError>>>,
    metered: Mutex<Vec<(Uuid, i64)>>,
    cancelled: Mutex<Vec<String>>,
}

impl Default for FakeBilling {
    fn default() -> Self {
        Self {
            quota: Mutex::new(Some(1000.0)),
            quota_down: AtomicBool::new(false),
            meter_outcomes: Mutex::new(VecDeque::new()),
            metered: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }
}

impl FakeBilling {
    pub fn set_quota(&self, quota: Option<f64>) {
        *self.quota.lock().unwrap() = quota;
    }

    pub fn set_quota_down(&self, down: bool) {
        self.quota_down.store(down, Ordering::SeqCst);
    }

    /// Queue the outcome of the next `meter_cost` call. Unscripted calls
    /// return `usage-<n>`.
    pub fn push_meter(&self, outcome: Result<Option<String>, BillingError>) {
        self.meter_outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn metered(&self) -> Vec<(Uuid, i64)> {
        self.metered.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl BillingGate for FakeBilling {
    async fn get_quota(&self, _user_id: Uuid) -> Result<Option<f64>, BillingError> {
        if self.quota_down.load(Ordering::SeqCst) {
            return Err(BillingError::Api {
                status: 503,
                body: "wallet unavailable".to_string(),
            });
        }
        Ok(*self.quota.lock().unwrap())
    }

    async fn meter_cost(&self, user_id: Uuid, amount: i64) -> Result<Option<String>, BillingError> {
        let scripted = self.meter_outcomes.lock().unwrap().pop_front();
        if let Some(outcome) = scripted {
            return outcome;
        }
        let mut metered = self.metered.lock().unwrap();
        metered.push((user_id, amount));
        Ok(Some(format!("usage-{}", metered.len())))
    }

    async fn cancel_usage(&self, usage_id: &str) -> Result<(), BillingError> {
        self.cancelled.lock().unwrap().push(usage_id.to_string());
        Ok(())
    }
}

// ----------------------------
// Files
// ----------------------------

#[derive(Default)]
pub struct FakeAssets {
    broken: AtomicBool,
    uploads: Mutex<Vec<(Uuid, String, String)>>,
}

impl FakeAssets {
    pub fn break_uploads(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub fn uploads(&self) -> Vec<(Uuid, String, String)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetStore for FakeAssets {
    async fn download(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        Ok(url.as_bytes().to_vec())
    }

    async fn upload(
        &self,
        _bytes: Vec<u8>,
        user_id: Uuid,
        directory: &str,
        filename: &str,
    ) -> Result<StoredAsset, StorageError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StorageError::Api {
                status: 500,
                body: "disk full".to_string(),
            });
        }
        self.uploads
            .lock()
            .unwrap()
            .push((user_id, directory.to_string(), filename.to_string()));
        Ok(StoredAsset {
            url: format!("https://files.test/{directory}/{filename}"),
        })
    }
}

pub struct FakeProbe {
    attrs: Mutex<Option<MediaAttributes>>,
}

impl Default for FakeProbe {
    fn default() -> Self {
        Self {
            attrs: Mutex::new(Some(MediaAttributes {
                width: Some(1280),
                height: Some(720),
                duration: Some(5.04),
            })),
        }
    }
}

impl FakeProbe {
    pub fn break_probe(&self) {
        *self.attrs.lock().unwrap() = None;
    }
}

#[async_trait]
impl MediaProbe for FakeProbe {
    async fn get_attributes(&self, _url: &str) -> Result<MediaAttributes, StorageError> {
        self.attrs.lock().unwrap().clone().ok_or(StorageError::Api {
            status: 502,
            body: "ffmpeg unavailable".to_string(),
        })
    }
}

// ----------------------------
// Caller notifications
// ----------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, Uuid, VideoStatus)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, Uuid, VideoStatus)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, url: &str, video: &Video) -> Result<(), reqwest::Error> {
        self.sent
            .lock()
            .unwrap()
            .push((url.to_string(), video.id, video.status));
        Ok(())
    }
}

// ----------------------------
// Harness
// ----------------------------

pub struct Harness {
    pub service: VideoService,
    pub store: Arc<MemoryVideoStore>,
    pub engine: Arc<ScriptedEngine>,
    pub image_engine: Arc<ScriptedEngine>,
    pub billing: Arc<FakeBilling>,
    pub assets: Arc<FakeAssets>,
    pub probe: Arc<FakeProbe>,
    pub notifier: Arc<RecordingNotifier>,
    pub user_id: Uuid,
}

/// Two retries, no backoff, five poll failures.
pub fn test_settings() -> ServiceSettings {
    ServiceSettings {
        public_url: "https://videogen.test".to_string(),
        retry: RetryConfig {
            max_retries: 2,
            base_seconds: 0,
            max_seconds: 0,
            jitter_pct: 0.0,
        },
        max_poll_failures: 5,
    }
}

pub fn harness() -> Harness {
    harness_with(test_settings())
}

pub fn harness_with(settings: ServiceSettings) -> Harness {
    let store = Arc::new(MemoryVideoStore::new());
    let engine = Arc::new(ScriptedEngine::wrapping(TEXT_ENGINE));
    let image_engine = Arc::new(ScriptedEngine::wrapping(IMAGE_ENGINE));
    let billing = Arc::new(FakeBilling::default());
    let assets = Arc::new(FakeAssets::default());
    let probe = Arc::new(FakeProbe::default());
    let notifier = Arc::new(RecordingNotifier::default());

    let mut engines = EngineRegistry::new();
    engines.register(engine.clone());
    engines.register(image_engine.clone());
    engines.register(real_engine(UNSCRIPTED_ENGINE));

    let service = VideoService::new(
        ServiceDeps {
            store: store.clone(),
            engines,
            billing: billing.clone(),
            assets: assets.clone(),
            probe: probe.clone(),
            notifier: notifier.clone(),
        },
        settings,
    );

    Harness {
        service,
        store,
        engine,
        image_engine,
        billing,
        assets,
        probe,
        notifier,
        user_id: Uuid::new_v4(),
    }
}

impl Harness {
    pub fn request(&self) -> CreateVideo {
        CreateVideo {
            user_id: self.user_id,
            prompt: "a red fox running through snow".to_string(),
            image_url: None,
            engine: TEXT_ENGINE.to_string(),
            options: Options::new(),
            webhook_url: Some("https://caller.test/hooks/video".to_string()),
        }
    }

    pub async fn create(&self) -> Video {
        self.service
            .create_video(self.request())
            .await
            .expect("create_video")
    }

    /// Created and handed to the provider.
    pub async fn submitted(&self) -> Video {
        let video = self.create().await;
        self.service.submit(video.id).await.expect("submit")
    }

    pub async fn video(&self, id: Uuid) -> Video {
        self.store.get(id).await.unwrap().expect("video exists")
    }

    pub async fn report_messages(&self, id: Uuid) -> Vec<String> {
        self.store
            .list_reports(id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.message)
            .collect()
    }
}
