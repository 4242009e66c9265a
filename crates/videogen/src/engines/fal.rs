//! fal.ai queue engines.
//!
//! All fal models share one queue client and differ only in their model path,
//! price and option rules, so each engine is a row of [`FAL_MODELS`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{
    ensure_success, Engine, EngineDescriptor, EngineError, GenerationRequest, OptionRules,
    Options, VideoTask,
};

const KLING_THUMBNAIL: &str =
    "https://media.pixiee.io/v1/f/abe6c5ae-3d88-4d67-a5a8-d421042522a4/kling-video-icon.png";
const HAILUO_THUMBNAIL: &str =
    "https://media.pixiee.io/v1/f/8f1e0257-e2ad-454d-b81c-9d09a6aa7916/hailuo-icon.png";
const GENERIC_THUMBNAIL: &str =
    "https://media.pixiee.io/v1/f/bdefc333-f9d6-4d48-9f88-62230baa72a6/runway-icon.png";

pub struct FalModel {
    pub descriptor: EngineDescriptor,
    pub rules: OptionRules,
}

const fn model(
    key: &'static str,
    name: &'static str,
    application: &'static str,
    thumbnail_url: &'static str,
    image_to_video: bool,
    price: i64,
    rules: OptionRules,
) -> FalModel {
    FalModel {
        descriptor: EngineDescriptor {
            key,
            name,
            application,
            thumbnail_url,
            text_to_video: !image_to_video,
            image_to_video,
            price,
        },
        rules,
    }
}

pub static FAL_MODELS: &[FalModel] = &[
    model(
        "kling-video",
        "KlingVideoEngine",
        "fal-ai/kling-video/v1/standard/image-to-video",
        KLING_THUMBNAIL,
        true,
        45,
        OptionRules::Kling,
    ),
    model(
        "kling-text-video",
        "KlingTextVideoEngine",
        "fal-ai/kling-video/v1/standard/text-to-video",
        KLING_THUMBNAIL,
        false,
        45,
        OptionRules::Kling,
    ),
    model(
        "kling-pro-text-video",
        "KlingProTextVideoEngine",
        "fal-ai/kling-video/v1.6/standard/text-to-video",
        KLING_THUMBNAIL,
        false,
        45,
        OptionRules::Kling,
    ),
    model(
        "kling-pro-video",
        "KlingProVideoEngine",
        "fal-ai/kling-video/v1.6/pro/image-to-video",
        KLING_THUMBNAIL,
        true,
        150,
        OptionRules::Kling,
    ),
    model(
        "hailuo",
        "HailouEngine",
        "fal-ai/minimax/video-01/image-to-video",
        HAILUO_THUMBNAIL,
        true,
        150,
        OptionRules::Minimax,
    ),
    model(
        "hailuo-text",
        "HailouTextEngine",
        "fal-ai/minimax/video-01",
        HAILUO_THUMBNAIL,
        false,
        150,
        OptionRules::Minimax,
    ),
    model(
        "hunyuan",
        "HunyuanEngine",
        "fal-ai/hunyuan-video",
        GENERIC_THUMBNAIL,
        false,
        120,
        OptionRules::Duration,
    ),
    model(
        "hunyuan-image-to-video",
        "HunyuanImageToVideoEngine",
        "fal-ai/hunyuan-video-img2vid-lora",
        GENERIC_THUMBNAIL,
        true,
        90,
        OptionRules::Passthrough,
    ),
];

/// Thin client for the fal.ai queue REST API.
#[derive(Clone)]
pub struct FalClient {
    http: reqwest::Client,
    queue_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    request_id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Deserialize, Default)]
struct ResultResponse {
    #[serde(default)]
    video: Option<VideoFile>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    detail: Option<Value>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
struct VideoFile {
    url: Option<String>,
}

impl FalClient {
    pub fn new(http: reqwest::Client, queue_url: String, api_key: Option<String>) -> Self {
        Self {
            http,
            queue_url: queue_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn auth(&self) -> Result<String, EngineError> {
        self.api_key
            .as_deref()
            .map(|k| format!("Key {k}"))
            .ok_or(EngineError::MissingCredentials("FAL_KEY"))
    }

    pub async fn submit(
        &self,
        application: &str,
        arguments: &Map<String, Value>,
        webhook_url: Option<&str>,
    ) -> Result<String, EngineError> {
        let mut req = self
            .http
            .post(format!("{}/{}", self.queue_url, application))
            .header("Authorization", self.auth()?)
            .json(arguments);
        if let Some(hook) = webhook_url {
            req = req.query(&[("fal_webhook", hook)]);
        }

        let resp = ensure_success(req.send().await?).await?;
        let body: SubmitResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::MalformedResponse(e.to_string()))?;
        Ok(body.request_id)
    }

    pub async fn status(&self, application: &str, request_id: &str) -> Result<String, EngineError> {
        let url = format!(
            "{}/{}/requests/{}/status",
            self.queue_url,
            app_root(application),
            request_id
        );
        let resp = self
            .http
            .get(url)
            .header("Authorization", self.auth()?)
            .send()
            .await?;
        let body: StatusResponse = ensure_success(resp)
            .await?
            .json()
            .await
            .map_err(|e| EngineError::MalformedResponse(e.to_string()))?;
        Ok(body.status)
    }

    pub async fn result(&self, application: &str, request_id: &str) -> Result<VideoTask, EngineError> {
        let url = format!(
            "{}/{}/requests/{}",
            self.queue_url,
            app_root(application),
            request_id
        );
        let resp = self
            .http
            .get(url)
            .header("Authorization", self.auth()?)
            .send()
            .await?;
        let body: ResultResponse = ensure_success(resp)
            .await?
            .json()
            .await
            .map_err(|e| EngineError::MalformedResponse(e.to_string()))?;

        Ok(VideoTask {
            url: body.video.and_then(|v| v.url),
            error: body.error.or(body.detail).map(error_text),
            status: body.status,
        })
    }
}

/// fal addresses requests by `{owner}/{model}` only, without the variant path.
fn app_root(application: &str) -> String {
    application.splitn(3, '/').take(2).collect::<Vec<_>>().join("/")
}

fn error_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

pub struct FalEngine {
    model: &'static FalModel,
    client: Arc<FalClient>,
}

impl FalEngine {
    pub fn new(model: &'static FalModel, client: Arc<FalClient>) -> Self {
        Self { model, client }
    }
}

#[async_trait]
impl Engine for FalEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.model.descriptor
    }

    fn validate(&self, options: &Options) -> Result<Options, EngineError> {
        self.model.rules.apply(options)
    }

    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, EngineError> {
        let options = self.validate(request.options)?;

        let mut arguments = Map::new();
        arguments.insert("prompt".into(), Value::from(request.prompt));
        arguments.extend(options);
        if let Some(image) = request.image_url {
            arguments.insert("image_url".into(), Value::from(image));
        }

        let request_id = self
            .client
            .submit(self.model.descriptor.application, &arguments, request.webhook_url)
            .await?;

        tracing::debug!(
            engine = self.model.descriptor.key,
            request_id = %request_id,
            "fal request queued"
        );
        Ok(request_id)
    }

    async fn get_status(&self, request_id: &str) -> Result<String, EngineError> {
        self.client
            .status(self.model.descriptor.application, request_id)
            .await
    }

    async fn get_result(&self, request_id: &str) -> Result<VideoTask, EngineError> {
        self.client
            .result(self.model.descriptor.application, request_id)
            .await
    }
}
