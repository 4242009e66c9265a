use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::options::{int_option, str_option, DEFAULT_DURATION, DEFAULT_RUNWAY_RATIO};
use super::{
    ensure_success, Engine, EngineDescriptor, EngineError, GenerationRequest, OptionRules,
    Options, VideoTask,
};

const API_VERSION: &str = "2024-11-06";
const MODEL: &str = "gen3a_turbo";

static DESCRIPTOR: EngineDescriptor = EngineDescriptor {
    key: "runway",
    name: "RunwayEngine",
    application: "runway-gen3",
    thumbnail_url:
        "https://media.pixiee.io/v1/f/bdefc333-f9d6-4d48-9f88-62230baa72a6/runway-icon.png",
    text_to_video: false,
    image_to_video: true,
    price: 75,
};

/// Runway Gen-3 image-to-video. Runway has no webhooks, so its jobs finish
/// through the poll sweep.
pub struct RunwayEngine {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct CreatedTask {
    id: String,
}

#[derive(Deserialize)]
struct Task {
    status: String,
    #[serde(default)]
    output: Option<Vec<String>>,
    #[serde(default)]
    failure: Option<Value>,
}

impl RunwayEngine {
    pub fn new(http: reqwest::Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder, EngineError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(EngineError::MissingCredentials("RUNWAY_API_KEY"))?;
        Ok(self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(key)
            .header("X-Runway-Version", API_VERSION))
    }

    async fn task(&self, request_id: &str) -> Result<Task, EngineError> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/v1/tasks/{request_id}"))?
            .send()
            .await?;
        ensure_success(resp)
            .await?
            .json()
            .await
            .map_err(|e| EngineError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl Engine for RunwayEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        &DESCRIPTOR
    }

    fn validate(&self, options: &Options) -> Result<Options, EngineError> {
        OptionRules::Runway.apply(options)
    }

    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, EngineError> {
        self.check_inputs(request.image_url)?;
        let options = self.validate(request.options)?;

        let body = json!({
            "model": MODEL,
            "promptText": request.prompt,
            "promptImage": request.image_url,
            "duration": int_option(&options, "duration", DEFAULT_DURATION),
            "ratio": str_option(&options, "ratio", DEFAULT_RUNWAY_RATIO),
        });

        let resp = self
            .request(reqwest::Method::POST, "/v1/image_to_video")?
            .json(&body)
            .send()
            .await?;
        let created: CreatedTask = ensure_success(resp)
            .await?
            .json()
            .await
            .map_err(|e| EngineError::MalformedResponse(e.to_string()))?;

        tracing::debug!(request_id = %created.id, "runway task created");
        Ok(created.id)
    }

    async fn get_status(&self, request_id: &str) -> Result<String, EngineError> {
        Ok(self.task(request_id).await?.status)
    }

    async fn get_result(&self, request_id: &str) -> Result<VideoTask, EngineError> {
        let task = self.task(request_id).await?;
        Ok(VideoTask {
            url: task.output.and_then(|o| o.into_iter().next()),
            error: task.failure.map(|f| match f {
                Value::String(s) => s,
                other => other.to_string(),
            }),
            status: Some(task.status),
        })
    }
}
