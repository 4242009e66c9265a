//! Provider engines.
//!
//! Every provider is reached through one [`Engine`] trait object; the
//! orchestrator resolves engines by name through [`EngineRegistry`] and never
//! branches on the concrete provider.

pub mod fal;
pub mod options;
pub mod registry;
pub mod runway;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

pub use options::{OptionRules, Options};
pub use registry::{normalize_name, EngineRegistry};

/// Static description of an engine, shared by every job that uses it.
#[derive(Debug, Clone, Serialize)]
pub struct EngineDescriptor {
    /// Registry key, e.g. `kling-video`.
    pub key: &'static str,
    /// Human readable class name.
    pub name: &'static str,
    /// Provider-side model path.
    pub application: &'static str,
    pub thumbnail_url: &'static str,
    pub text_to_video: bool,
    pub image_to_video: bool,
    /// Price in coins.
    pub price: i64,
}

/// Final state of a provider request as reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoTask {
    pub url: Option<String>,
    pub error: Option<String>,
    pub status: Option<String>,
}

/// Inputs for a single provider submission.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub prompt: &'a str,
    pub image_url: Option<&'a str>,
    pub options: &'a Options,
    pub webhook_url: Option<&'a str>,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine not found: {0}")]
    NotFound(String),

    /// The option bag (or image requirement) failed engine validation.
    #[error("{0}")]
    InvalidOptions(String),

    /// The provider rejected the request (credentials, payload, unknown id).
    #[error("provider rejected the request ({status}): {body}")]
    Submission { status: u16, body: String },

    /// Rate limiting, timeouts and 5xx responses.
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("{0} is not configured")]
    MissingCredentials(&'static str),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl EngineError {
    /// Short machine code used in reports and logs.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "UNKNOWN_ENGINE",
            EngineError::InvalidOptions(_) => "BAD_PAYLOAD",
            EngineError::Submission { .. } => "SUBMISSION_REJECTED",
            EngineError::Transient(_) => "DEPENDENCY_DOWN",
            EngineError::MalformedResponse(_) => "BAD_RESPONSE",
            EngineError::MissingCredentials(_) => "MISSING_CREDENTIALS",
            EngineError::Http(e) if e.is_timeout() => "TIMEOUT",
            EngineError::Http(_) => "DEPENDENCY_DOWN",
        }
    }

    /// Whether another submission attempt could succeed. Configuration and
    /// input problems never heal by themselves.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            EngineError::NotFound(_)
                | EngineError::InvalidOptions(_)
                | EngineError::MissingCredentials(_)
        )
    }
}

#[async_trait]
pub trait Engine: Send + Sync {
    fn descriptor(&self) -> &EngineDescriptor;

    /// Cost of one generation in coins. Deterministic and side-effect free.
    fn price(&self, _options: &Options) -> i64 {
        self.descriptor().price
    }

    /// Apply defaults for missing keys, then validate. Returns the option bag
    /// with defaults filled in; unknown keys pass through untouched.
    fn validate(&self, options: &Options) -> Result<Options, EngineError>;

    /// Reject requests the engine cannot serve at all, such as an image-only
    /// engine without a source image.
    fn check_inputs(&self, image_url: Option<&str>) -> Result<(), EngineError> {
        let d = self.descriptor();
        let has_image = image_url.map(|u| !u.trim().is_empty()).unwrap_or(false);
        if d.image_to_video && !d.text_to_video && !has_image {
            return Err(EngineError::InvalidOptions(
                "image_url is required for this engine".to_string(),
            ));
        }
        Ok(())
    }

    /// Submit a job and return the provider request id.
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, EngineError>;

    /// Current provider-side status token for a request.
    async fn get_status(&self, request_id: &str) -> Result<String, EngineError>;

    /// Final artifact location and error detail. Only meaningful once the
    /// provider status reports completion or failure.
    async fn get_result(&self, request_id: &str) -> Result<VideoTask, EngineError>;
}

/// Map a non-2xx provider response to an [`EngineError`].
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, EngineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());

    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        return Err(EngineError::Transient(format!("{status}: {body}")));
    }

    Err(EngineError::Submission {
        status: status.as_u16(),
        body,
    })
}
