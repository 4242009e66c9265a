//! Durable re-hosting of finished videos and media attribute probing, both
//! backed by the UFiles service.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::config::ServiceEndpoint;

/// Directory finished videos are uploaded into.
pub const VIDEO_DIRECTORY: &str = "videogens";

/// UFiles permission level for public read access.
const PUBLIC_READ: i32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("asset request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("asset service returned {status}: {body}")]
    Api { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoredAsset {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MediaAttributes {
    #[serde(default)]
    pub width: Option<i32>,
    #[serde(default)]
    pub height: Option<i32>,
    #[serde(default)]
    pub duration: Option<f64>,
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn download(&self, url: &str) -> Result<Vec<u8>, StorageError>;

    async fn upload(
        &self,
        bytes: Vec<u8>,
        user_id: Uuid,
        directory: &str,
        filename: &str,
    ) -> Result<StoredAsset, StorageError>;
}

#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn get_attributes(&self, url: &str) -> Result<MediaAttributes, StorageError>;
}

async fn ensure_ok(resp: reqwest::Response) -> Result<reqwest::Response, StorageError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StorageError::Api {
        status: status.as_u16(),
        body,
    })
}

#[derive(Clone)]
pub struct HttpAssetStore {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpAssetStore {
    pub fn new(http: reqwest::Client, endpoint: &ServiceEndpoint) -> Self {
        Self {
            http,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
        }
    }
}

#[async_trait]
impl AssetStore for HttpAssetStore {
    async fn download(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let resp = ensure_ok(self.http.get(url).send().await?).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn upload(
        &self,
        bytes: Vec<u8>,
        user_id: Uuid,
        directory: &str,
        filename: &str,
    ) -> Result<StoredAsset, StorageError> {
        let path = format!("{directory}/{filename}");
        let part = Part::bytes(bytes)
            .file_name(path.clone())
            .mime_str("video/mp4")?;
        let form = Form::new()
            .part("file", part)
            .text("filename", path)
            .text("user_id", user_id.to_string())
            .text(
                "public_permission",
                json!({ "permission": PUBLIC_READ }).to_string(),
            );

        let mut req = self
            .http
            .post(format!("{}/upload", self.base_url))
            .multipart(form);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }

        let resp = ensure_ok(req.send().await?).await?;
        Ok(resp.json().await?)
    }
}

#[derive(Clone)]
pub struct HttpMediaProbe {
    http: reqwest::Client,
    app_url: String,
    api_key: Option<String>,
}

impl HttpMediaProbe {
    pub fn new(http: reqwest::Client, endpoint: &ServiceEndpoint) -> Self {
        // the ffmpeg app lives beside the file endpoint, not under it
        let base = endpoint.base_url.trim_end_matches('/');
        let app_url = base.strip_suffix("/f").unwrap_or(base).to_string();
        Self {
            http,
            app_url,
            api_key: endpoint.api_key.clone(),
        }
    }
}

#[async_trait]
impl MediaProbe for HttpMediaProbe {
    async fn get_attributes(&self, url: &str) -> Result<MediaAttributes, StorageError> {
        let mut req = self
            .http
            .post(format!("{}/apps/ffmpeg/details", self.app_url))
            .json(&json!({ "url": url }));
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }

        let resp = ensure_ok(req.send().await?).await?;
        Ok(resp.json().await?)
    }
}

/// File name for a re-hosted video, taken from the source URL when it has one.
pub fn asset_filename(video_id: Uuid, source_url: &str) -> String {
    let last = source_url
        .split(['?', '#'])
        .next()
        .and_then(|p| p.rsplit('/').next())
        .filter(|s| !s.is_empty() && s.contains('.'));
    match last {
        Some(name) => format!("{video_id}-{name}"),
        None => format!("{video_id}.mp4"),
    }
}
