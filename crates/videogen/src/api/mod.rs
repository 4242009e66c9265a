use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use uuid::Uuid;

use crate::config::BASE_PATH;
use crate::engines::{EngineDescriptor, Options};
use crate::error::VideoError;
use crate::videos::{
    CreateVideo, ListCursor, ListFilter, VideoReport, VideoService, VideoStatus, WebhookPayload,
};

pub mod models;

use models::{CreateVideoRequest, ListVideosQuery, ListVideosResponse, VideoView};

/// Header carrying the authenticated caller, set by the gateway in front of
/// this service.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct ApiState {
    pub videos: VideoService,
}

pub fn router(state: ApiState) -> Router {
    let routes = Router::new()
        .route("/health", get(health))
        .route("/engines", get(list_engines))
        .route("/videos", get(list_videos).post(create_video))
        .route("/videos/:id", get(get_video))
        .route("/videos/:id/reports", get(get_reports))
        .route("/videos/:id/cancel", post(cancel_video))
        .route("/videos/:id/webhook", post(webhook))
        .with_state(state);

    Router::new().nest(BASE_PATH, routes)
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Video(#[from] VideoError),

    #[error("{0}")]
    Unauthorized(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            ApiError::Video(err) => {
                let status = match err {
                    VideoError::Validation(_) | VideoError::EngineNotFound(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    VideoError::InsufficientFunds(_) => StatusCode::PAYMENT_REQUIRED,
                    VideoError::NotFound(_) => StatusCode::NOT_FOUND,
                    VideoError::AlreadyFinished(_)
                    | VideoError::InvalidTransition { .. }
                    | VideoError::Store(crate::videos::StoreError::Conflict(_)) => {
                        StatusCode::CONFLICT
                    }
                    VideoError::Engine(_) | VideoError::Billing(_) => StatusCode::BAD_GATEWAY,
                    VideoError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };

                let message = if status.is_server_error() {
                    tracing::error!(error = %err, "request failed");
                    "An internal error occurred".to_string()
                } else {
                    err.to_string()
                };
                (status, err.code(), message)
            }
        };

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Caller identity taken from [`USER_HEADER`].
pub struct Caller(pub Uuid);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_HEADER} header")))?;

        Uuid::parse_str(raw.trim())
            .map(Caller)
            .map_err(|_| ApiError::Unauthorized(format!("invalid {USER_HEADER} header")))
    }
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn list_engines(State(state): State<ApiState>) -> Json<Vec<EngineDescriptor>> {
    Json(state.videos.engines())
}

pub async fn create_video(
    State(state): State<ApiState>,
    Caller(user_id): Caller,
    Json(body): Json<CreateVideoRequest>,
) -> ApiResult<(StatusCode, Json<VideoView>)> {
    let video = state
        .videos
        .create_video(CreateVideo {
            user_id,
            prompt: body.prompt,
            image_url: body.image_url,
            engine: body.engine,
            options: body.options.unwrap_or_else(Options::new),
            webhook_url: body.webhook_url,
        })
        .await?;

    let service = state.videos.clone();
    let id = video.id;
    tokio::spawn(async move {
        if let Err(e) = service.submit(id).await {
            tracing::warn!(video_id = %id, error = %e, "submission failed");
        }
    });

    Ok((StatusCode::CREATED, Json(video.into())))
}

pub async fn list_videos(
    State(state): State<ApiState>,
    Caller(user_id): Caller,
    Query(q): Query<ListVideosQuery>,
) -> ApiResult<Json<ListVideosResponse>> {
    let cursor = match (q.cursor_created_at, q.cursor_id) {
        (Some(created_at), Some(id)) => Some(ListCursor { created_at, id }),
        _ => None,
    };
    let limit = q.limit.unwrap_or(20).clamp(1, 100);
    let filter = ListFilter {
        status: q.status,
        limit,
        cursor,
    };

    let items = state.videos.list(user_id, &filter).await?;

    // a short page is the last one
    let (next_cursor_created_at, next_cursor_id) = match items.last() {
        Some(v) if items.len() as i64 == limit => (Some(v.created_at), Some(v.id)),
        _ => (None, None),
    };

    Ok(Json(ListVideosResponse {
        items: items.into_iter().map(VideoView::from).collect(),
        next_cursor_created_at,
        next_cursor_id,
    }))
}

pub async fn get_video(
    State(state): State<ApiState>,
    Caller(user_id): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<VideoView>> {
    let video = state.videos.get(id, Some(user_id)).await?;
    Ok(Json(video.into()))
}

pub async fn get_reports(
    State(state): State<ApiState>,
    Caller(user_id): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<VideoReport>>> {
    Ok(Json(state.videos.reports(id, Some(user_id)).await?))
}

pub async fn cancel_video(
    State(state): State<ApiState>,
    Caller(user_id): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<VideoView>> {
    let video = state.videos.cancel_video(id, Some(user_id)).await?;
    Ok(Json(video.into()))
}

/// Provider callback. Always acknowledged once the video exists, so providers
/// stop redelivering.
pub async fn webhook(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(body): Json<WebhookPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    let video = state.videos.get(id, None).await?;
    tracing::info!(video_id = %id, status = ?body.status, request_id = ?body.request_id, "webhook received");

    if video.status == VideoStatus::Cancelled {
        return Ok(Json(json!({ "message": "Video has been cancelled." })));
    }

    match state.videos.apply_update(id, body.into_update()).await {
        Ok(outcome) => tracing::debug!(video_id = %id, ?outcome, "webhook applied"),
        Err(e) => tracing::warn!(video_id = %id, error = %e, "webhook update failed"),
    }
    Ok(Json(json!({})))
}
