mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{harness, Harness, PROVIDER_URL};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use videogen::api::{router, ApiState, USER_HEADER};
use videogen::videos::VideoStatus;

const BASE: &str = "/v1/apps/videogen";

fn app(h: &Harness) -> Router {
    router(ApiState {
        videos: h.service.clone(),
    })
}

async fn call(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

fn get(path: &str, user: Option<Uuid>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(format!("{BASE}{path}"));
    if let Some(u) = user {
        builder = builder.header(USER_HEADER, u.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

fn post(path: &str, user: Option<Uuid>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("{BASE}{path}"))
        .header("content-type", "application/json");
    if let Some(u) = user {
        builder = builder.header(USER_HEADER, u.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let h = harness();
    let (status, body) = call(app(&h), get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("ok"));
}

#[tokio::test]
async fn engines_are_listed() {
    let h = harness();
    let (status, body) = call(app(&h), get("/engines", None)).await;

    assert_eq!(status, StatusCode::OK);
    let keys: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["kling-text-video", "kling-video", "runway"]);
    assert_eq!(body[0]["price"], json!(45));
    assert_eq!(body[0]["text_to_video"], json!(true));
    assert_eq!(body[2]["price"], json!(75));
    assert_eq!(body[2]["image_to_video"], json!(true));
}

#[tokio::test]
async fn create_requires_caller() {
    let h = harness();
    let (status, body) = call(
        app(&h),
        post("/videos", None, json!({ "prompt": "a cat", "engine": "kling-text-video" })),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn create_returns_201_with_init_video() {
    let h = harness();
    let (status, body) = call(
        app(&h),
        post(
            "/videos",
            Some(h.user_id),
            json!({
                "prompt": "a lighthouse in a storm",
                "engine": "kling-text-video",
                "options": { "duration": 10 }
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "init");
    assert_eq!(body["prompt"], "a lighthouse in a storm");
    assert_eq!(body["options"]["duration"], json!(10));
    assert_eq!(body["user_id"], json!(h.user_id));
    assert!(body.get("usage_id").is_none(), "billing fields stay internal");
}

#[tokio::test]
async fn create_maps_errors_to_statuses() {
    let h = harness();

    let (status, body) = call(
        app(&h),
        post("/videos", Some(h.user_id), json!({ "prompt": "x", "engine": "sora" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "UNKNOWN_ENGINE");
    assert_eq!(body["error"], "Engine not found: sora");

    let (status, body) = call(
        app(&h),
        post(
            "/videos",
            Some(h.user_id),
            json!({ "prompt": "x", "engine": "kling-text-video", "options": { "aspect_ratio": "4:3" } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "aspect_ratio must be 16:9 or 9:16 or 1:1");

    h.billing.set_quota(Some(3.0));
    let (status, body) = call(
        app(&h),
        post("/videos", Some(h.user_id), json!({ "prompt": "x", "engine": "kling-text-video" })),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["code"], "INSUFFICIENT_FUNDS");
    assert_eq!(body["error"], "You have only 3 coins, while you need 45 coins.");
}

#[tokio::test]
async fn videos_are_private_to_their_owner() {
    let h = harness();
    let video = h.submitted().await;

    let (status, body) = call(app(&h), get(&format!("/videos/{}", video.id), Some(h.user_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processing");

    let (status, body) = call(
        app(&h),
        get(&format!("/videos/{}", video.id), Some(Uuid::new_v4())),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn list_pages_with_cursor() {
    let h = harness();
    for _ in 0..3 {
        h.create().await;
    }

    let (status, first) = call(app(&h), get("/videos?limit=2", Some(h.user_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["items"].as_array().unwrap().len(), 2);

    let cursor_at = first["next_cursor_created_at"].as_str().unwrap();
    let cursor_id = first["next_cursor_id"].as_str().unwrap();
    let path = format!(
        "/videos?limit=2&cursor_created_at={}&cursor_id={cursor_id}",
        cursor_at.replace('+', "%2B")
    );
    let (_, second) = call(app(&h), get(&path, Some(h.user_id))).await;
    assert_eq!(second["items"].as_array().unwrap().len(), 1);
    assert!(second["next_cursor_id"].is_null());

    let (_, filtered) = call(app(&h), get("/videos?status=completed", Some(h.user_id))).await;
    assert!(filtered["items"].as_array().unwrap().is_empty());
    assert!(filtered["next_cursor_id"].is_null());
}

#[tokio::test]
async fn reports_trail_is_returned() {
    let h = harness();
    let video = h.submitted().await;

    let (status, body) = call(
        app(&h),
        get(&format!("/videos/{}/reports", video.id), Some(h.user_id)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let messages: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["message"].as_str().unwrap())
        .collect();
    assert_eq!(
        messages,
        vec!["Video created.", "Charged 45 coins.", "Engine has been requested."]
    );
}

#[tokio::test]
async fn cancel_endpoint_then_conflict() {
    let h = harness();
    let video = h.submitted().await;
    let path = format!("/videos/{}/cancel", video.id);

    let (status, body) = call(app(&h), post(&path, Some(h.user_id), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, body) = call(app(&h), post(&path, Some(h.user_id), json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ALREADY_FINISHED");
}

#[tokio::test]
async fn webhook_completes_video() {
    let h = harness();
    let video = h.submitted().await;

    let (status, body) = call(
        app(&h),
        post(
            &format!("/videos/{}/webhook", video.id),
            None,
            json!({
                "request_id": "req-1",
                "status": "OK",
                "payload": { "video": { "url": PROVIDER_URL } }
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));
    assert_eq!(h.video(video.id).await.status, VideoStatus::Completed);
}

#[tokio::test]
async fn webhook_for_cancelled_video_is_acknowledged() {
    let h = harness();
    let video = h.submitted().await;
    h.service.cancel_video(video.id, None).await.unwrap();

    let (status, body) = call(
        app(&h),
        post(
            &format!("/videos/{}/webhook", video.id),
            None,
            json!({ "request_id": "req-1", "status": "OK" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "Video has been cancelled." }));
    assert_eq!(h.video(video.id).await.status, VideoStatus::Cancelled);
}

#[tokio::test]
async fn webhook_for_unknown_video_is_404() {
    let h = harness();
    let (status, _) = call(
        app(&h),
        post(
            &format!("/videos/{}/webhook", Uuid::new_v4()),
            None,
            json!({ "status": "OK" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
