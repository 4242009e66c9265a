use async_trait::async_trait;

use crate::api::models::VideoView;
use crate::videos::model::Video;

/// Tells the caller that a video reached a terminal state.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, url: &str, video: &Video) -> Result<(), reqwest::Error>;
}

/// POSTs the public view of the video as JSON to the caller's webhook URL.
#[derive(Clone)]
pub struct HttpNotifier {
    http: reqwest::Client,
}

impl HttpNotifier {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

/// Same schema the HTTP API returns.
pub fn notification_body(video: &Video) -> VideoView {
    VideoView::from(video.clone())
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, url: &str, video: &Video) -> Result<(), reqwest::Error> {
        self.http
            .post(url)
            .json(&notification_body(video))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
