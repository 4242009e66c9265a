//! Billing gate: quota check, metering and usage cancellation against the
//! UFaaS wallet service.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::config::ServiceEndpoint;

const ASSET: &str = "coin";
const VARIANT: &str = "video";

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("{0}")]
    InsufficientFunds(String),

    #[error("billing request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("billing service returned {status}: {body}")]
    Api { status: u16, body: String },
}

#[async_trait]
pub trait BillingGate: Send + Sync {
    /// Spendable balance for the user, `None` when the user has no enrollment.
    async fn get_quota(&self, user_id: Uuid) -> Result<Option<f64>, BillingError>;

    /// Record a charge. Returns the usage id, or `None` if the service did not
    /// create one.
    async fn meter_cost(&self, user_id: Uuid, amount: i64) -> Result<Option<String>, BillingError>;

    async fn cancel_usage(&self, usage_id: &str) -> Result<(), BillingError>;

    async fn check_quota(&self, user_id: Uuid, amount: i64) -> Result<(), BillingError> {
        let quota = self.get_quota(user_id).await?;
        match quota {
            Some(q) if q >= amount as f64 => Ok(()),
            other => Err(insufficient_funds(other.unwrap_or(0.0), amount)),
        }
    }
}

pub fn insufficient_funds(quota: f64, price: i64) -> BillingError {
    BillingError::InsufficientFunds(format!(
        "You have only {quota} coins, while you need {price} coins."
    ))
}

#[derive(Clone)]
pub struct HttpBillingGate {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct QuotaResponse {
    #[serde(default)]
    quota: Option<f64>,
}

#[derive(Deserialize)]
struct UsageResponse {
    #[serde(default)]
    uid: Option<String>,
}

impl HttpBillingGate {
    pub fn new(http: reqwest::Client, endpoint: &ServiceEndpoint) -> Self {
        Self {
            http,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
        }
    }

    fn with_key(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("x-api-key", key),
            None => req,
        }
    }
}

async fn ensure_ok(resp: reqwest::Response) -> Result<reqwest::Response, BillingError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BillingError::Api {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl BillingGate for HttpBillingGate {
    async fn get_quota(&self, user_id: Uuid) -> Result<Option<f64>, BillingError> {
        let user = user_id.to_string();
        let req = self
            .http
            .get(format!("{}/api/v1/saas/enrollments/quotas", self.base_url))
            .query(&[("user_id", user.as_str()), ("asset", ASSET), ("variant", VARIANT)]);

        let resp = ensure_ok(self.with_key(req).send().await?).await?;
        let body: QuotaResponse = resp.json().await?;
        Ok(body.quota)
    }

    async fn meter_cost(&self, user_id: Uuid, amount: i64) -> Result<Option<String>, BillingError> {
        let req = self
            .http
            .post(format!("{}/api/v1/saas/usages", self.base_url))
            .json(&json!({
                "user_id": user_id,
                "asset": ASSET,
                "amount": amount,
                "variant": VARIANT,
            }));

        let resp = ensure_ok(self.with_key(req).send().await?).await?;
        let body: UsageResponse = resp.json().await?;
        Ok(body.uid)
    }

    async fn cancel_usage(&self, usage_id: &str) -> Result<(), BillingError> {
        let req = self
            .http
            .delete(format!("{}/api/v1/saas/usages/{}", self.base_url, usage_id));
        ensure_ok(self.with_key(req).send().await?).await?;
        Ok(())
    }
}
