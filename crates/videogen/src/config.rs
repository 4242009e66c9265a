use std::time::Duration;

use crate::videos::retry::RetryConfig;

/// Runtime configuration, loaded once at startup and passed down explicitly.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub api_addr: Option<String>,
    /// Externally reachable base URL, used to build provider webhook URLs.
    pub public_url: String,
    pub migrate_on_startup: bool,

    pub poll_interval: Duration,
    pub poll_grace: Duration,
    pub sweep_batch: i64,
    pub max_poll_failures: i32,
    pub retry: RetryConfig,

    pub providers: ProviderConfig,
    pub billing: ServiceEndpoint,
    pub files: ServiceEndpoint,
}

#[derive(Clone, Debug, Default)]
pub struct ProviderConfig {
    pub fal_key: Option<String>,
    pub fal_queue_url: String,
    pub runway_api_key: Option<String>,
    pub runway_api_url: String,
}

#[derive(Clone, Debug, Default)]
pub struct ServiceEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
}

pub const BASE_PATH: &str = "/v1/apps/videogen";

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let api_addr = env_or_fallback("VIDEOGEN_API_ADDR", "API_ADDR")
            .or_else(|| Some("0.0.0.0:8000".to_string()))
            .and_then(|s| normalize_optional_addr(&s));

        let public_url = env_or_fallback("VIDEOGEN_PUBLIC_URL", "DOMAIN")
            .unwrap_or_else(|| "http://localhost:8000".to_string())
            .trim_end_matches('/')
            .to_string();

        let migrate_on_startup = env_bool("VIDEOGEN_MIGRATE_ON_STARTUP").unwrap_or(false);

        let poll_interval = Duration::from_secs(env_parse::<u64>("VIDEOGEN_POLL_INTERVAL_SECS", 30).max(1));
        let poll_grace = Duration::from_secs(env_parse("VIDEOGEN_POLL_GRACE_SECS", 60));
        let sweep_batch = env_parse::<i64>("VIDEOGEN_SWEEP_BATCH", 100).clamp(1, 1000);
        let max_poll_failures = env_parse::<i32>("VIDEOGEN_MAX_POLL_FAILURES", 5).max(1);

        let defaults = RetryConfig::default();
        let retry = RetryConfig {
            max_retries: env_parse("VIDEOGEN_MAX_RETRIES", defaults.max_retries).max(0),
            base_seconds: env_parse("VIDEOGEN_RETRY_BASE_SECS", defaults.base_seconds).max(0),
            max_seconds: env_parse("VIDEOGEN_RETRY_MAX_SECS", defaults.max_seconds).max(0),
            jitter_pct: defaults.jitter_pct,
        };

        let providers = ProviderConfig {
            fal_key: env_or_fallback("VIDEOGEN_FAL_KEY", "FAL_KEY"),
            fal_queue_url: env_or_fallback("VIDEOGEN_FAL_QUEUE_URL", "FAL_QUEUE_URL")
                .unwrap_or_else(|| "https://queue.fal.run".to_string()),
            runway_api_key: env_or_fallback("VIDEOGEN_RUNWAY_API_KEY", "RUNWAY_API_KEY"),
            runway_api_url: env_or_fallback("VIDEOGEN_RUNWAY_API_URL", "RUNWAY_API_URL")
                .unwrap_or_else(|| "https://api.dev.runwayml.com".to_string()),
        };

        let billing = ServiceEndpoint {
            base_url: env_or_fallback("VIDEOGEN_UFAAS_BASE_URL", "UFAAS_BASE_URL")
                .ok_or_else(|| anyhow::anyhow!("UFAAS_BASE_URL is missing"))?,
            api_key: env_or_fallback("VIDEOGEN_UFAAS_API_KEY", "UFAAS_API_KEY")
                .or_else(|| std::env::var("UFILES_API_KEY").ok()),
        };

        let files = ServiceEndpoint {
            base_url: env_or_fallback("VIDEOGEN_UFILES_BASE_URL", "UFILES_BASE_URL")
                .ok_or_else(|| anyhow::anyhow!("UFILES_BASE_URL is missing"))?,
            api_key: env_or_fallback("VIDEOGEN_UFILES_API_KEY", "UFILES_API_KEY"),
        };

        Ok(Self {
            database_url,
            api_addr,
            public_url,
            migrate_on_startup,
            poll_interval,
            poll_grace,
            sweep_batch,
            max_poll_failures,
            retry,
            providers,
            billing,
            files,
        })
    }

    /// Webhook URL handed to providers for a given video.
    pub fn webhook_url_for(&self, video_id: uuid::Uuid) -> String {
        webhook_url(&self.public_url, video_id)
    }
}

pub fn webhook_url(public_url: &str, video_id: uuid::Uuid) -> String {
    format!(
        "{}{}/videos/{}/webhook",
        public_url.trim_end_matches('/'),
        BASE_PATH,
        video_id
    )
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_url_joins_without_double_slash() {
        let id = uuid::Uuid::nil();
        assert_eq!(
            webhook_url("https://api.example.com/", id),
            format!("https://api.example.com/v1/apps/videogen/videos/{id}/webhook")
        );
    }

    #[test]
    fn disabled_addr_values_are_none() {
        assert_eq!(normalize_optional_addr("off"), None);
        assert_eq!(normalize_optional_addr("  "), None);
        assert_eq!(
            normalize_optional_addr("127.0.0.1:8000"),
            Some("127.0.0.1:8000".to_string())
        );
    }
}
