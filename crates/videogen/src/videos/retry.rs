use chrono::{DateTime, Duration, Utc};
use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Provider failures tolerated before the video is marked `error`.
    pub max_retries: i32,
    pub base_seconds: i64,
    pub max_seconds: i64,
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        // base 0: the first resubmission goes out straight away
        Self {
            max_retries: 5,
            base_seconds: 0,
            max_seconds: 5 * 60,
            jitter_pct: 0.20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resubmit as attempt `retry_no` once `due_at` has passed.
    Retry {
        retry_no: i32,
        due_at: DateTime<Utc>,
    },
    Exhausted,
}

impl RetryDecision {
    pub fn decide(
        retry_no: i32,
        cfg: &RetryConfig,
        now: DateTime<Utc>,
        rng: &mut impl Rng,
    ) -> Self {
        if retry_no > cfg.max_retries {
            return RetryDecision::Exhausted;
        }
        let delay = next_delay_seconds(retry_no, cfg, rng);
        RetryDecision::Retry {
            retry_no,
            due_at: now + Duration::seconds(delay),
        }
    }
}

pub fn next_delay_seconds(retry_no: i32, cfg: &RetryConfig, rng: &mut impl Rng) -> i64 {
    let exp = (retry_no.max(1) as u32).saturating_sub(1);

    // too large a shift saturates; the cap below handles it
    let pow2 = 1_i64.checked_shl(exp).unwrap_or(i64::MAX);
    let delay = cfg.base_seconds.saturating_mul(pow2).min(cfg.max_seconds);
    if delay <= 0 {
        return 0;
    }

    let jitter_range = (delay as f64) * cfg.jitter_pct;
    let jitter = if jitter_range > 0.0 {
        rng.gen_range(-jitter_range..=jitter_range)
    } else {
        0.0
    };

    ((delay as f64 + jitter).round() as i64).clamp(0, cfg.max_seconds)
}
