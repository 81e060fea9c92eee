//! Sampler configuration
//!
//! Defaults reproduce the production run: OKX v5, ten instruments in flight,
//! a trailing one-hour window, 100 trades per page with a 900ms pause.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const ENV_PREFIX: &str = "VOLUME_SAMPLER_";

/// Pagination and retry behaviour of one instrument's trade-history fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Trades requested per page (exchange maximum is 100)
    pub page_limit: u32,
    /// Pause after every page
    pub page_delay: Duration,
    /// Network/timeout/5xx retries allowed per page before the instrument fails
    pub max_network_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Wait applied on HTTP 429 when no `Retry-After` header is present
    pub default_retry_after: Duration,
    /// `None` keeps retrying a rate-limited page until the server relents
    pub max_rate_limit_retries: Option<u32>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_limit: 100,
            page_delay: Duration::from_millis(900),
            max_network_retries: 5,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            default_retry_after: Duration::from_secs(1),
            max_rate_limit_retries: None,
        }
    }
}

impl FetchConfig {
    /// Exponential backoff for the n-th (1-based) consecutive network failure.
    pub fn network_backoff(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        self.retry_base_delay
            .saturating_mul(1u32 << shift)
            .min(self.retry_max_delay)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub api_base_url: String,
    pub db_path: String,
    pub cache_dir: String,
    /// Instruments sampled concurrently (chunk size and semaphore capacity)
    pub concurrency: usize,
    pub window_hours: f64,
    /// Settlement (derivatives) or quote (spot) currency to keep
    pub target_currency: String,
    /// Value written to the `exchange` column
    pub exchange: String,
    pub request_timeout: Duration,
    pub fetch: FetchConfig,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://www.okx.com/api/v5".to_string(),
            db_path: "trades_data_okx.db".to_string(),
            cache_dir: "cache".to_string(),
            concurrency: 10,
            window_hours: 1.0,
            target_currency: "USDT".to_string(),
            exchange: "OKX".to_string(),
            request_timeout: Duration::from_secs(4),
            fetch: FetchConfig::default(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, name))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.trim().parse().ok())
}

impl SamplerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_var("API_BASE_URL") {
            cfg.api_base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = env_var("DB_PATH") {
            cfg.db_path = v;
        }
        if let Some(v) = env_var("CACHE_DIR") {
            cfg.cache_dir = v;
        }
        if let Some(n) = env_parse::<usize>("CONCURRENCY") {
            if n > 0 {
                cfg.concurrency = n;
            }
        }
        if let Some(h) = env_parse::<f64>("WINDOW_HOURS") {
            if h > 0.0 {
                cfg.window_hours = h;
            }
        }
        if let Some(v) = env_var("TARGET_CCY") {
            cfg.target_currency = v.to_ascii_uppercase();
        }
        if let Some(v) = env_var("EXCHANGE") {
            cfg.exchange = v;
        }
        if let Some(ms) = env_parse::<u64>("REQUEST_TIMEOUT_MS") {
            cfg.request_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<u32>("PAGE_LIMIT") {
            cfg.fetch.page_limit = n.clamp(1, 100);
        }
        if let Some(ms) = env_parse::<u64>("PAGE_DELAY_MS") {
            cfg.fetch.page_delay = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<u32>("MAX_NETWORK_RETRIES") {
            cfg.fetch.max_network_retries = n;
        }
        if let Some(ms) = env_parse::<u64>("RETRY_BASE_DELAY_MS") {
            cfg.fetch.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("RETRY_MAX_DELAY_MS") {
            cfg.fetch.retry_max_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("DEFAULT_RETRY_AFTER_MS") {
            cfg.fetch.default_retry_after = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<u32>("MAX_RATE_LIMIT_RETRIES") {
            cfg.fetch.max_rate_limit_retries = Some(n);
        }

        cfg
    }
}
