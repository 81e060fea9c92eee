//! Cursor-paginated trade-history retrieval for one instrument and window
//!
//! Pages are requested newest-to-oldest with `after = <oldest accepted id>`.
//! The walk stops on an empty page or on a page that contributes nothing new
//! at or after `start_ms`. Pagination within one instrument is strictly
//! sequential.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::error::{SamplerError, SamplerResult};
use crate::models::{RawSample, SampleWindow, TradeRecord};
use crate::scrapers::MarketDataSource;

/// Diagnostics for one fetch. Never used as a pass/fail condition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchStats {
    pub pages: u32,
    pub valid: u64,
    /// Records older than the window or already seen
    pub invalid: u64,
    pub rate_limited: u32,
    pub network_retries: u32,
}

impl FetchStats {
    pub fn invalid_ratio(&self) -> f64 {
        let total = self.valid + self.invalid;
        if total == 0 {
            0.0
        } else {
            self.invalid as f64 / total as f64
        }
    }
}

pub struct TradeHistoryFetcher {
    source: Arc<dyn MarketDataSource>,
    config: FetchConfig,
}

impl TradeHistoryFetcher {
    pub fn new(source: Arc<dyn MarketDataSource>, config: FetchConfig) -> Self {
        Self { source, config }
    }

    pub async fn fetch(&self, window: &SampleWindow) -> SamplerResult<RawSample> {
        self.fetch_with_stats(window).await.map(|(sample, _)| sample)
    }

    pub async fn fetch_with_stats(
        &self,
        window: &SampleWindow,
    ) -> SamplerResult<(RawSample, FetchStats)> {
        let symbol = window.symbol.as_str();
        let mut accepted: Vec<TradeRecord> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut stats = FetchStats::default();

        loop {
            let page = self
                .fetch_page(symbol, cursor.as_deref(), &mut stats)
                .await?;
            stats.pages += 1;

            if page.is_empty() {
                debug!(symbol, page = stats.pages, "No more trades");
                break;
            }

            let page_len = page.len();
            let fresh: Vec<TradeRecord> = page
                .into_iter()
                .filter(|t| t.timestamp_ms >= window.start_ms && seen.insert(t.trade_id.clone()))
                .collect();

            stats.invalid += (page_len - fresh.len()) as u64;
            stats.valid += fresh.len() as u64;

            if fresh.is_empty() {
                debug!(
                    symbol,
                    page = stats.pages,
                    invalid_ratio = format_args!("{:.2}%", stats.invalid_ratio() * 100.0),
                    "Page added nothing inside the window"
                );
                break;
            }

            accepted.extend(fresh);
            accepted.sort_by_key(|t| t.timestamp_ms);
            cursor = accepted.first().map(|t| t.trade_id.clone());

            debug!(
                symbol,
                page = stats.pages,
                accepted = accepted.len(),
                cursor = cursor.as_deref().unwrap_or_default(),
                oldest_ts = accepted.first().map(|t| t.timestamp_ms).unwrap_or_default(),
                invalid_ratio = format_args!("{:.2}%", stats.invalid_ratio() * 100.0),
                "Page accepted"
            );

            sleep(self.config.page_delay).await;
        }

        info!(
            symbol,
            trades = accepted.len(),
            pages = stats.pages,
            invalid_ratio = format_args!("{:.2}%", stats.invalid_ratio() * 100.0),
            "Fetched trade history"
        );

        Ok((
            RawSample {
                window: window.clone(),
                trades: accepted,
            },
            stats,
        ))
    }

    /// One page, retried on the same cursor until it succeeds or a ceiling is hit.
    async fn fetch_page(
        &self,
        symbol: &str,
        after: Option<&str>,
        stats: &mut FetchStats,
    ) -> SamplerResult<Vec<TradeRecord>> {
        let mut network_failures = 0u32;
        let mut rate_limited = 0u32;

        loop {
            match self
                .source
                .history_trades(symbol, after, self.config.page_limit)
                .await
            {
                Ok(page) => return Ok(page),
                Err(SamplerError::RateLimited { retry_after }) => {
                    rate_limited += 1;
                    stats.rate_limited += 1;
                    if let Some(max) = self.config.max_rate_limit_retries {
                        if rate_limited > max {
                            return Err(SamplerError::RetriesExhausted {
                                symbol: symbol.to_string(),
                                attempts: rate_limited,
                                last: Box::new(SamplerError::RateLimited { retry_after }),
                            });
                        }
                    }
                    let wait = retry_after.unwrap_or(self.config.default_retry_after);
                    warn!(symbol, wait_ms = wait.as_millis() as u64, "Rate limited, waiting");
                    sleep(wait).await;
                }
                Err(e) if e.is_retryable() => {
                    network_failures += 1;
                    stats.network_retries += 1;
                    if network_failures > self.config.max_network_retries {
                        return Err(SamplerError::RetriesExhausted {
                            symbol: symbol.to_string(),
                            attempts: network_failures,
                            last: Box::new(e),
                        });
                    }
                    let backoff = self.config.network_backoff(network_failures);
                    warn!(
                        symbol,
                        attempt = network_failures,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Page request failed, retrying"
                    );
                    sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
