//! Top-level sampling run: discover, filter, window, fan out.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::cache::SampleCache;
use super::coordinator::{ConcurrencyCoordinator, RunSummary};
use super::fetcher::TradeHistoryFetcher;
use crate::config::SamplerConfig;
use crate::error::{SamplerError, SamplerResult};
use crate::models::{Instrument, InstrumentCategory, InstrumentInfo, TimeWindow};
use crate::scrapers::{MarketDataSource, OkxRestClient};
use crate::storage::VolumeDb;

/// Keep listings settled (derivatives) or quoted (spot) in `target_ccy`.
pub fn filter_instruments(
    listing: &[InstrumentInfo],
    category: InstrumentCategory,
    target_ccy: &str,
) -> Vec<Instrument> {
    listing
        .iter()
        .filter(|info| {
            let ccy = match category {
                InstrumentCategory::Spot => &info.quote_ccy,
                InstrumentCategory::Futures | InstrumentCategory::Swap => &info.settle_ccy,
            };
            ccy.eq_ignore_ascii_case(target_ccy)
        })
        .map(|info| Instrument::new(info.inst_id.clone(), category))
        .collect()
}

pub fn selected_categories(
    want_spot: bool,
    want_futures: bool,
    want_swap: bool,
) -> Vec<InstrumentCategory> {
    [
        (want_spot, InstrumentCategory::Spot),
        (want_futures, InstrumentCategory::Futures),
        (want_swap, InstrumentCategory::Swap),
    ]
    .into_iter()
    .filter_map(|(wanted, category)| wanted.then_some(category))
    .collect()
}

pub struct SamplingOrchestrator {
    source: Arc<dyn MarketDataSource>,
    coordinator: ConcurrencyCoordinator,
    target_currency: String,
    window_hours: f64,
}

impl SamplingOrchestrator {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        coordinator: ConcurrencyCoordinator,
        target_currency: impl Into<String>,
        window_hours: f64,
    ) -> Self {
        Self {
            source,
            coordinator,
            target_currency: target_currency.into(),
            window_hours,
        }
    }

    /// Wire the OKX client, cache directory and database from configuration.
    pub fn from_config(config: &SamplerConfig) -> anyhow::Result<Self> {
        let source: Arc<dyn MarketDataSource> = Arc::new(OkxRestClient::from_config(config)?);
        let store = Arc::new(VolumeDb::new(&config.db_path, &config.exchange)?);
        let cache = Arc::new(SampleCache::new(&config.cache_dir));
        let fetcher = TradeHistoryFetcher::new(source.clone(), config.fetch.clone());
        let coordinator =
            ConcurrencyCoordinator::new(source.clone(), fetcher, cache, store, config.concurrency);

        Ok(Self::new(
            source,
            coordinator,
            config.target_currency.clone(),
            config.window_hours,
        ))
    }

    /// Sample every matching instrument of the selected categories over the
    /// trailing window ending now.
    pub async fn run(
        &self,
        want_spot: bool,
        want_futures: bool,
        want_swap: bool,
    ) -> SamplerResult<RunSummary> {
        let window = TimeWindow::trailing(Utc::now().timestamp_millis(), self.window_hours)?;
        let categories = selected_categories(want_spot, want_futures, want_swap);
        self.run_for_window(&categories, &window).await
    }

    pub async fn run_for_window(
        &self,
        categories: &[InstrumentCategory],
        window: &TimeWindow,
    ) -> SamplerResult<RunSummary> {
        let instruments = self.discover(categories).await;
        if instruments.is_empty() {
            error!(
                categories = ?categories,
                target_ccy = %self.target_currency,
                "No instruments found, nothing to sample"
            );
            return Err(SamplerError::NoInstruments);
        }

        info!(
            instruments = instruments.len(),
            start_ms = window.start_ms,
            end_ms = window.end_ms,
            concurrency = self.coordinator.concurrency(),
            "Starting sampling run"
        );
        Ok(self.coordinator.run(&instruments, window).await)
    }

    /// Sample an explicit instrument list, skipping discovery.
    pub async fn sample_instruments(&self, instruments: &[Instrument]) -> SamplerResult<RunSummary> {
        if instruments.is_empty() {
            return Err(SamplerError::NoInstruments);
        }
        let window = TimeWindow::trailing(Utc::now().timestamp_millis(), self.window_hours)?;
        Ok(self.coordinator.run(instruments, &window).await)
    }

    /// Listing failures are logged and contribute no instruments.
    pub async fn discover(&self, categories: &[InstrumentCategory]) -> Vec<Instrument> {
        let mut found = Vec::new();
        for &category in categories {
            match self.source.instruments(category).await {
                Ok(listing) => {
                    let kept = filter_instruments(&listing, category, &self.target_currency);
                    info!(
                        category = %category,
                        listed = listing.len(),
                        kept = kept.len(),
                        "Discovered instruments"
                    );
                    found.extend(kept);
                }
                Err(e) => {
                    warn!(category = %category, error = %e, "Instrument discovery failed");
                }
            }
        }
        found
    }
}
