//! Bounded fan-out of per-instrument sampling
//!
//! Instruments are processed in chunks of `concurrency`. Inside a chunk, those
//! whose window is already cached are resolved inline first; the cache misses
//! are then dispatched together behind a semaphore of the same capacity and
//! awaited as a group. One instrument failing never cancels its siblings.

use chrono::Utc;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use super::cache::SampleCache;
use super::extrapolate::{self, divergence_ratio, is_divergent};
use super::fetcher::TradeHistoryFetcher;
use crate::error::{SamplerError, SamplerResult};
use crate::models::{Instrument, SampleWindow, TimeWindow};
use crate::scrapers::MarketDataSource;
use crate::storage::{UpsertOutcome, VolumeDb};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOrigin {
    Cache,
    Network,
}

/// What happened to one instrument
#[derive(Debug)]
pub struct TaskReport {
    pub instrument: Instrument,
    pub origin: SampleOrigin,
    pub result: SamplerResult<UpsertOutcome>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cache_hits: usize,
    pub reports: Vec<TaskReport>,
}

impl RunSummary {
    fn record(&mut self, report: TaskReport) {
        match &report.result {
            Ok(UpsertOutcome::Inserted) => self.inserted += 1,
            Ok(UpsertOutcome::SkippedDuplicate) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
        if report.origin == SampleOrigin::Cache {
            self.cache_hits += 1;
        }
        self.reports.push(report);
    }

    pub fn total(&self) -> usize {
        self.reports.len()
    }
}

pub struct ConcurrencyCoordinator {
    source: Arc<dyn MarketDataSource>,
    fetcher: TradeHistoryFetcher,
    cache: Arc<SampleCache>,
    store: Arc<VolumeDb>,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
}

impl ConcurrencyCoordinator {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        fetcher: TradeHistoryFetcher,
        cache: Arc<SampleCache>,
        store: Arc<VolumeDb>,
        concurrency: usize,
    ) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            source,
            fetcher,
            cache,
            store,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn run(&self, instruments: &[Instrument], window: &TimeWindow) -> RunSummary {
        let mut summary = RunSummary::default();

        for chunk in instruments.chunks(self.concurrency) {
            let mut misses: Vec<(&Instrument, SampleWindow)> = Vec::with_capacity(chunk.len());

            for instrument in chunk {
                let sample_window = window.for_symbol(&instrument.symbol);
                if self.cache.contains(&sample_window) {
                    let result = self.process(instrument, &sample_window).await;
                    summary.record(self.report(instrument, SampleOrigin::Cache, result));
                } else {
                    misses.push((instrument, sample_window));
                }
            }

            let dispatched = misses.iter().map(|(instrument, sample_window)| async move {
                let result = match self.semaphore.acquire().await {
                    Ok(_permit) => self.process(instrument, sample_window).await,
                    Err(_) => Err(SamplerError::PoolClosed),
                };
                self.report(instrument, SampleOrigin::Network, result)
            });

            for report in join_all(dispatched).await {
                summary.record(report);
            }
        }

        info!(
            total = summary.total(),
            inserted = summary.inserted,
            skipped = summary.skipped,
            failed = summary.failed,
            cache_hits = summary.cache_hits,
            "Sampling run finished"
        );
        summary
    }

    /// Cache lookup, fetch on miss, extrapolate, persist.
    async fn process(
        &self,
        instrument: &Instrument,
        window: &SampleWindow,
    ) -> SamplerResult<UpsertOutcome> {
        let raw = match self.cache.lookup(window)? {
            Some(hit) => {
                info!(symbol = %instrument.symbol, start_ms = window.start_ms, end_ms = window.end_ms, "Loaded trades from cache");
                hit
            }
            None => {
                info!(symbol = %instrument.symbol, start_ms = window.start_ms, end_ms = window.end_ms, "Requesting trades from API");
                let fetched = self.fetcher.fetch(window).await?;
                self.cache.store(&fetched)?;
                fetched
            }
        };

        let official = self.official_volume(&instrument.symbol).await;
        let sample = extrapolate::volume_sample(instrument, &raw, official, Utc::now())?;

        info!(
            symbol = %sample.symbol,
            trades = sample.observed_trade_count,
            scaled_trades = sample.scaled_trade_count,
            scaled_volume = sample.scaled_volume,
            official_volume = sample.official_volume,
            "Extrapolated to 24h"
        );
        if let Some(ratio) = divergence_ratio(sample.scaled_volume, sample.official_volume) {
            if is_divergent(ratio) {
                warn!(symbol = %sample.symbol, ratio, "Scaled volume diverges from official volume");
            }
        }

        Ok(self.store.upsert(&sample).await?)
    }

    /// Cross-check figure only; failures degrade to 0.0.
    async fn official_volume(&self, symbol: &str) -> f64 {
        match self.source.official_volume(symbol).await {
            Ok(Some(v)) => v,
            Ok(None) => {
                warn!(symbol, "Ticker returned no data, official volume set to 0");
                0.0
            }
            Err(e) => {
                warn!(symbol, error = %e, "Official volume unavailable, using 0");
                0.0
            }
        }
    }

    fn report(
        &self,
        instrument: &Instrument,
        origin: SampleOrigin,
        result: SamplerResult<UpsertOutcome>,
    ) -> TaskReport {
        if let Err(e) = &result {
            error!(symbol = %instrument.symbol, category = %instrument.category, error = %e, "Sampling task failed");
        }
        TaskReport {
            instrument: instrument.clone(),
            origin,
            result,
        }
    }
}
