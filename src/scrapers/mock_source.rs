//! Scripted in-memory market-data source for tests
//!
//! Each symbol gets a queue of page responses; an exhausted queue answers with
//! an empty page. Every trade-history request is logged with its cursor and the
//! peak number of simultaneously outstanding requests is tracked.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::MarketDataSource;
use crate::error::{SamplerError, SamplerResult};
use crate::models::{InstrumentCategory, InstrumentInfo, TradeRecord, TradeSide};

#[derive(Default)]
pub struct MockSource {
    listings: Mutex<HashMap<InstrumentCategory, SamplerResult<Vec<InstrumentInfo>>>>,
    pages: Mutex<HashMap<String, VecDeque<SamplerResult<Vec<TradeRecord>>>>>,
    volumes: Mutex<HashMap<String, f64>>,
    requests: Mutex<Vec<(String, Option<String>)>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    ticker_calls: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every trade-history request takes `latency` of (virtual) time.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn set_listing(&self, category: InstrumentCategory, listing: SamplerResult<Vec<InstrumentInfo>>) {
        self.listings.lock().insert(category, listing);
    }

    pub fn push_page(&self, symbol: &str, page: SamplerResult<Vec<TradeRecord>>) {
        self.pages
            .lock()
            .entry(symbol.to_string())
            .or_default()
            .push_back(page);
    }

    pub fn set_volume(&self, symbol: &str, volume: f64) {
        self.volumes.lock().insert(symbol.to_string(), volume);
    }

    /// `(symbol, after)` for every trade-history request, in call order.
    pub fn requests(&self) -> Vec<(String, Option<String>)> {
        self.requests.lock().clone()
    }

    pub fn history_calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn ticker_calls(&self) -> usize {
        self.ticker_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataSource for MockSource {
    async fn instruments(&self, category: InstrumentCategory) -> SamplerResult<Vec<InstrumentInfo>> {
        match self.listings.lock().remove(&category) {
            Some(listing) => listing,
            None => Ok(Vec::new()),
        }
    }

    async fn history_trades(
        &self,
        symbol: &str,
        after: Option<&str>,
        _limit: u32,
    ) -> SamplerResult<Vec<TradeRecord>> {
        self.requests
            .lock()
            .push((symbol.to_string(), after.map(str::to_string)));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let page = self
            .pages
            .lock()
            .get_mut(symbol)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| Ok(Vec::new()));

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        page
    }

    async fn official_volume(&self, symbol: &str) -> SamplerResult<Option<f64>> {
        self.ticker_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.volumes.lock().get(symbol).copied())
    }
}

pub fn trade(id: u64, timestamp_ms: i64, size: f64) -> TradeRecord {
    TradeRecord {
        trade_id: id.to_string(),
        price: 100.0,
        size,
        side: if id % 2 == 0 { TradeSide::Buy } else { TradeSide::Sell },
        timestamp_ms,
    }
}

/// Newest-first page of `count` trades with ids `first_id..first_id+count`
/// and timestamps `first_ts..`, mirroring the exchange ordering.
pub fn page(first_id: u64, first_ts: i64, count: u64, size: f64) -> Vec<TradeRecord> {
    let mut trades: Vec<TradeRecord> = (0..count)
        .map(|i| trade(first_id + i, first_ts + i as i64, size))
        .collect();
    trades.reverse();
    trades
}

pub fn listing(inst_id: &str, quote_ccy: &str, settle_ccy: &str) -> InstrumentInfo {
    InstrumentInfo {
        inst_id: inst_id.to_string(),
        quote_ccy: quote_ccy.to_string(),
        settle_ccy: settle_ccy.to_string(),
        ..InstrumentInfo::default()
    }
}

pub fn rate_limited(secs: u64) -> SamplerError {
    SamplerError::RateLimited {
        retry_after: Some(Duration::from_secs(secs)),
    }
}
