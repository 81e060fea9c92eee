//! End-to-end sampling runs against a scripted market-data source, a temp
//! cache directory and a temp SQLite file.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

use volume_sampler::models::{
    Instrument, InstrumentCategory, InstrumentInfo, TimeWindow, TradeRecord, TradeSide,
};
use volume_sampler::sampling::{
    ConcurrencyCoordinator, SampleCache, SampleOrigin, SamplingOrchestrator, TradeHistoryFetcher,
};
use volume_sampler::scrapers::MarketDataSource;
use volume_sampler::storage::{UpsertOutcome, VolumeDb};
use volume_sampler::{FetchConfig, SamplerError, SamplerResult};

const HOUR_MS: i64 = 3_600_000;
const END_MS: i64 = 1_717_002_000_000;

#[derive(Default)]
struct ScriptedExchange {
    listings: Mutex<HashMap<InstrumentCategory, Vec<InstrumentInfo>>>,
    pages: Mutex<HashMap<String, VecDeque<SamplerResult<Vec<TradeRecord>>>>>,
    history_calls: AtomicUsize,
}

impl ScriptedExchange {
    fn list(&self, category: InstrumentCategory, inst_id: &str, ccy: &str) {
        let info = match category {
            InstrumentCategory::Spot => InstrumentInfo {
                inst_id: inst_id.into(),
                quote_ccy: ccy.into(),
                ..Default::default()
            },
            _ => InstrumentInfo {
                inst_id: inst_id.into(),
                settle_ccy: ccy.into(),
                ..Default::default()
            },
        };
        self.listings.lock().entry(category).or_default().push(info);
    }

    fn script(&self, symbol: &str, page: SamplerResult<Vec<TradeRecord>>) {
        self.pages
            .lock()
            .entry(symbol.to_string())
            .or_default()
            .push_back(page);
    }

    fn calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataSource for ScriptedExchange {
    async fn instruments(&self, category: InstrumentCategory) -> SamplerResult<Vec<InstrumentInfo>> {
        Ok(self
            .listings
            .lock()
            .get(&category)
            .cloned()
            .unwrap_or_default())
    }

    async fn history_trades(
        &self,
        symbol: &str,
        _after: Option<&str>,
        _limit: u32,
    ) -> SamplerResult<Vec<TradeRecord>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        self.pages
            .lock()
            .get_mut(symbol)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn official_volume(&self, _symbol: &str) -> SamplerResult<Option<f64>> {
        Ok(Some(1000.0))
    }
}

/// Newest-first, the way the exchange returns a page.
fn trades(first_id: u64, first_ts: i64, sizes: &[f64]) -> Vec<TradeRecord> {
    let mut out: Vec<TradeRecord> = sizes
        .iter()
        .enumerate()
        .map(|(i, &size)| TradeRecord {
            trade_id: (first_id + i as u64).to_string(),
            price: 3000.0,
            size,
            side: TradeSide::Buy,
            timestamp_ms: first_ts + i as i64 * 1000,
        })
        .collect();
    out.reverse();
    out
}

struct Pipeline {
    exchange: Arc<ScriptedExchange>,
    orchestrator: SamplingOrchestrator,
    store: Arc<VolumeDb>,
    _cache_dir: TempDir,
    _db: NamedTempFile,
}

fn pipeline() -> Pipeline {
    let exchange = Arc::new(ScriptedExchange::default());
    let cache_dir = TempDir::new().unwrap();
    let db = NamedTempFile::new().unwrap();

    let store = Arc::new(VolumeDb::new(db.path().to_str().unwrap(), "OKX").unwrap());
    let cache = Arc::new(SampleCache::new(cache_dir.path()));
    let fetcher = TradeHistoryFetcher::new(
        exchange.clone(),
        FetchConfig {
            page_delay: Duration::from_millis(1),
            ..FetchConfig::default()
        },
    );
    let coordinator =
        ConcurrencyCoordinator::new(exchange.clone(), fetcher, cache, store.clone(), 10);
    let orchestrator = SamplingOrchestrator::new(exchange.clone(), coordinator, "USDT", 1.0);

    Pipeline {
        exchange,
        orchestrator,
        store,
        _cache_dir: cache_dir,
        _db: db,
    }
}

#[tokio::test]
async fn test_one_hour_sample_scales_to_a_day() {
    let p = pipeline();
    let window = TimeWindow::trailing(END_MS, 1.0).unwrap();
    p.exchange.list(InstrumentCategory::Spot, "ETH-USDT", "USDT");

    // 120 trades totalling 50.0, split over two pages
    p.exchange
        .script("ETH-USDT", Ok(trades(1000, window.start_ms + 60_000, &[0.25; 100])));
    p.exchange
        .script("ETH-USDT", Ok(trades(900, window.start_ms, &[1.25; 20])));

    let summary = p
        .orchestrator
        .run_for_window(&[InstrumentCategory::Spot], &window)
        .await
        .unwrap();
    assert_eq!(summary.inserted, 1);

    let row = p
        .store
        .latest("ETH-USDT", InstrumentCategory::Spot)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.observed_trades, Some(120));
    assert_eq!(row.observed_volume, Some(50.0));
    assert_eq!(row.total_trades, 2880);
    assert_eq!(row.total_volume, 1200.0);
    assert_eq!(row.official_volume, 1000.0);
    assert_eq!(row.trade_type, "SPOT");
    assert_eq!(p.exchange.calls(), 3);
}

#[tokio::test]
async fn test_repeat_window_served_from_cache() {
    let p = pipeline();
    let window = TimeWindow::trailing(END_MS, 1.0).unwrap();
    p.exchange.list(InstrumentCategory::Swap, "BTC-USDT-SWAP", "USDT");
    p.exchange
        .script("BTC-USDT-SWAP", Ok(trades(1, window.start_ms, &[1.0; 10])));

    let first = p
        .orchestrator
        .run_for_window(&[InstrumentCategory::Swap], &window)
        .await
        .unwrap();
    assert_eq!(first.reports[0].origin, SampleOrigin::Network);
    let calls = p.exchange.calls();

    let second = p
        .orchestrator
        .run_for_window(&[InstrumentCategory::Swap], &window)
        .await
        .unwrap();
    assert_eq!(second.reports[0].origin, SampleOrigin::Cache);
    assert!(matches!(
        second.reports[0].result,
        Ok(UpsertOutcome::SkippedDuplicate)
    ));
    assert_eq!(p.exchange.calls(), calls);
}

#[tokio::test]
async fn test_first_stored_sample_wins() {
    let p = pipeline();
    let inst = Instrument::new("ETH-USDT-SWAP", InstrumentCategory::Futures);

    let first_window = TimeWindow::trailing(END_MS - 2 * HOUR_MS, 1.0).unwrap();
    p.exchange
        .script(&inst.symbol, Ok(trades(1, first_window.start_ms, &[2.0; 5])));
    let second_window = TimeWindow::trailing(END_MS, 1.0).unwrap();

    // Not listed yet
    let unlisted = p
        .orchestrator
        .run_for_window(&[InstrumentCategory::Futures], &first_window)
        .await;
    assert!(matches!(unlisted, Err(SamplerError::NoInstruments)));

    p.exchange.list(InstrumentCategory::Futures, &inst.symbol, "USDT");
    let first = p
        .orchestrator
        .run_for_window(&[InstrumentCategory::Futures], &first_window)
        .await
        .unwrap();
    assert_eq!(first.inserted, 1);

    p.exchange
        .script(&inst.symbol, Ok(trades(100, second_window.start_ms, &[9.0; 50])));
    let second = p
        .orchestrator
        .run_for_window(&[InstrumentCategory::Futures], &second_window)
        .await
        .unwrap();
    assert_eq!(second.skipped, 1);
    assert_eq!(second.reports[0].origin, SampleOrigin::Network);

    let row = p
        .store
        .latest(&inst.symbol, InstrumentCategory::Futures)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.total_trades, 120);
    assert_eq!(row.total_volume, 240.0);
    assert_eq!(row.window_start_ms, Some(first_window.start_ms));
    assert_eq!(p.store.list(None, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_one_bad_instrument_does_not_sink_the_run() {
    let p = pipeline();
    let window = TimeWindow::trailing(END_MS, 1.0).unwrap();
    for symbol in ["A-USDT", "B-USDT", "C-USDT"] {
        p.exchange.list(InstrumentCategory::Spot, symbol, "USDT");
    }
    p.exchange.list(InstrumentCategory::Spot, "A-BTC", "BTC");
    p.exchange
        .script("A-USDT", Ok(trades(1, window.start_ms, &[1.0; 3])));
    p.exchange.script(
        "B-USDT",
        Err(SamplerError::Http {
            status: 400,
            body: "{\"code\":\"51001\"}".into(),
        }),
    );
    p.exchange
        .script("C-USDT", Ok(trades(1, window.start_ms, &[1.0; 4])));

    let summary = p
        .orchestrator
        .run_for_window(&[InstrumentCategory::Spot], &window)
        .await
        .unwrap();

    assert_eq!(summary.total(), 3);
    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.failed, 1);
    assert!(p
        .store
        .latest("B-USDT", InstrumentCategory::Spot)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_explicit_instruments_skip_discovery() {
    let p = pipeline();
    let inst = Instrument::new("SOL-USDT", InstrumentCategory::Spot);
    let summary = p
        .orchestrator
        .sample_instruments(std::slice::from_ref(&inst))
        .await
        .unwrap();

    // Empty history still yields a (zero) estimate
    assert_eq!(summary.inserted, 1);
    let row = p
        .store
        .latest("SOL-USDT", InstrumentCategory::Spot)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.total_trades, 0);
    assert_eq!(row.total_volume, 0.0);

    assert!(matches!(
        p.orchestrator.sample_instruments(&[]).await,
        Err(SamplerError::NoInstruments)
    ));
}
