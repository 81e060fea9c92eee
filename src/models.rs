use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{SamplerError, SamplerResult};

pub const MS_PER_HOUR: i64 = 60 * 60 * 1000;

/// Instrument categories exposed by the exchange listing endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstrumentCategory {
    Spot,
    Futures,
    Swap,
}

impl InstrumentCategory {
    /// Value used both for `instType` and for the persisted `trade_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentCategory::Spot => "SPOT",
            InstrumentCategory::Futures => "FUTURES",
            InstrumentCategory::Swap => "SWAP",
        }
    }
}

impl fmt::Display for InstrumentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstrumentCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SPOT" => Ok(InstrumentCategory::Spot),
            "FUTURES" => Ok(InstrumentCategory::Futures),
            "SWAP" => Ok(InstrumentCategory::Swap),
            other => Err(format!("unknown instrument category: {}", other)),
        }
    }
}

/// A tradeable symbol, e.g. `BTC-USDT-SWAP`. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub category: InstrumentCategory,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, category: InstrumentCategory) -> Self {
        Self {
            symbol: symbol.into(),
            category,
        }
    }
}

/// Listing entry as returned by instrument discovery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub inst_id: String,
    pub base_ccy: String,
    pub quote_ccy: String,
    pub settle_ccy: String,
    pub ct_val: Option<f64>,
    pub ct_val_ccy: String,
}

/// Half-open `[start_ms, end_ms)` interval shared by every instrument of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeWindow {
    pub fn new(start_ms: i64, end_ms: i64) -> SamplerResult<Self> {
        let window = Self { start_ms, end_ms };
        if end_ms <= start_ms {
            return Err(SamplerError::InvalidWindow {
                duration_hours: window.duration_hours(),
            });
        }
        Ok(window)
    }

    /// The `hours` leading up to `end_ms`.
    pub fn trailing(end_ms: i64, hours: f64) -> SamplerResult<Self> {
        if !(hours > 0.0) {
            return Err(SamplerError::InvalidWindow {
                duration_hours: hours,
            });
        }
        let span = (hours * MS_PER_HOUR as f64).round() as i64;
        Self::new(end_ms - span, end_ms)
    }

    pub fn duration_hours(&self) -> f64 {
        (self.end_ms - self.start_ms) as f64 / MS_PER_HOUR as f64
    }

    pub fn for_symbol(&self, symbol: &str) -> SampleWindow {
        SampleWindow {
            symbol: symbol.to_string(),
            start_ms: self.start_ms,
            end_ms: self.end_ms,
        }
    }
}

/// `(symbol, start_ms, end_ms)`: the sampling unit and the cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleWindow {
    pub symbol: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

impl SampleWindow {
    pub fn duration_hours(&self) -> f64 {
        (self.end_ms - self.start_ms) as f64 / MS_PER_HOUR as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl FromStr for TradeSide {
    type Err = SamplerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" | "Buy" | "BUY" => Ok(TradeSide::Buy),
            "sell" | "Sell" | "SELL" => Ok(TradeSide::Sell),
            other => Err(SamplerError::Malformed(format!("unknown trade side {:?}", other))),
        }
    }
}

/// One public trade print. `trade_id` is unique per instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub price: f64,
    pub size: f64,
    pub side: TradeSide,
    pub timestamp_ms: i64,
}

/// Trades observed for one window, ascending by timestamp, deduplicated by id,
/// all at or after `window.start_ms`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub window: SampleWindow,
    pub trades: Vec<TradeRecord>,
}

impl RawSample {
    pub fn trade_count(&self) -> u64 {
        self.trades.len() as u64
    }

    pub fn total_size(&self) -> f64 {
        self.trades.iter().map(|t| t.size).sum()
    }
}

/// The persisted unit: observed activity, its 24h projection, and the
/// exchange-reported figure it is cross-checked against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSample {
    pub symbol: String,
    pub category: InstrumentCategory,
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    pub observed_trade_count: u64,
    pub observed_volume: f64,
    pub official_volume: f64,
    pub scaled_trade_count: u64,
    pub scaled_volume: f64,
    pub sampled_at: DateTime<Utc>,
}
