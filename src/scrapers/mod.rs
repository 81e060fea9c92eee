//! Exchange market-data sources
//!
//! The sampling pipeline only talks to [`MarketDataSource`]; the OKX REST
//! client is the production implementation.

use async_trait::async_trait;

use crate::error::SamplerResult;
use crate::models::{InstrumentCategory, InstrumentInfo, TradeRecord};

#[cfg(test)]
pub mod mock_source; // Scripted source for tests
pub mod okx_rest;

pub use okx_rest::OkxRestClient;

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Every listed instrument of one category.
    async fn instruments(&self, category: InstrumentCategory) -> SamplerResult<Vec<InstrumentInfo>>;

    /// One page of public trades older than `after` (newest page when `None`).
    ///
    /// HTTP 429 surfaces as `SamplerError::RateLimited`.
    async fn history_trades(
        &self,
        symbol: &str,
        after: Option<&str>,
        limit: u32,
    ) -> SamplerResult<Vec<TradeRecord>>;

    /// Exchange-reported 24h volume, `None` when the ticker has no data.
    async fn official_volume(&self, symbol: &str) -> SamplerResult<Option<f64>>;
}
