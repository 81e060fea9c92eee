//! OKX v5 public REST client
//!
//! Instrument listings, paginated trade history and 24h tickers. Responses are
//! wrapped in `{code, msg, data}`; every numeric field arrives as a string.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::MarketDataSource;
use crate::config::SamplerConfig;
use crate::error::{SamplerError, SamplerResult};
use crate::models::{InstrumentCategory, InstrumentInfo, TradeRecord, TradeSide};

const OKX_API_BASE: &str = "https://www.okx.com/api/v5";

/// OKX business code for "too many requests" (sometimes sent with HTTP 200)
const OKX_RATE_LIMIT_CODE: &str = "50011";

const MAX_ERROR_BODY: usize = 512;

#[derive(Clone)]
pub struct OkxRestClient {
    client: Client,
    base_url: String,
}

impl OkxRestClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent("volume-sampler/0.1")
            .build()
            .context("Failed to build OkxRestClient")?;

        let base_url = if base_url.is_empty() {
            OKX_API_BASE.to_string()
        } else {
            base_url.trim_end_matches('/').to_string()
        };

        Ok(Self { client, base_url })
    }

    pub fn from_config(cfg: &SamplerConfig) -> anyhow::Result<Self> {
        Self::new(&cfg.api_base_url, cfg.request_timeout)
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_data<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> SamplerResult<Vec<T>> {
        let resp = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SamplerError::RateLimited {
                retry_after: parse_retry_after(resp.headers()),
            });
        }

        let body = resp.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(SamplerError::Http {
                status: status.as_u16(),
                body: truncate(body),
            });
        }

        parse_envelope(&body)
    }
}

#[async_trait]
impl MarketDataSource for OkxRestClient {
    async fn instruments(&self, category: InstrumentCategory) -> SamplerResult<Vec<InstrumentInfo>> {
        let raw: Vec<OkxInstrument> = self
            .get_data("/public/instruments", &[("instType", category.as_str())])
            .await?;
        debug!(category = %category, count = raw.len(), "Fetched instrument listing");
        Ok(raw.into_iter().map(InstrumentInfo::from).collect())
    }

    async fn history_trades(
        &self,
        symbol: &str,
        after: Option<&str>,
        limit: u32,
    ) -> SamplerResult<Vec<TradeRecord>> {
        let limit = limit.to_string();
        let mut qp: Vec<(&str, &str)> = Vec::with_capacity(3);
        qp.push(("instId", symbol));
        qp.push(("limit", limit.as_str()));
        if let Some(a) = after {
            qp.push(("after", a));
        }

        let raw: Vec<OkxTrade> = self.get_data("/market/history-trades", &qp).await?;
        raw.into_iter().map(TradeRecord::try_from).collect()
    }

    async fn official_volume(&self, symbol: &str) -> SamplerResult<Option<f64>> {
        let raw: Vec<OkxTicker> = self
            .get_data("/market/ticker", &[("instId", symbol)])
            .await?;
        raw.into_iter()
            .next()
            .map(|t| parse_number("vol24h", &t.vol_24h))
            .transpose()
    }
}

fn transport_error(e: reqwest::Error) -> SamplerError {
    if e.is_timeout() {
        SamplerError::Timeout
    } else {
        SamplerError::Network(e.to_string())
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let secs: f64 = raw.trim().parse().ok()?;
    // Negative, NaN and out-of-range values fall back to the default wait
    Duration::try_from_secs_f64(secs).ok()
}

#[derive(Debug, Deserialize)]
struct OkxEnvelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

fn parse_envelope<T: DeserializeOwned>(body: &str) -> SamplerResult<Vec<T>> {
    let envelope: OkxEnvelope<T> = serde_json::from_str(body)
        .map_err(|e| SamplerError::Malformed(format!("unexpected payload: {}", e)))?;

    match envelope.code.as_str() {
        "0" => Ok(envelope.data),
        OKX_RATE_LIMIT_CODE => Err(SamplerError::RateLimited { retry_after: None }),
        code => Err(SamplerError::Malformed(format!(
            "exchange code {}: {}",
            code, envelope.msg
        ))),
    }
}

fn parse_number(field: &str, raw: &str) -> SamplerResult<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| SamplerError::Malformed(format!("{} is not a number: {:?}", field, raw)))
}

#[derive(Debug, Deserialize)]
struct OkxTrade {
    #[serde(rename = "tradeId")]
    trade_id: String,
    px: String,
    sz: String,
    side: String,
    ts: String,
}

impl TryFrom<OkxTrade> for TradeRecord {
    type Error = SamplerError;

    fn try_from(t: OkxTrade) -> Result<Self, Self::Error> {
        let timestamp_ms = t
            .ts
            .trim()
            .parse::<i64>()
            .map_err(|_| SamplerError::Malformed(format!("ts is not an integer: {:?}", t.ts)))?;

        Ok(TradeRecord {
            price: parse_number("px", &t.px)?,
            size: parse_number("sz", &t.sz)?,
            side: t.side.parse::<TradeSide>()?,
            trade_id: t.trade_id,
            timestamp_ms,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct OkxInstrument {
    inst_id: String,
    base_ccy: String,
    quote_ccy: String,
    settle_ccy: String,
    ct_val: String,
    ct_val_ccy: String,
}

impl From<OkxInstrument> for InstrumentInfo {
    fn from(i: OkxInstrument) -> Self {
        Self {
            ct_val: i.ct_val.trim().parse().ok(),
            inst_id: i.inst_id,
            base_ccy: i.base_ccy,
            quote_ccy: i.quote_ccy,
            settle_ccy: i.settle_ccy,
            ct_val_ccy: i.ct_val_ccy,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OkxTicker {
    #[serde(rename = "vol24h")]
    vol_24h: String,
}
