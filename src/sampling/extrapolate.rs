//! 24-hour extrapolation of a partial-window sample
//!
//! Limitation: this is a linear-rate assumption; no smoothing, no confidence
//! bound. A one-hour window sampled during a quiet (or busy) hour projects that
//! hour's rate onto the whole day.

use chrono::{DateTime, Utc};

use crate::error::{SamplerError, SamplerResult};
use crate::models::{Instrument, RawSample, VolumeSample};

const HOURS_PER_DAY: f64 = 24.0;

/// Scaled-to-ratio band outside which the estimate is flagged in the logs
pub const DIVERGENCE_BAND: (f64, f64) = (0.5, 2.0);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledVolume {
    pub trade_count: u64,
    pub volume: f64,
}

/// `factor = 24 / duration_hours`; the count is floored.
pub fn scale(trade_count: u64, volume: f64, duration_hours: f64) -> SamplerResult<ScaledVolume> {
    if !(duration_hours > 0.0) {
        return Err(SamplerError::InvalidWindow { duration_hours });
    }

    let factor = HOURS_PER_DAY / duration_hours;
    Ok(ScaledVolume {
        trade_count: (trade_count as f64 * factor).floor() as u64,
        volume: volume * factor,
    })
}

/// `scaled / official`, `None` when the exchange reported nothing.
pub fn divergence_ratio(scaled_volume: f64, official_volume: f64) -> Option<f64> {
    if official_volume > 0.0 {
        Some(scaled_volume / official_volume)
    } else {
        None
    }
}

pub fn is_divergent(ratio: f64) -> bool {
    ratio < DIVERGENCE_BAND.0 || ratio > DIVERGENCE_BAND.1
}

/// Build the persisted unit for one instrument from its raw sample.
pub fn volume_sample(
    instrument: &Instrument,
    raw: &RawSample,
    official_volume: f64,
    sampled_at: DateTime<Utc>,
) -> SamplerResult<VolumeSample> {
    let observed_trade_count = raw.trade_count();
    let observed_volume = raw.total_size();
    let scaled = scale(
        observed_trade_count,
        observed_volume,
        raw.window.duration_hours(),
    )?;

    Ok(VolumeSample {
        symbol: instrument.symbol.clone(),
        category: instrument.category,
        window_start_ms: raw.window.start_ms,
        window_end_ms: raw.window.end_ms,
        observed_trade_count,
        observed_volume,
        official_volume,
        scaled_trade_count: scaled.trade_count,
        scaled_volume: scaled.volume,
        sampled_at,
    })
}
