//! On-disk sample cache
//!
//! One JSON artifact per `(symbol, start_ms, end_ms)`; the file holds the
//! window's trade list. There is no overlap detection and no expiry: clearing
//! the directory is left to the operator (`purge`).

use chrono::{TimeZone, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::SamplerResult;
use crate::models::{RawSample, SampleWindow, TradeRecord};

const ARTIFACT_EXT: &str = "json";

#[derive(Debug, Clone)]
pub struct SampleCache {
    dir: PathBuf,
}

impl SampleCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `BTC-USDT_2024-05-29_16-00-00-000_to_2024-05-29_17-00-00-000.json`
    pub fn path_for(&self, window: &SampleWindow) -> PathBuf {
        let name = format!(
            "{}_{}_to_{}.{}",
            sanitize(&window.symbol),
            stamp(window.start_ms),
            stamp(window.end_ms),
            ARTIFACT_EXT
        );
        self.dir.join(name)
    }

    pub fn contains(&self, window: &SampleWindow) -> bool {
        self.path_for(window).is_file()
    }

    /// Cached sample for exactly this window. Unreadable artifacts count as a miss.
    pub fn lookup(&self, window: &SampleWindow) -> SamplerResult<Option<RawSample>> {
        let path = self.path_for(window);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<Vec<TradeRecord>>(&bytes) {
            Ok(trades) => {
                debug!(symbol = %window.symbol, trades = trades.len(), path = %path.display(), "Cache hit");
                Ok(Some(RawSample {
                    window: window.clone(),
                    trades,
                }))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable cache artifact, treating as miss");
                Ok(None)
            }
        }
    }

    /// Persist a sample. Written to a temp file first so readers never see a
    /// partial artifact.
    pub fn store(&self, sample: &RawSample) -> SamplerResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let path = self.path_for(&sample.window);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(&sample.trades)?;
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &path)?;

        debug!(symbol = %sample.window.symbol, trades = sample.trades.len(), path = %path.display(), "Cached sample");
        Ok(path)
    }

    /// Delete every artifact in the cache directory. Returns the number removed.
    pub fn purge(&self) -> SamplerResult<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            let is_artifact = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(".json") || n.ends_with(".json.tmp"))
                .unwrap_or(false);
            if path.is_file() && is_artifact {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn stamp(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(t) => t.format("%Y-%m-%d_%H-%M-%S-%3f").to_string(),
        None => ms.to_string(),
    }
}

/// Keep symbols filesystem-safe; exchange ids only use `[A-Za-z0-9-]`.
fn sanitize(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
