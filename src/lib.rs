//! Volume sampler
//!
//! Estimates 24h trade count and volume per exchange instrument from a short
//! sample window of public trades, caching raw samples on disk and persisting
//! the extrapolated figures to SQLite.

pub mod config;
pub mod error;
pub mod models;
pub mod sampling;
pub mod scrapers;
pub mod storage;

pub use config::{FetchConfig, SamplerConfig};
pub use error::{SamplerError, SamplerResult};
pub use sampling::SamplingOrchestrator;
