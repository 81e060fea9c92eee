//! Trade sampling pipeline
//!
//! `orchestrator` discovers instruments and hands them to `coordinator`, which
//! resolves each one through `cache` or `fetcher`, scales it with
//! `extrapolate` and persists the result.

pub mod cache;
pub mod coordinator;
pub mod extrapolate;
pub mod fetcher;
pub mod orchestrator;

pub use cache::SampleCache;
pub use coordinator::{ConcurrencyCoordinator, RunSummary, SampleOrigin, TaskReport};
pub use extrapolate::{scale, ScaledVolume};
pub use fetcher::{FetchStats, TradeHistoryFetcher};
pub use orchestrator::{filter_instruments, selected_categories, SamplingOrchestrator};
