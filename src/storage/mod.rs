//! SQLite persistence for extrapolated volume samples

pub mod volume_db;

pub use volume_db::{PersistedVolume, UpsertOutcome, VolumeDb};
