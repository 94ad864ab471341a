//! Core domain types and abstractions

pub mod cache;
pub mod clock;
pub mod config;
pub mod fetcher;
pub mod gains;
pub mod generation;
pub mod log;
pub mod snapshot;
pub mod variant;

// Re-export main types for cleaner imports
pub use clock::{Clock, FixedClock, SystemClock};
pub use fetcher::{FetchError, SnapshotFetcher};
pub use gains::{Gains, MetricDelta, Period, compute_gains};
pub use snapshot::{Metric, Snapshot, SnapshotBuilder, Source, entity_key};
pub use variant::AccountVariant;
