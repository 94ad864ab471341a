//! Point-in-time hiscores measurements

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

/// Metric key holding the aggregate used as the change-detection headline.
pub const HEADLINE_METRIC: &str = "overall";

/// Where a snapshot came from. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    RemoteApi,
    LocalObservation,
}

impl Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Source::RemoteApi => "remote-api",
                Source::LocalObservation => "local-observation",
            }
        )
    }
}

/// A single measured quantity with its hiscores rank.
///
/// Skills are leveled (`level` + `value` xp); activities and bosses are counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Metric {
    Leveled { rank: i32, level: i32, value: i64 },
    Count { rank: i32, score: i64 },
}

impl Metric {
    pub fn rank(&self) -> i32 {
        match self {
            Metric::Leveled { rank, .. } | Metric::Count { rank, .. } => *rank,
        }
    }
}

/// Normalizes a player name into its case-insensitive lookup key.
pub fn entity_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Immutable measurement set for one tracked entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    entity: String,
    timestamp: i64,
    source: Source,
    metrics: BTreeMap<String, Metric>,
}

impl Snapshot {
    pub fn new(
        entity: impl Into<String>,
        timestamp: i64,
        source: Source,
        metrics: BTreeMap<String, Metric>,
    ) -> Self {
        Self {
            entity: entity.into(),
            timestamp,
            source,
            metrics,
        }
    }

    /// Display-cased entity name as it was captured.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn key(&self) -> String {
        entity_key(&self.entity)
    }

    /// Milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn taken_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn metrics(&self) -> &BTreeMap<String, Metric> {
        &self.metrics
    }

    pub fn metric(&self, key: &str) -> Option<&Metric> {
        self.metrics.get(key)
    }

    /// Total xp carried by the `overall` metric, if present.
    pub fn headline(&self) -> Option<i64> {
        match self.metrics.get(HEADLINE_METRIC) {
            Some(Metric::Leveled { value, .. }) => Some(*value),
            Some(Metric::Count { score, .. }) => Some(*score),
            None => None,
        }
    }
}

/// Incrementally assembles the metric set of a [`Snapshot`].
#[derive(Debug)]
pub struct SnapshotBuilder {
    entity: String,
    timestamp: i64,
    source: Source,
    metrics: BTreeMap<String, Metric>,
}

impl SnapshotBuilder {
    pub fn new(entity: impl Into<String>, timestamp: i64, source: Source) -> Self {
        Self {
            entity: entity.into(),
            timestamp,
            source,
            metrics: BTreeMap::new(),
        }
    }

    pub fn leveled(mut self, key: &str, rank: i32, level: i32, value: i64) -> Self {
        self.metrics
            .insert(key.to_string(), Metric::Leveled { rank, level, value });
        self
    }

    pub fn count(mut self, key: &str, rank: i32, score: i64) -> Self {
        self.metrics
            .insert(key.to_string(), Metric::Count { rank, score });
        self
    }

    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }

    pub fn build(self) -> Snapshot {
        Snapshot::new(self.entity, self.timestamp, self.source, self.metrics)
    }
}
