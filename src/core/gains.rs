//! Progress deltas between two snapshots

use crate::core::clock::Clock;
use crate::core::snapshot::{Metric, Snapshot};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

/// Change of a single metric. Negative values are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricDelta {
    Leveled { value: i64, level: i32 },
    Count { score: i64 },
}

impl MetricDelta {
    pub fn is_gain(&self) -> bool {
        match self {
            MetricDelta::Leveled { value, level } => *value > 0 || *level > 0,
            MetricDelta::Count { score } => *score > 0,
        }
    }
}

/// Derived comparison of a snapshot against an optional baseline.
#[derive(Debug, Clone)]
pub struct Gains {
    current: Snapshot,
    baseline: Option<Snapshot>,
    deltas: BTreeMap<String, MetricDelta>,
}

impl Gains {
    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    pub fn baseline(&self) -> Option<&Snapshot> {
        self.baseline.as_ref()
    }

    /// `false` means "no data", which is not the same as zero gain.
    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    pub fn delta(&self, key: &str) -> Option<&MetricDelta> {
        self.deltas.get(key)
    }

    pub fn deltas(&self) -> &BTreeMap<String, MetricDelta> {
        &self.deltas
    }
}

/// Computes per-metric deltas of `current` against `baseline`.
///
/// Metrics missing from the baseline, or whose kind changed, get no delta.
pub fn compute_gains(current: &Snapshot, baseline: Option<&Snapshot>) -> Gains {
    let mut deltas = BTreeMap::new();

    if let Some(baseline) = baseline {
        for (key, metric) in current.metrics() {
            let delta = match (metric, baseline.metric(key)) {
                (
                    Metric::Leveled { level, value, .. },
                    Some(Metric::Leveled {
                        level: old_level,
                        value: old_value,
                        ..
                    }),
                ) => MetricDelta::Leveled {
                    value: value - old_value,
                    level: level - old_level,
                },
                (Metric::Count { score, .. }, Some(Metric::Count { score: old, .. })) => {
                    MetricDelta::Count { score: score - old }
                }
                _ => continue,
            };
            deltas.insert(key.clone(), delta);
        }
    }

    Gains {
        current: current.clone(),
        baseline: baseline.cloned(),
        deltas,
    }
}

/// Lookback window offered for gains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Period {
    #[default]
    Today,
    Week,
    Month,
    Year,
}

impl Period {
    pub fn to_duration(&self) -> Duration {
        match self {
            Period::Today => Duration::zero(),
            Period::Week => Duration::days(7),
            Period::Month => Duration::days(30),
            Period::Year => Duration::days(365),
        }
    }

    /// Instant whose nearest snapshot serves as the baseline. `Today` starts
    /// at local midnight rather than "24 hours ago".
    pub fn baseline_target(&self, clock: &dyn Clock) -> DateTime<Utc> {
        match self {
            Period::Today => clock.local_midnight(0),
            _ => clock.now() - self.to_duration(),
        }
    }
}

impl Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Period::Today => "Today",
                Period::Week => "Week",
                Period::Month => "Month",
                Period::Year => "Year",
            }
        )
    }
}

impl FromStr for Period {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "today" | "day" | "1d" => Ok(Period::Today),
            "week" | "7d" => Ok(Period::Week),
            "month" | "30d" => Ok(Period::Month),
            "year" | "365d" => Ok(Period::Year),
            _ => Err(anyhow::anyhow!("Invalid gains period: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::FixedClock;
    use crate::core::snapshot::{SnapshotBuilder, Source};
    use chrono::TimeZone;

    fn snapshot(ts: i64, xp: i64, level: i32) -> SnapshotBuilder {
        SnapshotBuilder::new("Zezima", ts, Source::RemoteApi).leveled("attack", 10, level, xp)
    }

    #[test]
    fn test_gains_with_baseline() {
        let current = snapshot(2_000, 1000, 10).build();
        let baseline = snapshot(1_000, 700, 8).build();

        let gains = compute_gains(&current, Some(&baseline));
        assert!(gains.has_baseline());
        assert_eq!(
            gains.delta("attack"),
            Some(&MetricDelta::Leveled {
                value: 300,
                level: 2
            })
        );
    }

    #[test]
    fn test_gains_without_baseline_is_not_zero_gain() {
        let current = snapshot(2_000, 1000, 10).build();

        let none = compute_gains(&current, None);
        let same = compute_gains(&current, Some(&current));

        assert!(!none.has_baseline());
        assert!(none.delta("attack").is_none());
        assert!(same.has_baseline());
        assert_eq!(
            same.delta("attack"),
            Some(&MetricDelta::Leveled { value: 0, level: 0 })
        );
    }

    #[test]
    fn test_metrics_missing_from_baseline_are_skipped() {
        let current = snapshot(2_000, 1000, 10).count("zulrah", 5, 40).build();
        let baseline = snapshot(1_000, 900, 10).build();

        let gains = compute_gains(&current, Some(&baseline));
        assert!(gains.delta("zulrah").is_none());
        assert_eq!(gains.deltas().len(), 1);
    }

    #[test]
    fn test_negative_deltas_are_reported() {
        let current = SnapshotBuilder::new("Zezima", 2, Source::RemoteApi)
            .count("clue_all", 100, 8)
            .build();
        let baseline = SnapshotBuilder::new("Zezima", 1, Source::RemoteApi)
            .count("clue_all", 90, 10)
            .build();

        let gains = compute_gains(&current, Some(&baseline));
        let delta = gains.delta("clue_all").unwrap();
        assert_eq!(delta, &MetricDelta::Count { score: -2 });
        assert!(!delta.is_gain());
    }

    #[test]
    fn test_period_parsing_and_targets() {
        assert_eq!("week".parse::<Period>().unwrap(), Period::Week);
        assert_eq!("TODAY".parse::<Period>().unwrap(), Period::Today);
        assert!("fortnight".parse::<Period>().is_err());

        let now = Utc.with_ymd_and_hms(2024, 6, 15, 18, 0, 0).unwrap();
        let clock = FixedClock::utc(now);
        assert_eq!(
            Period::Today.baseline_target(&clock),
            Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap()
        );
        assert_eq!(
            Period::Week.baseline_target(&clock),
            Utc.with_ymd_and_hms(2024, 6, 8, 18, 0, 0).unwrap()
        );
    }
}
