//! Tiered retention for a single player's history.
//!
//! Resolution decreases with age:
//! - younger than `full_resolution`: every snapshot is kept
//! - younger than `hourly_until`: one per local hour, closest to the top of the hour
//! - younger than `daily_until`: one per local day, closest to local midnight
//! - anything older is discarded

use crate::core::Clock;
use crate::core::clock::{MILLIS_PER_DAY, MILLIS_PER_HOUR};
use crate::core::snapshot::Snapshot;
use chrono::Duration;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub full_resolution: Duration,
    pub hourly_until: Duration,
    pub daily_until: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            full_resolution: Duration::hours(24),
            hourly_until: Duration::days(7),
            daily_until: Duration::days(180),
        }
    }
}

/// Bucketed candidate: the snapshot with the smallest offset into its bucket wins.
fn keep_earliest_in_bucket<'a>(
    buckets: &mut BTreeMap<i64, (i64, &'a Snapshot)>,
    local_millis: i64,
    width: i64,
    snapshot: &'a Snapshot,
) {
    let bucket = local_millis.div_euclid(width);
    let offset = local_millis.rem_euclid(width);
    match buckets.get(&bucket) {
        Some((best, _)) if *best <= offset => {}
        _ => {
            buckets.insert(bucket, (offset, snapshot));
        }
    }
}

/// Thins `history` according to `policy` as seen from `now_millis`.
///
/// Pure in `now_millis` and the input: running it again on its own output with
/// the same `now_millis` returns the same list. Output is sorted ascending by
/// timestamp and contains only elements of the input.
pub fn compact(
    history: &[Snapshot],
    now_millis: i64,
    clock: &dyn Clock,
    policy: &RetentionPolicy,
) -> Vec<Snapshot> {
    let full = policy.full_resolution.num_milliseconds();
    let hourly = policy.hourly_until.num_milliseconds();
    let daily = policy.daily_until.num_milliseconds();

    let mut kept: Vec<&Snapshot> = Vec::with_capacity(history.len());
    let mut hours = BTreeMap::new();
    let mut days = BTreeMap::new();

    for snapshot in history {
        let age = now_millis - snapshot.timestamp();
        let local = clock.to_local_millis(snapshot.timestamp());
        if age < full {
            kept.push(snapshot);
        } else if age < hourly {
            keep_earliest_in_bucket(&mut hours, local, MILLIS_PER_HOUR, snapshot);
        } else if age < daily {
            keep_earliest_in_bucket(&mut days, local, MILLIS_PER_DAY, snapshot);
        }
    }

    kept.extend(hours.into_values().map(|(_, s)| s));
    kept.extend(days.into_values().map(|(_, s)| s));
    // Bucket order is not timestamp order
    kept.sort_by_key(|s| s.timestamp());
    kept.into_iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FixedClock, SnapshotBuilder, Source};
    use chrono::{DateTime, FixedOffset, TimeZone, Utc};
    use std::collections::HashSet;

    const MINUTE: i64 = 60 * 1000;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn snap(ts: i64) -> Snapshot {
        SnapshotBuilder::new("Zezima", ts, Source::RemoteApi)
            .leveled("overall", 1, 100, ts)
            .build()
    }

    /// Deterministic pseudo-random history spanning a little over 200 days.
    fn random_history(seed: u64, len: usize, now_millis: i64) -> Vec<Snapshot> {
        let mut state = seed;
        let mut stamps: Vec<i64> = (0..len)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                let age = ((state >> 16) % (200 * MILLIS_PER_DAY) as u64) as i64;
                now_millis - age
            })
            .collect();
        stamps.sort_unstable();
        stamps.into_iter().map(snap).collect()
    }

    #[test]
    fn test_compaction_is_idempotent() {
        let clock = FixedClock::new(now(), FixedOffset::east_opt(5 * 3600 + 1800).unwrap());
        let now_millis = now().timestamp_millis();
        let policy = RetentionPolicy::default();

        for seed in 1..20 {
            let history = random_history(seed, 2000, now_millis);
            let once = compact(&history, now_millis, &clock, &policy);
            let twice = compact(&once, now_millis, &clock, &policy);
            assert_eq!(once, twice, "seed {seed}");
        }
    }

    #[test]
    fn test_compaction_never_fabricates() {
        let clock = FixedClock::utc(now());
        let now_millis = now().timestamp_millis();
        let history = random_history(7, 1500, now_millis);
        let compacted = compact(&history, now_millis, &clock, &RetentionPolicy::default());

        assert!(!compacted.is_empty());
        for snapshot in &compacted {
            assert!(history.contains(snapshot));
        }
        assert!(compacted.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));
    }

    #[test]
    fn test_resolution_decreases_with_age() {
        let clock = FixedClock::utc(now());
        let now_millis = now().timestamp_millis();
        let history = random_history(42, 5000, now_millis);
        let compacted = compact(&history, now_millis, &clock, &RetentionPolicy::default());

        let mut hours = HashSet::new();
        let mut days = HashSet::new();
        for snapshot in &compacted {
            let age = now_millis - snapshot.timestamp();
            assert!(age < 180 * MILLIS_PER_DAY, "expired snapshot kept");
            if age >= 7 * MILLIS_PER_DAY {
                assert!(days.insert(snapshot.timestamp().div_euclid(MILLIS_PER_DAY)));
            } else if age >= MILLIS_PER_DAY {
                assert!(hours.insert(snapshot.timestamp().div_euclid(MILLIS_PER_HOUR)));
            }
        }

        // Everything younger than a day survives untouched
        let recent_in = history
            .iter()
            .filter(|s| now_millis - s.timestamp() < MILLIS_PER_DAY)
            .count();
        let recent_out = compacted
            .iter()
            .filter(|s| now_millis - s.timestamp() < MILLIS_PER_DAY)
            .count();
        assert_eq!(recent_in, recent_out);
    }

    #[test]
    fn test_hourly_band_keeps_snapshot_nearest_top_of_hour() {
        let clock = FixedClock::utc(now());
        let now_millis = now().timestamp_millis();
        // Two days ago, 09:xx UTC
        let hour_start = (now() - Duration::days(2)).timestamp_millis() - 3 * MILLIS_PER_HOUR;
        let history = vec![
            snap(hour_start + 40 * MINUTE),
            snap(hour_start + 5 * MINUTE),
            snap(hour_start + 20 * MINUTE),
        ];

        let compacted = compact(&history, now_millis, &clock, &RetentionPolicy::default());
        assert_eq!(compacted, vec![snap(hour_start + 5 * MINUTE)]);
    }

    #[test]
    fn test_daily_band_uses_local_midnight() {
        let now_millis = now().timestamp_millis();
        // 30 days ago at 21:30 and 22:30 UTC
        let base = (now() - Duration::days(30)).timestamp_millis();
        let late_evening = base + 9 * MILLIS_PER_HOUR + 30 * MINUTE;
        let after_local_midnight = late_evening + MILLIS_PER_HOUR;
        let history = vec![snap(late_evening), snap(after_local_midnight)];

        // In UTC both fall on the same day; the earlier one is nearer midnight
        let utc = FixedClock::utc(now());
        assert_eq!(
            compact(&history, now_millis, &utc, &RetentionPolicy::default()),
            vec![snap(late_evening)]
        );

        // In UTC+2 the second one is 00:30 on the following local day
        let east = FixedClock::new(now(), FixedOffset::east_opt(2 * 3600).unwrap());
        assert_eq!(
            compact(&history, now_millis, &east, &RetentionPolicy::default()),
            history
        );
    }

    #[test]
    fn test_expired_snapshots_are_discarded() {
        let clock = FixedClock::utc(now());
        let now_millis = now().timestamp_millis();
        let history = vec![
            snap(now_millis - 181 * MILLIS_PER_DAY),
            snap(now_millis - 179 * MILLIS_PER_DAY),
            snap(now_millis - MINUTE),
        ];

        let compacted = compact(&history, now_millis, &clock, &RetentionPolicy::default());
        assert_eq!(compacted, history[1..].to_vec());
    }
}
