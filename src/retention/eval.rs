use super::{Interval, Keep, RetentionExpr};
use crate::snapshot::Snapshot;
use chrono::{DateTime, Datelike, Duration, Utc};
use std::collections::BTreeMap;

/// A monotonically increasing bucket index for `interval`, such that two
/// timestamps share an index iff they fall in the same calendar bucket.
/// Hour/day buckets are plain UTC-epoch divisions; the week bucket is
/// anchored to ISO Monday boundaries (day 1 of the proleptic Gregorian
/// calendar chrono uses is itself a Monday, so dividing any Monday's
/// days-from-CE by 7 yields a stable, strictly increasing week index).
fn bucket_index(ts: DateTime<Utc>, interval: Interval) -> i64 {
    match interval {
        Interval::Hour => ts.timestamp().div_euclid(3600),
        Interval::Day => ts.timestamp().div_euclid(86_400),
        Interval::Week => {
            let date = ts.date_naive();
            let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
            monday.num_days_from_ce() as i64 / 7
        }
        Interval::Month => ts.year() as i64 * 12 + ts.month0() as i64,
        Interval::Year => ts.year() as i64,
    }
}

fn super_bucket(ts: DateTime<Utc>, interval: Interval, multiplier: u32) -> i64 {
    bucket_index(ts, interval).div_euclid(multiplier.max(1) as i64)
}

/// Evaluate `expr` over `snapshots` at reference time `now` (spec §4.5
/// steps 1-4): tier assignment, per-tier selection, and the global floor
/// that always keeps the single most recent snapshot.
pub fn evaluate(expr: &RetentionExpr, snapshots: &[Snapshot], now: DateTime<Utc>) -> Vec<Snapshot> {
    if snapshots.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<&Snapshot> = snapshots.iter().collect();
    sorted.sort_by_key(|s| s.timestamp);
    let latest_ts = sorted.last().unwrap().timestamp;

    let mut tiers: Vec<Vec<&Snapshot>> = vec![Vec::new(); expr.rules.len().max(1)];
    for snapshot in &sorted {
        let age = (now - snapshot.timestamp).max(Duration::zero());
        let mut chosen = 0usize;
        for (idx, rule) in expr.rules.iter().enumerate() {
            if rule.age <= age {
                chosen = idx;
            } else {
                break;
            }
        }
        tiers[chosen].push(*snapshot);
    }

    let mut keep: Vec<Snapshot> = Vec::new();

    for (rule, tier_snapshots) in expr.rules.iter().zip(tiers.iter()) {
        match rule.keep {
            Keep::All => keep.extend(tier_snapshots.iter().map(|s| (*s).clone())),
            Keep::None => {}
            Keep::MostRecent(n) => {
                let mut ordered = tier_snapshots.clone();
                ordered.sort_by_key(|s| std::cmp::Reverse(s.timestamp));
                keep.extend(ordered.into_iter().take(n as usize).cloned());
            }
            Keep::PerInterval {
                n,
                interval,
                multiplier,
            } => {
                let mut buckets: BTreeMap<i64, Vec<&Snapshot>> = BTreeMap::new();
                for s in tier_snapshots {
                    buckets
                        .entry(super_bucket(s.timestamp, interval, multiplier))
                        .or_default()
                        .push(s);
                }
                for mut bucket_snapshots in buckets.into_values() {
                    bucket_snapshots.sort_by_key(|s| std::cmp::Reverse(s.timestamp));
                    keep.extend(bucket_snapshots.into_iter().take(n as usize).cloned());
                }
            }
        }
    }

    if !keep.iter().any(|s| s.timestamp == latest_ts) {
        if let Some(latest) = sorted.iter().find(|s| s.timestamp == latest_ts) {
            keep.push((*latest).clone());
        }
    }

    keep.sort_by_key(|s| s.timestamp);
    keep.dedup_by(|a, b| a.timestamp == b.timestamp);
    keep
}
