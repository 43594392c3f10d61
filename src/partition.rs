// Partition key generation for the bronze layer
//
// Hive-style hour buckets keyed by *event time*, not processing time, so
// late-arriving events land in the hour they logically belong to:
// bronze/yyyy={year}/mm={month}/dd={day}/hh={hour}/part-{uuid}.ndjson.gz

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use uuid::Uuid;

/// Hour-bucket prefix for a timestamp, zero-padded.
pub fn hour_prefix(ts: DateTime<Utc>) -> String {
    format!(
        "bronze/yyyy={:04}/mm={:02}/dd={:02}/hh={:02}/",
        ts.year(),
        ts.month(),
        ts.day(),
        ts.hour()
    )
}

/// Full batch-object key: hour bucket plus a fresh random suffix so
/// concurrent writers never collide.
pub fn object_key(ts: DateTime<Utc>) -> String {
    format!("{}part-{}.ndjson.gz", hour_prefix(ts), Uuid::new_v4().simple())
}

/// Prefixes for the trailing aggregation window: the current hour back to
/// `hours - 1` hours ago, newest first.
pub fn trailing_hour_prefixes(now: DateTime<Utc>, hours: u32) -> Vec<String> {
    (0..hours)
        .map(|i| hour_prefix(now - Duration::hours(i64::from(i))))
        .collect()
}
