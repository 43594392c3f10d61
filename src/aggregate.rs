// Minute aggregator: bronze batch objects -> gold counters
//
// The rollup itself is pure and covers one batch object at a time: parse
// each NDJSON line independently, dedup by event identity within the batch
// (first occurrence wins; identity-less lines never dedup against each
// other), truncate to minute granularity, and accumulate per
// {minute, wiki, is_bot}. Cross-batch dedup is deliberately out of scope:
// it would need an unbounded persistent identity set.

use std::collections::{HashMap, HashSet};
use std::io::Read;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use tracing::{info, warn};

use crate::event::RecentChange;
use crate::gold::{GoldStore, MinuteAgg, MinuteKey};
use crate::partition;
use crate::storage::BronzeStore;

/// Per-minute partial sums from one batch object.
#[derive(Debug, Default)]
pub struct Rollup {
    pub minutes: HashMap<MinuteKey, MinuteAgg>,
    pub lines: usize,
    pub skipped: usize,
    pub duplicates: usize,
}

/// Roll one decompressed batch body into per-minute counters. A line that
/// fails to parse or lacks required fields is counted and skipped, never
/// fatal to the batch.
pub fn rollup(ndjson: &str) -> Rollup {
    let mut out = Rollup::default();
    let mut seen_ids: HashSet<String> = HashSet::new();

    for line in ndjson.lines() {
        if line.trim().is_empty() {
            continue;
        }
        out.lines += 1;

        let change: RecentChange = match serde_json::from_str(line) {
            Ok(change) => change,
            Err(_) => {
                out.skipped += 1;
                continue;
            }
        };
        if !change.is_edit() {
            out.skipped += 1;
            continue;
        }
        let Some(ts_minute) = minute_of(&change) else {
            out.skipped += 1;
            continue;
        };

        if let Some(id) = change.event_id() {
            if !seen_ids.insert(id.to_string()) {
                out.duplicates += 1;
                continue;
            }
        }

        let key = MinuteKey {
            ts_minute,
            wiki: change.wiki().to_string(),
            is_bot: change.is_bot(),
        };
        let entry = out.minutes.entry(key).or_default();
        entry.edits += 1;
        entry.bytes_change += change.byte_delta();
    }

    out
}

fn minute_of(change: &RecentChange) -> Option<DateTime<Utc>> {
    let secs = change.epoch_seconds()?;
    DateTime::from_timestamp(secs - secs.rem_euclid(60), 0)
}

/// Outcome of one batch object: whether this run claimed it, and what the
/// rollup produced if it did.
#[derive(Debug, Default)]
pub struct Outcome {
    pub claimed: bool,
    pub lines: usize,
    pub minute_rows: usize,
}

/// Aggregate one batch object end to end: claim, fetch, decompress, roll
/// up, merge. A lost claim is an expected skip, not an error; storage and
/// database failures propagate as fatal for this run.
pub async fn process_object(store: &BronzeStore, gold: &GoldStore, key: &str) -> Result<Outcome> {
    if !gold.claim(key).await? {
        info!(key, "already processed, skipping");
        return Ok(Outcome::default());
    }

    let body = store.get(key).await?;
    let mut ndjson = String::new();
    GzDecoder::new(body.as_slice())
        .read_to_string(&mut ndjson)
        .with_context(|| format!("failed to decompress batch object {key}"))?;

    let rolled = rollup(&ndjson);
    if rolled.skipped > 0 {
        warn!(key, skipped = rolled.skipped, "batch contained unusable lines");
    }
    gold.merge(&rolled.minutes).await?;
    info!(
        key,
        rows_in = rolled.lines,
        mins = rolled.minutes.len(),
        duplicates = rolled.duplicates,
        "aggregated batch"
    );

    Ok(Outcome {
        claimed: true,
        lines: rolled.lines,
        minute_rows: rolled.minutes.len(),
    })
}

/// One aggregation pass over the trailing window: every batch object under
/// the last `hours` hourly buckets. Returns (processed, skipped) counts.
pub async fn run_window(
    store: &BronzeStore,
    gold: &GoldStore,
    hours: u32,
) -> Result<(usize, usize)> {
    let mut processed = 0;
    let mut skipped = 0;

    for prefix in partition::trailing_hour_prefixes(Utc::now(), hours) {
        for key in store.list_hour(&prefix).await? {
            let outcome = process_object(store, gold, &key).await?;
            if outcome.claimed {
                processed += 1;
            } else {
                skipped += 1;
            }
        }
    }

    Ok((processed, skipped))
}
