// End-to-end bronze pipeline: flush buffer -> object storage -> lister ->
// minute rollup, against the in-memory storage backend. The gold merge leg
// needs a live Postgres and is covered by its SQL-level additive upsert;
// the rollup additivity is asserted here instead.

use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use opendal::{services, Operator};

use editlake::batch::{CompletedBatch, FlushBuffer, FlushConfig};
use editlake::gold::{MinuteAgg, MinuteKey};
use editlake::storage::BronzeStore;
use editlake::{aggregate, partition};

fn memory_store() -> BronzeStore {
    let op = Operator::new(services::Memory::default()).unwrap().finish();
    BronzeStore::from_operator(op)
}

fn edit_line(ts: i64, wiki: &str, old: i64, new: i64, id: &str) -> String {
    format!(
        r#"{{"type":"edit","timestamp":{ts},"wiki":"{wiki}","bot":false,"length":{{"old":{old},"new":{new}}},"meta":{{"id":"{id}"}}}}"#
    )
}

async fn aggregate_window(store: &BronzeStore, hours: u32) -> HashMap<MinuteKey, MinuteAgg> {
    let mut combined: HashMap<MinuteKey, MinuteAgg> = HashMap::new();
    for prefix in partition::trailing_hour_prefixes(Utc::now(), hours) {
        for key in store.list_hour(&prefix).await.unwrap() {
            let body = store.get(&key).await.unwrap();
            let mut ndjson = String::new();
            flate2::read::GzDecoder::new(body.as_slice())
                .read_to_string(&mut ndjson)
                .unwrap();
            for (minute_key, agg) in aggregate::rollup(&ndjson).minutes {
                let entry = combined.entry(minute_key).or_default();
                entry.edits += agg.edits;
                entry.bytes_change += agg.bytes_change;
            }
        }
    }
    combined
}

#[tokio::test]
async fn twelve_events_split_across_two_flushes_sum_to_one_gold_row() {
    let store = memory_store();
    let mut buffer = FlushBuffer::new(FlushConfig {
        min_lines: 10,
        max_age: Duration::from_millis(200),
    });

    // All events land in the current minute so the lister window covers them.
    let now = Utc::now();
    let minute_secs = now.timestamp() - now.timestamp().rem_euclid(60);

    let mut flushes: Vec<CompletedBatch> = Vec::new();
    for i in 0..12 {
        let line = edit_line(minute_secs, "enwiki", 100, 100 + (i as i64 + 1), &format!("ev-{i}"));
        if let Some(batch) = buffer.push(&line, now).unwrap() {
            flushes.push(batch);
        }
    }
    // The 10th event triggered the line-count flush.
    assert_eq!(flushes.len(), 1);
    assert_eq!(flushes[0].lines, 10);

    // The remaining 2 go out on the time threshold.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let expired = buffer.take_expired().unwrap().expect("age threshold flushes the rest");
    assert_eq!(expired.lines, 2);
    flushes.push(expired);

    let mut keys: Vec<String> = flushes.iter().map(|b| b.key.clone()).collect();
    for batch in flushes {
        store.put_batch(&batch.key, batch.body).await.unwrap();
    }

    // Both objects are visible to the trailing-window lister.
    let mut listed: Vec<String> = Vec::new();
    for prefix in partition::trailing_hour_prefixes(Utc::now(), 2) {
        listed.extend(store.list_hour(&prefix).await.unwrap());
    }
    keys.sort();
    listed.sort();
    assert_eq!(listed, keys);

    // Two merges (10 then 2) sum to one row: edits=12, bytes = 1+2+..+12.
    let combined = aggregate_window(&store, 2).await;
    assert_eq!(combined.len(), 1);
    let row = combined
        .get(&MinuteKey {
            ts_minute: Utc.timestamp_opt(minute_secs, 0).unwrap(),
            wiki: "enwiki".to_string(),
            is_bot: false,
        })
        .expect("one gold row for the minute");
    assert_eq!(row.edits, 12);
    assert_eq!(row.bytes_change, (1..=12).sum::<i64>());
}

#[tokio::test]
async fn corrupted_line_does_not_fail_the_batch() {
    let store = memory_store();
    let mut buffer = FlushBuffer::new(FlushConfig {
        min_lines: 3,
        max_age: Duration::from_secs(3600),
    });

    let now = Utc::now();
    let minute_secs = now.timestamp() - now.timestamp().rem_euclid(60);

    buffer.push(&edit_line(minute_secs, "enwiki", 0, 10, "a"), now).unwrap();
    buffer
        .push(r#"{"type":"edit","timestamp":1705329005,"wiki":"enw"#, now)
        .unwrap();
    let batch = buffer
        .push(&edit_line(minute_secs, "enwiki", 0, 20, "b"), now)
        .unwrap()
        .expect("third line flushes");
    store.put_batch(&batch.key, batch.body).await.unwrap();

    let combined = aggregate_window(&store, 2).await;
    let row = combined.values().next().expect("good lines still aggregate");
    assert_eq!(combined.len(), 1);
    assert_eq!(row.edits, 2);
    assert_eq!(row.bytes_change, 30);
}
