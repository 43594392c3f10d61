// Raw feed event model and normalization
//
// A `RecentChange` is a lenient serde view of one message from the
// Wikimedia EventStreams feed. Every field is optional at the decode
// layer; scope rules (edit marker, timestamp presence) are applied
// afterwards so a partial message is a skip, not a decode failure.

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RecentChange {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Primary event time, epoch seconds. Kept as a raw JSON value:
    /// presence and parseability are separate questions.
    pub timestamp: Option<serde_json::Value>,
    pub wiki: Option<String>,
    pub bot: Option<bool>,
    pub meta: Option<Meta>,
    pub length: Option<Length>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    /// Source-assigned event identity, used for in-batch deduplication.
    pub id: Option<String>,
    /// Secondary ISO-8601 event time.
    pub dt: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Length {
    pub old: Option<i64>,
    pub new: Option<i64>,
}

impl RecentChange {
    /// In-scope check: a recognized edit marker and a timestamp field.
    /// Anything else is filtered silently.
    pub fn is_edit(&self) -> bool {
        self.kind.as_deref() == Some("edit") && self.timestamp.is_some()
    }

    /// Epoch seconds from the primary timestamp field, if parseable.
    pub fn epoch_seconds(&self) -> Option<i64> {
        match self.timestamp.as_ref()? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Canonical event time. Fallback chain: primary epoch-seconds field,
    /// then the ISO-8601 `meta.dt` field, then the receipt time supplied by
    /// the caller. Upstream timestamp fields are not consistently present;
    /// receipt time as last resort preserves throughput over precision.
    pub fn occurred_at(&self, received_at: DateTime<Utc>) -> DateTime<Utc> {
        if let Some(secs) = self.epoch_seconds() {
            if let Some(dt) = DateTime::from_timestamp(secs, 0) {
                return dt;
            }
        }
        if let Some(raw) = self.meta.as_ref().and_then(|m| m.dt.as_deref()) {
            if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
                return dt.with_timezone(&Utc);
            }
        }
        received_at
    }

    pub fn event_id(&self) -> Option<&str> {
        self.meta.as_ref()?.id.as_deref()
    }

    pub fn wiki(&self) -> &str {
        self.wiki.as_deref().unwrap_or("unknown")
    }

    pub fn is_bot(&self) -> bool {
        self.bot.unwrap_or(false)
    }

    /// Net byte-length change of the edit, missing lengths counted as 0.
    pub fn byte_delta(&self) -> i64 {
        let (old, new) = match &self.length {
            Some(len) => (len.old.unwrap_or(0), len.new.unwrap_or(0)),
            None => (0, 0),
        };
        new - old
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parse(json: &str) -> RecentChange {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn primary_timestamp_wins() {
        let change = parse(r#"{"type":"edit","timestamp":1705327800,"meta":{"dt":"2099-01-01T00:00:00Z"}}"#);
        let received = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(
            change.occurred_at(received),
            DateTime::from_timestamp(1_705_327_800, 0).unwrap()
        );
    }

    #[test]
    fn falls_back_to_meta_dt() {
        let change = parse(r#"{"type":"edit","timestamp":"garbage","meta":{"dt":"2024-01-15T14:30:00Z"}}"#);
        let received = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(
            change.occurred_at(received),
            Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap()
        );
    }

    #[test]
    fn falls_back_to_receipt_time() {
        let change = parse(r#"{"type":"edit","timestamp":"garbage","meta":{"dt":"also garbage"}}"#);
        let received = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(change.occurred_at(received), received);
    }

    #[test]
    fn scope_requires_edit_marker_and_timestamp() {
        assert!(parse(r#"{"type":"edit","timestamp":1}"#).is_edit());
        assert!(!parse(r#"{"type":"log","timestamp":1}"#).is_edit());
        assert!(!parse(r#"{"type":"edit"}"#).is_edit());
        assert!(!parse(r#"{"wiki":"enwiki"}"#).is_edit());
    }

    #[test]
    fn byte_delta_defaults_missing_lengths_to_zero() {
        assert_eq!(parse(r#"{"length":{"old":100,"new":250}}"#).byte_delta(), 150);
        assert_eq!(parse(r#"{"length":{"new":42}}"#).byte_delta(), 42);
        assert_eq!(parse(r#"{}"#).byte_delta(), 0);
    }

    #[test]
    fn defaults_for_missing_fields() {
        let change = parse(r#"{"type":"edit","timestamp":1}"#);
        assert_eq!(change.wiki(), "unknown");
        assert!(!change.is_bot());
        assert!(change.event_id().is_none());
    }

    #[test]
    fn string_epoch_seconds_parse() {
        assert_eq!(parse(r#"{"timestamp":"1705327800"}"#).epoch_seconds(), Some(1_705_327_800));
        assert_eq!(parse(r#"{"timestamp":1705327800}"#).epoch_seconds(), Some(1_705_327_800));
        assert_eq!(parse(r#"{"timestamp":[1]}"#).epoch_seconds(), None);
    }
}
