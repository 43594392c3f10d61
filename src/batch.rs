// Flush buffer for the bronze layer
//
// Accumulates raw NDJSON lines and decides when to materialize them as one
// gzip batch object. Per open buffer the lifecycle is
// Empty -> Accumulating -> Flushing -> Empty: the first event after a flush
// opens a fresh buffer keyed by *its own* partition, so nothing is dropped
// between flush and reopen.

use std::io::Write;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::partition;

#[derive(Debug, Clone)]
pub struct FlushConfig {
    /// Flush as soon as this many lines are buffered (memory bound).
    pub min_lines: usize,
    /// Flush once the buffer has been open this long (latency bound).
    pub max_age: Duration,
}

/// A flushed batch ready for upload: one gzip unit of NDJSON lines.
#[derive(Debug)]
pub struct CompletedBatch {
    pub key: String,
    pub body: Vec<u8>,
    pub lines: usize,
}

#[derive(Debug)]
pub struct FlushBuffer {
    config: FlushConfig,
    key: Option<String>,
    buf: Vec<u8>,
    lines: usize,
    opened_at: Instant,
}

impl FlushBuffer {
    pub fn new(config: FlushConfig) -> Self {
        Self {
            config,
            key: None,
            buf: Vec::new(),
            lines: 0,
            opened_at: Instant::now(),
        }
    }

    /// Append one raw event line. Opens the buffer on the first event after
    /// a flush, keyed by that event's partition. Returns the completed batch
    /// when either flush condition holds: line count reached the minimum, or
    /// the buffer has been open past the maximum age.
    pub fn push(&mut self, raw_line: &str, occurred_at: DateTime<Utc>) -> Result<Option<CompletedBatch>> {
        if self.key.is_none() {
            self.key = Some(partition::object_key(occurred_at));
            self.opened_at = Instant::now();
        }
        self.buf.extend_from_slice(raw_line.as_bytes());
        self.buf.push(b'\n');
        self.lines += 1;

        if self.should_flush() {
            return Ok(Some(self.flush()?));
        }
        Ok(None)
    }

    /// Time-threshold flush for the periodic tick, so the latency bound
    /// holds even when no further event arrives.
    pub fn take_expired(&mut self) -> Result<Option<CompletedBatch>> {
        if self.lines > 0 && self.opened_at.elapsed() >= self.config.max_age {
            return Ok(Some(self.flush()?));
        }
        Ok(None)
    }

    /// Flush whatever is buffered regardless of thresholds (shutdown path).
    pub fn drain(&mut self) -> Result<Option<CompletedBatch>> {
        if self.lines == 0 {
            return Ok(None);
        }
        Ok(Some(self.flush()?))
    }

    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }

    fn should_flush(&self) -> bool {
        self.lines >= self.config.min_lines || self.opened_at.elapsed() >= self.config.max_age
    }

    fn flush(&mut self) -> Result<CompletedBatch> {
        let key = self.key.take().expect("flushing an unopened buffer");
        let lines = self.lines;
        let raw = std::mem::take(&mut self.buf);
        self.lines = 0;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&raw)
            .and_then(|_| encoder.finish())
            .map(|body| CompletedBatch { key, body, lines })
            .context("failed to gzip batch body")
    }
}
