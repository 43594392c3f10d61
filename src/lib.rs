//! editlake: Wikimedia edit-event ingestion and aggregation.
//!
//! Two decoupled halves share this library:
//! - ingestion (`editlake-ingest`): SSE feed -> flush buffer -> gzip NDJSON
//!   batch objects in time-partitioned object storage (bronze layer);
//! - aggregation (`editlake-aggregate`): trailing-window batch job that
//!   claims each object once and additively upserts per-minute counters
//!   into Postgres (gold layer).

pub mod aggregate;
pub mod batch;
pub mod config;
pub mod event;
pub mod gold;
pub mod init;
pub mod partition;
pub mod sse;
pub mod storage;
pub mod stream;
