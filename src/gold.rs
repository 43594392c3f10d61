// Gold store: idempotency registry and per-minute counters in Postgres
//
// Two tables, both under the `gold` schema:
// - processed_keys(s3_key): insert-only claim table; a unique-constraint
//   insert is the sole mechanism preventing a batch object from being
//   aggregated twice.
// - edits_per_min(ts_minute, wiki, is_bot, edits, bytes_change): additive
//   upsert target; merges add partial sums rather than overwrite, so
//   replaying a window is row-level idempotent.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

/// Errors from gold-store operations, wrapping sqlx with the failed command.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("{command} failed: {source}")]
    Query {
        command: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

/// Key of one gold row: minute-truncated event time, wiki, bot flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MinuteKey {
    pub ts_minute: DateTime<Utc>,
    pub wiki: String,
    pub is_bot: bool,
}

/// Accumulating counters for one gold row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MinuteAgg {
    pub edits: i64,
    pub bytes_change: i64,
}

const SCHEMA_SQL: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS gold",
    "CREATE TABLE IF NOT EXISTS gold.edits_per_min (
        ts_minute    timestamptz NOT NULL,
        wiki         text        NOT NULL,
        is_bot       boolean     NOT NULL,
        edits        bigint      NOT NULL DEFAULT 0,
        bytes_change bigint      NOT NULL DEFAULT 0,
        PRIMARY KEY (ts_minute, wiki, is_bot)
    )",
    "CREATE TABLE IF NOT EXISTS gold.processed_keys (
        s3_key text PRIMARY KEY
    )",
];

const CLAIM_SQL: &str =
    "INSERT INTO gold.processed_keys (s3_key) VALUES ($1) ON CONFLICT DO NOTHING";

const UPSERT_SQL: &str = "INSERT INTO gold.edits_per_min \
     (ts_minute, wiki, is_bot, edits, bytes_change) \
     VALUES ($1, $2, $3, $4, $5) \
     ON CONFLICT (ts_minute, wiki, is_bot) \
     DO UPDATE SET edits = gold.edits_per_min.edits + EXCLUDED.edits, \
                   bytes_change = gold.edits_per_min.bytes_change + EXCLUDED.bytes_change";

pub struct GoldStore {
    pool: PgPool,
}

impl GoldStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(StoreError::Connect)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the gold schema and tables if absent. Safe to run on every
    /// start.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA_SQL {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|source| StoreError::Query {
                    command: "CREATE",
                    source,
                })?;
        }
        Ok(())
    }

    /// Claim a batch object for aggregation. Returns true iff this call
    /// inserted the claim, i.e. this is the first-ever claim for the key.
    /// The unique-constraint insert is atomic under concurrent callers;
    /// there is no read-then-write window.
    pub async fn claim(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(CLAIM_SQL)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|source| StoreError::Query {
                command: "INSERT",
                source,
            })?;
        Ok(result.rows_affected() == 1)
    }

    /// Additive upsert of one batch object's rollup, in one transaction.
    /// Merges are commutative and associative, so replaying overlapping
    /// windows is safe as long as each object is claimed once.
    pub async fn merge(&self, rows: &HashMap<MinuteKey, MinuteAgg>) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|source| StoreError::Query {
                command: "BEGIN",
                source,
            })?;

        for (key, agg) in rows {
            sqlx::query(UPSERT_SQL)
                .bind(key.ts_minute)
                .bind(&key.wiki)
                .bind(key.is_bot)
                .bind(agg.edits)
                .bind(agg.bytes_change)
                .execute(&mut *tx)
                .await
                .map_err(|source| StoreError::Query {
                    command: "UPSERT",
                    source,
                })?;
        }

        tx.commit().await.map_err(|source| StoreError::Query {
            command: "COMMIT",
            source,
        })
    }
}
