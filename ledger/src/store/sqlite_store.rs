//! SQLite-backed implementation of [`ReservationStore`].
//!
//! Rows carry their own eviction deadline (`evict_at_ms`). Reads filter on it,
//! so an entry past its TTL disappears immediately; `purge_expired` reclaims
//! the space later. Prefix scans are half-open ranges over the primary key,
//! served by the key's B-tree instead of a table scan.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use common::time::{Clock, to_ms};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::ReservationStore;
use crate::model::Reservation;

pub struct SqliteReservationStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteReservationStore {
    pub fn from_pool(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Connect and make sure the schema exists.
    pub async fn new(url: &str, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let pool = SqlitePool::connect(url).await?;
        Self::ensure_schema(&pool).await?;
        Ok(Self { pool, clock })
    }

    pub async fn ensure_schema(pool: &SqlitePool) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reservation_entries (
                key TEXT PRIMARY KEY,
                record_json TEXT NOT NULL,
                evict_at_ms INTEGER NOT NULL
            );
        "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_reservation_entries_evict ON reservation_entries(evict_at_ms);"#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Delete rows whose TTL elapsed.
    pub async fn purge_expired(&self) -> anyhow::Result<u64> {
        let purged = sqlx::query("DELETE FROM reservation_entries WHERE evict_at_ms <= ?")
            .bind(to_ms(self.clock.now()))
            .execute(&self.pool)
            .await?
            .rows_affected();

        if purged > 0 {
            debug!(purged, "evicted expired reservation rows");
        }
        Ok(purged)
    }
}

/// Smallest string greater than every string starting with `prefix`.
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut upper = prefix.to_string();
    let last = upper.pop()?;
    let next = char::from_u32(last as u32 + 1).unwrap_or(char::MAX);
    upper.push(next);
    Some(upper)
}

fn decode(json: &str) -> anyhow::Result<Reservation> {
    serde_json::from_str(json)
        .map_err(|e| anyhow::anyhow!("Invalid reservation JSON '{}': {}", json, e))
}

#[async_trait]
impl ReservationStore for SqliteReservationStore {
    /// Upsert; a re-put replaces the record and its deadline.
    async fn put(&self, key: &str, record: &Reservation, ttl: Duration) -> anyhow::Result<()> {
        let record_json = serde_json::to_string(record)?;
        let evict_at_ms = to_ms(self.clock.now() + ttl);

        sqlx::query(
            r#"
            INSERT INTO reservation_entries (key, record_json, evict_at_ms)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                record_json = excluded.record_json,
                evict_at_ms = excluded.evict_at_ms;
        "#,
        )
        .bind(key)
        .bind(record_json)
        .bind(evict_at_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Reservation>> {
        let row = sqlx::query(
            "SELECT record_json FROM reservation_entries WHERE key = ? AND evict_at_ms > ?",
        )
        .bind(key)
        .bind(to_ms(self.clock.now()))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                let json: String = r.get("record_json");
                Ok(Some(decode(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM reservation_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn scan_by_prefix(&self, prefix: &str) -> anyhow::Result<Vec<Reservation>> {
        let now_ms = to_ms(self.clock.now());

        let rows = match prefix_upper_bound(prefix) {
            Some(upper) => {
                sqlx::query(
                    r#"
                SELECT record_json FROM reservation_entries
                WHERE key >= ? AND key < ? AND evict_at_ms > ?
                ORDER BY key;
            "#,
                )
                .bind(prefix)
                .bind(upper)
                .bind(now_ms)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT record_json FROM reservation_entries WHERE evict_at_ms > ? ORDER BY key",
                )
                .bind(now_ms)
                .fetch_all(&self.pool)
                .await?
            }
        };

        // A row we cannot read could be a live hold; dropping it would
        // under-count reserved stock, so the whole scan fails instead.
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let json: String = row.get("record_json");
            out.push(decode(&json)?);
        }

        Ok(out)
    }
}
