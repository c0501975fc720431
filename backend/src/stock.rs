use async_trait::async_trait;
use common::time::now_ms;
use ledger::oracle::StockOracle;
use sqlx::SqlitePool;
use tracing::instrument;
use uuid::Uuid;

/// Reads stock on hand from the `variant_stock` table.
///
/// A variant with no row has nothing to sell.
#[derive(Clone)]
pub struct SqlStockOracle {
    pool: SqlitePool,
}

impl SqlStockOracle {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn set_stock(&self, variant_id: Uuid, on_hand: u64) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO variant_stock (variant_id, on_hand, updated_at_ms)
            VALUES (?, ?, ?)
            ON CONFLICT(variant_id) DO UPDATE SET
                on_hand = excluded.on_hand,
                updated_at_ms = excluded.updated_at_ms
        "#,
        )
        .bind(variant_id.to_string())
        .bind(on_hand as i64)
        .bind(now_ms() as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StockOracle for SqlStockOracle {
    #[instrument(skip(self), target = "stock")]
    async fn stock_level(&self, variant_id: Uuid) -> anyhow::Result<u64> {
        let on_hand: Option<i64> =
            sqlx::query_scalar("SELECT on_hand FROM variant_stock WHERE variant_id = ?")
                .bind(variant_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        Ok(on_hand.map_or(0, |units| units.max(0) as u64))
    }
}
