use cart::SqliteCartRepository;
use ledger::store::sqlite_store::SqliteReservationStore;
use sqlx::SqlitePool;

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    // Reservations and carts own their tables
    SqliteReservationStore::ensure_schema(pool).await?;
    SqliteCartRepository::ensure_schema(pool).await?;

    // Stock on hand, maintained by the inventory side
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS variant_stock (
  variant_id TEXT PRIMARY KEY,
  on_hand BIGINT NOT NULL CHECK (on_hand >= 0),
  updated_at_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
