//! SQLite-backed [`CartRepository`].
//!
//! A cart is one `carts` row plus its `cart_items` rows. Saves replace the
//! item set wholesale inside a transaction guarded by the cart's version, so a
//! reader never sees half of a sync.
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use common::time::{Clock, from_ms, to_ms};
use ledger::model::ReservationId;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{CartRepository, SaveError};
use crate::model::{Cart, CartLineItem, CartOwner};

pub struct SqliteCartRepository {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteCartRepository {
    pub fn from_pool(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub async fn new(url: &str, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let pool = SqlitePool::connect(url).await?;
        Self::ensure_schema(&pool).await?;
        Ok(Self { pool, clock })
    }

    pub async fn ensure_schema(pool: &SqlitePool) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS carts (
                id TEXT PRIMARY KEY,
                owner_kind TEXT NOT NULL,
                owner_ref TEXT NOT NULL,

                version INTEGER NOT NULL,
                currency TEXT NOT NULL,
                total_items INTEGER NOT NULL,
                total_amount INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL,

                UNIQUE (owner_kind, owner_ref)
            );
        "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cart_items (
                id TEXT PRIMARY KEY,
                cart_id TEXT NOT NULL,
                position INTEGER NOT NULL,

                variant_id TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                locked_price INTEGER NOT NULL,
                price_lock_expires_at_ms INTEGER,
                campaign TEXT,
                reservation_id TEXT,
                valid INTEGER NOT NULL,

                added_at_ms INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL
            );
        "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_cart_items_cart ON cart_items(cart_id);"#)
            .execute(pool)
            .await?;

        Ok(())
    }

    async fn find_by_owner(&self, owner: &CartOwner) -> anyhow::Result<Option<Cart>> {
        let row = sqlx::query("SELECT * FROM carts WHERE owner_kind = ? AND owner_ref = ?")
            .bind(owner.kind())
            .bind(owner.reference())
            .fetch_optional(&self.pool)
            .await
            .context("load cart")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id = Uuid::parse_str(&row.get::<String, _>("id"))?;
        let items = sqlx::query("SELECT * FROM cart_items WHERE cart_id = ? ORDER BY position")
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await
            .context("load cart items")?
            .iter()
            .map(decode_item)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Some(Cart {
            id,
            owner: owner.clone(),
            items,
            version: row.get::<i64, _>("version") as u64,
            currency: row.get("currency"),
            total_items: row.get::<i64, _>("total_items") as u64,
            total_amount: row.get::<i64, _>("total_amount") as u64,
            updated_at: from_ms(row.get("updated_at_ms")),
        }))
    }
}

fn decode_item(row: &SqliteRow) -> anyhow::Result<CartLineItem> {
    let id: String = row.get("id");
    let variant_id: String = row.get("variant_id");

    Ok(CartLineItem {
        id: Uuid::parse_str(&id).with_context(|| format!("bad cart item id '{id}'"))?,
        variant_id: Uuid::parse_str(&variant_id)
            .with_context(|| format!("bad variant id '{variant_id}' on item {id}"))?,
        quantity: row.get::<i64, _>("quantity") as u32,
        locked_price: row.get::<i64, _>("locked_price") as u64,
        price_lock_expires_at: row
            .get::<Option<i64>, _>("price_lock_expires_at_ms")
            .map(from_ms),
        campaign: row.get("campaign"),
        reservation_id: row
            .get::<Option<String>, _>("reservation_id")
            .map(ReservationId::from),
        valid: row.get("valid"),
        added_at: from_ms(row.get("added_at_ms")),
        updated_at: from_ms(row.get("updated_at_ms")),
    })
}

#[async_trait]
impl CartRepository for SqliteCartRepository {
    async fn find_by_user(&self, user_id: Uuid) -> anyhow::Result<Option<Cart>> {
        self.find_by_owner(&CartOwner::User(user_id)).await
    }

    async fn find_by_session(&self, session_id: &str) -> anyhow::Result<Option<Cart>> {
        self.find_by_owner(&CartOwner::Guest(session_id.to_string()))
            .await
    }

    #[instrument(skip(self, cart), target = "cart", fields(cart_id = %cart.id, version = cart.version))]
    async fn save_atomic(&self, cart: &Cart, expected_version: Option<u64>) -> Result<(), SaveError> {
        if let Some(expected) = expected_version.filter(|v| cart.version <= *v) {
            return Err(SaveError::Store(anyhow::anyhow!(
                "cart {} save must advance past version {expected}, got {}",
                cart.id,
                cart.version
            )));
        }

        let cart_id = cart.id.to_string();
        let mut tx = self.pool.begin().await.context("begin cart save")?;

        let written = match expected_version {
            None => sqlx::query(
                r#"
                INSERT INTO carts (id, owner_kind, owner_ref, version, currency, total_items, total_amount, updated_at_ms)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT DO NOTHING
            "#,
            )
            .bind(&cart_id)
            .bind(cart.owner.kind())
            .bind(cart.owner.reference())
            .bind(cart.version as i64)
            .bind(&cart.currency)
            .bind(cart.total_items as i64)
            .bind(cart.total_amount as i64)
            .bind(to_ms(cart.updated_at))
            .execute(&mut *tx)
            .await
            .context("insert cart")?,
            Some(expected) => sqlx::query(
                r#"
                UPDATE carts
                SET version = ?, currency = ?, total_items = ?, total_amount = ?, updated_at_ms = ?
                WHERE id = ? AND version = ?
            "#,
            )
            .bind(cart.version as i64)
            .bind(&cart.currency)
            .bind(cart.total_items as i64)
            .bind(cart.total_amount as i64)
            .bind(to_ms(cart.updated_at))
            .bind(&cart_id)
            .bind(expected as i64)
            .execute(&mut *tx)
            .await
            .context("update cart")?,
        };

        if written.rows_affected() == 0 {
            debug!(expected = ?expected_version, "cart version guard rejected save");
            return Err(SaveError::VersionConflict {
                cart_id: cart.id,
                expected: expected_version,
            });
        }

        sqlx::query("DELETE FROM cart_items WHERE cart_id = ?")
            .bind(&cart_id)
            .execute(&mut *tx)
            .await
            .context("clear cart items")?;

        for (position, item) in cart.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO cart_items (
                    id, cart_id, position, variant_id, quantity, locked_price,
                    price_lock_expires_at_ms, campaign, reservation_id, valid,
                    added_at_ms, updated_at_ms
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            )
            .bind(item.id.to_string())
            .bind(&cart_id)
            .bind(position as i64)
            .bind(item.variant_id.to_string())
            .bind(i64::from(item.quantity))
            .bind(item.locked_price as i64)
            .bind(item.price_lock_expires_at.map(to_ms))
            .bind(item.campaign.as_deref())
            .bind(item.reservation_id.as_ref().map(|r| r.as_str()))
            .bind(item.valid)
            .bind(to_ms(item.added_at))
            .bind(to_ms(item.updated_at))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("insert cart item {}", item.id))?;
        }

        tx.commit().await.context("commit cart save")?;
        Ok(())
    }

    #[instrument(skip(self), target = "cart", fields(reservation_id = %reservation_id))]
    async fn detach_reservation(
        &self,
        cart_item_id: Uuid,
        reservation_id: &ReservationId,
    ) -> anyhow::Result<()> {
        let item_id = cart_item_id.to_string();
        let mut tx = self.pool.begin().await?;

        let cart_id: Option<String> =
            sqlx::query_scalar("SELECT cart_id FROM cart_items WHERE id = ? AND reservation_id = ?")
                .bind(&item_id)
                .bind(reservation_id.as_str())
                .fetch_optional(&mut *tx)
                .await?;

        // Line gone or already pointing at a newer hold.
        let Some(cart_id) = cart_id else {
            return Ok(());
        };

        sqlx::query("UPDATE cart_items SET reservation_id = NULL WHERE id = ?")
            .bind(&item_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE carts SET version = version + 1, updated_at_ms = ? WHERE id = ?")
            .bind(to_ms(self.clock.now()))
            .bind(&cart_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(cart_id = %cart_id, "cleared reservation back-reference");
        Ok(())
    }
}
