use async_trait::async_trait;
use uuid::Uuid;

/// Source of truth for physical stock. The ledger only reads it.
#[async_trait]
pub trait StockOracle: Send + Sync {
    /// Units currently on hand for the variant.
    async fn stock_level(&self, variant_id: Uuid) -> anyhow::Result<u64>;
}
