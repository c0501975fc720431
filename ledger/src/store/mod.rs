pub mod memory;
pub mod sqlite_store;

use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

use crate::model::{Reservation, ReservationId};

/// Prefix shared by every reservation key.
pub const KEY_PREFIX: &str = "reservation:";

/// `reservation:{id}`. Because the id leads with the variant, every hold for a
/// variant lives under [`variant_prefix`].
pub fn record_key(id: &ReservationId) -> String {
    format!("{KEY_PREFIX}{id}")
}

pub fn variant_prefix(variant_id: Uuid) -> String {
    format!("{KEY_PREFIX}{variant_id}:")
}

/// Durable key-value store with per-key expiry.
///
/// Entries past their TTL must be invisible to `get` and `scan_by_prefix`
/// even before they are physically evicted. `scan_by_prefix` is expected to be
/// served by an ordered index, not a full scan.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn put(&self, key: &str, record: &Reservation, ttl: Duration) -> anyhow::Result<()>;

    async fn get(&self, key: &str) -> anyhow::Result<Option<Reservation>>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    async fn scan_by_prefix(&self, prefix: &str) -> anyhow::Result<Vec<Reservation>>;
}
