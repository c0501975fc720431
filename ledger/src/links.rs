use async_trait::async_trait;
use uuid::Uuid;

use crate::model::ReservationId;

/// Hook into whatever owns cart line items, so the sweep can drop the weak
/// back-reference a line keeps to an expired hold.
#[async_trait]
pub trait CartLinks: Send + Sync {
    async fn detach_reservation(
        &self,
        cart_item_id: Uuid,
        reservation_id: &ReservationId,
    ) -> anyhow::Result<()>;
}
