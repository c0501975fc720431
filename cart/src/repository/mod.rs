pub mod sqlite_repository;

use std::sync::Arc;

use async_trait::async_trait;
use ledger::links::CartLinks;
use ledger::model::ReservationId;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Cart, CartId};

pub use sqlite_repository::SqliteCartRepository;

#[derive(Error, Debug)]
pub enum SaveError {
    /// Someone else persisted the cart since it was loaded.
    #[error("cart {cart_id} is no longer at version {expected:?}")]
    VersionConflict {
        cart_id: CartId,
        expected: Option<u64>,
    },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Durable home of carts and their line items.
#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn find_by_user(&self, user_id: Uuid) -> anyhow::Result<Option<Cart>>;

    async fn find_by_session(&self, session_id: &str) -> anyhow::Result<Option<Cart>>;

    /// Write the cart and all of its lines as one unit.
    ///
    /// `expected_version` is the version the caller loaded; `None` means the
    /// cart must not exist yet.
    async fn save_atomic(&self, cart: &Cart, expected_version: Option<u64>) -> Result<(), SaveError>;

    /// Clear a line's back-reference if it still points at `reservation_id`.
    async fn detach_reservation(
        &self,
        cart_item_id: Uuid,
        reservation_id: &ReservationId,
    ) -> anyhow::Result<()>;
}

/// Lets the reservation sweep reach into the cart repository.
pub struct RepositoryCartLinks {
    repo: Arc<dyn CartRepository>,
}

impl RepositoryCartLinks {
    pub fn new(repo: Arc<dyn CartRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl CartLinks for RepositoryCartLinks {
    async fn detach_reservation(
        &self,
        cart_item_id: Uuid,
        reservation_id: &ReservationId,
    ) -> anyhow::Result<()> {
        self.repo.detach_reservation(cart_item_id, reservation_id).await
    }
}
