use thiserror::Error;
use uuid::Uuid;

use crate::model::{ReservationId, ReservationStatus};

/// Typed failures raised by the reservation ledger.
///
/// Inventory-affecting operations fail closed: an unreachable oracle or store
/// is an error, never an implicit grant.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("reservation quantity must be positive")]
    InvalidQuantity,

    #[error(
        "insufficient inventory for variant {variant_id}: requested {requested}, available {available}"
    )]
    InsufficientInventory {
        variant_id: Uuid,
        requested: u32,
        available: u64,
    },

    #[error("reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    #[error("reservation {id} is already {status}")]
    ReservationClosed {
        id: ReservationId,
        status: ReservationStatus,
    },

    #[error("reservation {id} reached the extension limit of {max}")]
    ExtensionLimitReached { id: ReservationId, max: u32 },

    #[error("stock oracle unavailable")]
    StockUnavailable(#[source] anyhow::Error),

    #[error("reservation store unavailable")]
    StoreUnavailable(#[source] anyhow::Error),
}

impl LedgerError {
    /// Units missing to satisfy the request, if this is an inventory rejection.
    pub fn shortfall(&self) -> Option<u64> {
        match self {
            LedgerError::InsufficientInventory {
                requested,
                available,
                ..
            } => Some(u64::from(*requested).saturating_sub(*available)),
            _ => None,
        }
    }

    /// Collaborator outages; safe to retry because every mutation is idempotent
    /// or re-checks availability.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::StockUnavailable(_) | LedgerError::StoreUnavailable(_)
        )
    }
}
