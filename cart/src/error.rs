use ledger::LedgerError;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{CartId, LineKey};

/// Why a cart mutation was rejected. Nothing is persisted on any of these.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("request carries neither a user id nor a session id")]
    MissingIdentity,

    #[error("request carries both a user id and a session id")]
    AmbiguousIdentity,

    #[error("no cart for {0}")]
    CartNotFound(String),

    #[error(
        "insufficient inventory for variant {variant_id}: requested {requested}, available {available}"
    )]
    InsufficientInventory {
        variant_id: Uuid,
        requested: u64,
        available: u64,
    },

    /// The merge itself succeeded, but its result cannot be honoured.
    #[error(
        "merged cart needs {requested} of variant {variant_id}, only {available} available"
    )]
    UnresolvableConflict {
        variant_id: Uuid,
        requested: u64,
        available: u64,
    },

    #[error("cart {cart_id} changed since version {expected}")]
    VersionConflict { cart_id: CartId, expected: u64 },

    /// Checkout found valid lines whose hold lapsed or never existed.
    #[error("cart {cart_id} has {} line(s) without a live hold", .lines.len())]
    UncoveredLines { cart_id: CartId, lines: Vec<LineKey> },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("cart repository unavailable")]
    StoreUnavailable(#[source] anyhow::Error),
}

impl SyncError {
    /// A lost version race or a collaborator outage; re-reading and retrying
    /// may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::VersionConflict { .. } | SyncError::StoreUnavailable(_) => true,
            SyncError::Ledger(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SyncError::MissingIdentity => "missing_identity",
            SyncError::AmbiguousIdentity => "ambiguous_identity",
            SyncError::CartNotFound(_) => "cart_not_found",
            SyncError::InsufficientInventory { .. } => "insufficient_inventory",
            SyncError::UnresolvableConflict { .. } => "unresolvable_conflict",
            SyncError::VersionConflict { .. } => "version_conflict",
            SyncError::UncoveredLines { .. } => "uncovered_lines",
            SyncError::Ledger(LedgerError::InsufficientInventory { .. }) => "insufficient_inventory",
            SyncError::Ledger(_) => "ledger",
            SyncError::StoreUnavailable(_) => "store_unavailable",
        }
    }

    /// Units missing, for either flavour of inventory rejection.
    pub fn shortfall(&self) -> Option<u64> {
        match self {
            SyncError::InsufficientInventory {
                requested,
                available,
                ..
            }
            | SyncError::UnresolvableConflict {
                requested,
                available,
                ..
            } => Some(requested.saturating_sub(*available)),
            SyncError::Ledger(e) => e.shortfall(),
            _ => None,
        }
    }
}
