use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Composite `{variant}:{cart_item}:{created_us}` identifier.
///
/// The variant leads so that store keys for one variant are contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(String);

impl ReservationId {
    pub fn compose(variant_id: Uuid, cart_item_id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self(format!(
            "{}:{}:{}",
            variant_id,
            cart_item_id,
            created_at.timestamp_micros()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ReservationId {
    fn from(v: String) -> Self {
        Self(v)
    }
}

impl From<&str> for ReservationId {
    fn from(v: &str) -> Self {
        Self(v.to_string())
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Active,
    Extended,
    Released,
    Converted,
    Expired,
}

impl ReservationStatus {
    /// Active and Extended holds count against availability.
    pub fn is_holding(&self) -> bool {
        matches!(self, ReservationStatus::Active | ReservationStatus::Extended)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_holding()
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReservationStatus::Active => "Active",
            ReservationStatus::Extended => "Extended",
            ReservationStatus::Released => "Released",
            ReservationStatus::Converted => "Converted",
            ReservationStatus::Expired => "Expired",
        };
        f.write_str(s)
    }
}

impl FromStr for ReservationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(ReservationStatus::Active),
            "Extended" => Ok(ReservationStatus::Extended),
            "Released" => Ok(ReservationStatus::Released),
            "Converted" => Ok(ReservationStatus::Converted),
            "Expired" => Ok(ReservationStatus::Expired),
            other => Err(anyhow::anyhow!("Invalid ReservationStatus value: {}", other)),
        }
    }
}

/// Who the hold was taken for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Owner {
    User { user_id: Uuid },
    Guest { session_id: String },
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::User { user_id } => write!(f, "user:{user_id}"),
            Owner::Guest { session_id } => write!(f, "guest:{session_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub variant_id: Uuid,
    pub cart_item_id: Uuid,
    pub quantity: u32,
    pub owner: Owner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,

    // Claim
    pub variant_id: Uuid,
    pub cart_item_id: Uuid,
    pub quantity: u32,
    pub owner: Owner,

    // Timing
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub extension_count: u32,

    // Lifecycle
    pub status: ReservationStatus,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// True while the hold still counts against the variant's stock.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status.is_holding() && now < self.expires_at
    }

    /// Holding on paper, but its expiry has passed and no sweep has run yet.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status.is_holding() && now >= self.expires_at
    }

    pub(crate) fn close(&mut self, status: ReservationStatus, now: DateTime<Utc>) {
        debug_assert!(status.is_terminal(), "close() needs a terminal status");
        self.status = status;
        self.closed_at = Some(now);
    }
}

/// Point-in-time stock picture for one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub total_stock: u64,
    pub reserved_quantity: u64,
    pub available_quantity: u64,
}

impl Availability {
    pub fn new(total_stock: u64, reserved_quantity: u64) -> Self {
        Self {
            total_stock,
            reserved_quantity,
            available_quantity: total_stock.saturating_sub(reserved_quantity),
        }
    }
}
