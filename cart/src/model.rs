use std::fmt;

use chrono::{DateTime, Utc};
use ledger::model::{Owner, ReservationId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type CartId = Uuid;

/// Exactly one identity keys a cart: an authenticated user or a guest session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CartOwner {
    User(Uuid),
    Guest(String),
}

impl CartOwner {
    pub fn kind(&self) -> &'static str {
        match self {
            CartOwner::User(_) => "user",
            CartOwner::Guest(_) => "guest",
        }
    }

    /// The user id or the guest session id, as stored.
    pub fn reference(&self) -> String {
        match self {
            CartOwner::User(id) => id.to_string(),
            CartOwner::Guest(session) => session.clone(),
        }
    }

    pub fn reservation_owner(&self) -> Owner {
        match self {
            CartOwner::User(user_id) => Owner::User { user_id: *user_id },
            CartOwner::Guest(session_id) => Owner::Guest {
                session_id: session_id.clone(),
            },
        }
    }
}

impl fmt::Display for CartOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.reference())
    }
}

/// Identity of a line across devices: same variant under the same campaign.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineKey {
    pub variant_id: Uuid,
    pub campaign: Option<String>,
}

impl LineKey {
    /// Stable line id for a line first created at `version` of `cart_id`.
    pub fn line_id(&self, cart_id: CartId, version: u64) -> Uuid {
        let name = format!(
            "{}:{}:{}",
            self.variant_id,
            self.campaign.as_deref().unwrap_or(""),
            version
        );
        Uuid::new_v5(&cart_id, name.as_bytes())
    }
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.campaign {
            Some(c) => write!(f, "{}#{}", self.variant_id, c),
            None => write!(f, "{}", self.variant_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineItem {
    pub id: Uuid,
    pub variant_id: Uuid,
    pub quantity: u32,

    // Price lock, in minor currency units
    pub locked_price: u64,
    pub price_lock_expires_at: Option<DateTime<Utc>>,

    pub campaign: Option<String>,

    /// Weak back-reference; the ledger owns the hold.
    pub reservation_id: Option<ReservationId>,
    pub valid: bool,

    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartLineItem {
    pub fn key(&self) -> LineKey {
        LineKey {
            variant_id: self.variant_id,
            campaign: self.campaign.clone(),
        }
    }

    /// A lock can only lower the price: `min(locked, current)` while it
    /// holds, `current` once it has expired.
    pub fn effective_unit_price(&self, current_price: u64, now: DateTime<Utc>) -> u64 {
        match self.price_lock_expires_at {
            Some(until) if now >= until => current_price,
            _ => self.locked_price.min(current_price),
        }
    }

    /// Bring the locked price in line with `current_price`. A lapsed lock
    /// (or a line that never had one) is re-locked at the current price
    /// until `relock_until`.
    pub fn reprice(&mut self, current_price: u64, now: DateTime<Utc>, relock_until: DateTime<Utc>) {
        let lapsed = self.price_lock_expires_at.is_none_or(|until| now >= until);
        self.locked_price = self.effective_unit_price(current_price, now);
        if lapsed {
            self.price_lock_expires_at = Some(relock_until);
        }
    }

    /// Billed at the locked price. Lines pick up price changes through
    /// [`CartLineItem::reprice`] when they are next touched.
    pub fn line_total(&self) -> u64 {
        self.locked_price.saturating_mul(u64::from(self.quantity))
    }
}

/// Authoritative server-side cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub owner: CartOwner,
    pub items: Vec<CartLineItem>,

    /// Bumped on every persisted mutation.
    pub version: u64,
    pub currency: String,

    // Derived; see `recompute_totals`
    pub total_items: u64,
    pub total_amount: u64,

    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(id: CartId, owner: CartOwner, currency: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner,
            items: Vec::new(),
            version: 0,
            currency: currency.into(),
            total_items: 0,
            total_amount: 0,
            updated_at: now,
        }
    }

    /// Totals as a pure function of the valid lines.
    pub fn recompute_totals(&mut self) {
        let (items, amount) = self
            .items
            .iter()
            .filter(|i| i.valid)
            .fold((0u64, 0u64), |(n, a), i| {
                (n + u64::from(i.quantity), a.saturating_add(i.line_total()))
            });

        self.total_items = items;
        self.total_amount = amount;
    }

    pub fn item(&self, key: &LineKey) -> Option<&CartLineItem> {
        self.items.iter().find(|i| &i.key() == key)
    }
}

/// What a device believes the cart looks like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCartSnapshot {
    pub version: u64,
    pub items: Vec<ClientLineItem>,
    /// Client clock at send time. Only used to measure skew.
    pub client_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientLineItem {
    pub variant_id: Uuid,
    /// `0` marks a line the client deleted.
    pub quantity: u32,
    pub unit_price: u64,
    pub campaign: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl ClientLineItem {
    pub fn key(&self) -> LineKey {
        LineKey {
            variant_id: self.variant_id,
            campaign: self.campaign.clone(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.quantity == 0
    }
}

/// The two compared fields of one side of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineValue {
    pub quantity: u32,
    pub unit_price: u64,
}

impl From<&CartLineItem> for LineValue {
    fn from(i: &CartLineItem) -> Self {
        Self {
            quantity: i.quantity,
            unit_price: i.locked_price,
        }
    }
}

impl From<&ClientLineItem> for LineValue {
    fn from(i: &ClientLineItem) -> Self {
        Self {
            quantity: i.quantity,
            unit_price: i.unit_price,
        }
    }
}
