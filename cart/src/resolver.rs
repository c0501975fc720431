//! Reconciles a device's view of a cart with the server's copy.
//!
//! Both entry points are pure: same snapshot, same cart and same `now` give the
//! same `Resolution`. Lines come out sorted by `LineKey`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{Cart, CartLineItem, ClientCartSnapshot, ClientLineItem, LineKey, LineValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Side {
    Server,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConflictStrategy {
    LastWriteWins,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncStrategy {
    FastApply,
    Merge,
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStrategy::FastApply => write!(f, "fast_apply"),
            SyncStrategy::Merge => write!(f, "merge"),
        }
    }
}

/// One line both sides changed differently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictRecord {
    pub key: LineKey,
    pub server: LineValue,
    pub client: LineValue,
    pub winner: Side,
    pub strategy: ConflictStrategy,
    pub server_observed_at: DateTime<Utc>,
    /// Client edit time after skew correction.
    pub client_observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub items: Vec<CartLineItem>,
    pub version: u64,
    pub conflicts: Vec<ConflictRecord>,
    pub strategy: SyncStrategy,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Map a client-reported edit time onto the server clock.
///
/// The offset between the client's send time and `now` is treated as clock
/// skew and removed. The result never lies in the future.
pub fn server_observed(
    modified_at: Option<DateTime<Utc>>,
    client_timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let skew = now.signed_duration_since(client_timestamp);
    modified_at
        .unwrap_or(client_timestamp)
        .checked_add_signed(skew)
        // Unrepresentable edit times lose every tie.
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
        .min(now)
}

/// Versions match: the client saw the latest server state, so its lines
/// replace the server's. Line ids, `added_at` and holds survive per key.
pub fn fast_apply(snapshot: &ClientCartSnapshot, server: &Cart, now: DateTime<Utc>) -> Resolution {
    let version = server.version + 1;
    let client = client_lines(snapshot);
    let existing = server_lines(server);

    let mut items = Vec::with_capacity(client.len());
    let (mut added, mut updated) = (0, 0);

    for (key, line) in &client {
        if line.is_tombstone() {
            continue;
        }
        match existing.get(key) {
            Some(current) if LineValue::from(*current) == LineValue::from(*line) => {
                items.push((*current).clone());
            }
            Some(current) => {
                updated += 1;
                items.push(overwrite(current, line, now));
            }
            None => {
                added += 1;
                items.push(new_line(server, key, line, version, now));
            }
        }
    }

    let removed = existing
        .keys()
        .filter(|k| client.get(*k).is_none_or(|l| l.is_tombstone()))
        .count();

    Resolution {
        items,
        version,
        conflicts: Vec::new(),
        strategy: SyncStrategy::FastApply,
        added,
        updated,
        removed,
    }
}

/// Versions diverged: walk every key either side knows about and settle it.
///
/// A line only on the server is kept, a line only on the client is added.
/// Differing lines go to whichever edit the server observed last; ties keep
/// the server's line.
pub fn resolve(snapshot: &ClientCartSnapshot, server: &Cart, now: DateTime<Utc>) -> Resolution {
    let version = snapshot.version.max(server.version) + 1;
    let client = client_lines(snapshot);
    let existing = server_lines(server);
    let keys: BTreeSet<&LineKey> = client.keys().chain(existing.keys()).collect();

    let mut items = Vec::with_capacity(keys.len());
    let mut conflicts = Vec::new();
    let (mut added, mut updated, mut removed) = (0, 0, 0);

    for key in keys {
        match (existing.get(key), client.get(key)) {
            (Some(current), None) => items.push((*current).clone()),
            (None, Some(line)) => {
                if !line.is_tombstone() {
                    added += 1;
                    items.push(new_line(server, key, line, version, now));
                }
            }
            (Some(current), Some(line)) => {
                let server_value = LineValue::from(*current);
                let client_value = LineValue::from(*line);
                if server_value == client_value {
                    items.push((*current).clone());
                    continue;
                }

                let client_observed_at =
                    server_observed(line.modified_at, snapshot.client_timestamp, now);
                let winner = if client_observed_at > current.updated_at {
                    Side::Client
                } else {
                    Side::Server
                };

                conflicts.push(ConflictRecord {
                    key: key.clone(),
                    server: server_value,
                    client: client_value,
                    winner,
                    strategy: ConflictStrategy::LastWriteWins,
                    server_observed_at: current.updated_at,
                    client_observed_at,
                });

                match winner {
                    Side::Server => items.push((*current).clone()),
                    Side::Client if line.is_tombstone() => removed += 1,
                    Side::Client => {
                        updated += 1;
                        items.push(overwrite(current, line, now));
                    }
                }
            }
            (None, None) => {}
        }
    }

    Resolution {
        items,
        version,
        conflicts,
        strategy: SyncStrategy::Merge,
        added,
        updated,
        removed,
    }
}

// Repeated keys in a snapshot: the later entry wins.
fn client_lines(snapshot: &ClientCartSnapshot) -> BTreeMap<LineKey, &ClientLineItem> {
    snapshot.items.iter().map(|l| (l.key(), l)).collect()
}

fn server_lines(cart: &Cart) -> BTreeMap<LineKey, &CartLineItem> {
    cart.items.iter().map(|l| (l.key(), l)).collect()
}

fn overwrite(current: &CartLineItem, line: &ClientLineItem, now: DateTime<Utc>) -> CartLineItem {
    CartLineItem {
        quantity: line.quantity,
        locked_price: line.unit_price,
        updated_at: now,
        ..current.clone()
    }
}

fn new_line(
    cart: &Cart,
    key: &LineKey,
    line: &ClientLineItem,
    version: u64,
    now: DateTime<Utc>,
) -> CartLineItem {
    CartLineItem {
        id: key.line_id(cart.id, version),
        variant_id: line.variant_id,
        quantity: line.quantity,
        locked_price: line.unit_price,
        price_lock_expires_at: None,
        campaign: line.campaign.clone(),
        reservation_id: None,
        valid: true,
        added_at: now,
        updated_at: now,
    }
}
