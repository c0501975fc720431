//! Orchestrates cart mutations: multi-device sync, add, remove and checkout
//! conversion. Holds are placed through the reservation ledger; the cart itself
//! only keeps their ids.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use common::audit::{AuditEvent, AuditSink, TracingAuditSink, record_quietly};
use common::logger::{TraceId, annotate_span, root_span, warn_if_slow};
use ledger::ReservationLedger;
use ledger::error::LedgerError;
use ledger::model::{Reservation, ReservationId, ReservationRequest};
use tracing::{Instrument, debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::SyncError;
use crate::model::{Cart, CartLineItem, CartOwner, ClientCartSnapshot, LineKey};
use crate::repository::{CartRepository, SaveError};
use crate::resolver::{ConflictRecord, SyncStrategy, fast_apply, resolve};

const AUDIT_CATEGORY: &str = "cart_sync";
const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Received,
    FastApply,
    Merge,
    Validated,
    Persisted,
    Responded,
    Rejected,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncPhase::Received => "received",
            SyncPhase::FastApply => "fast_apply",
            SyncPhase::Merge => "merge",
            SyncPhase::Validated => "validated",
            SyncPhase::Persisted => "persisted",
            SyncPhase::Responded => "responded",
            SyncPhase::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub snapshot: ClientCartSnapshot,
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub cart: Cart,
    pub strategy: SyncStrategy,
    pub conflicts: Vec<ConflictRecord>,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

#[derive(Debug, Clone)]
pub struct AddItemRequest {
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub variant_id: Uuid,
    pub quantity: u32,
    pub unit_price: u64,
    pub campaign: Option<String>,
}

/// Exactly one identity must be present. An empty session id counts as absent.
pub fn identify(user_id: Option<Uuid>, session_id: Option<&str>) -> Result<CartOwner, SyncError> {
    match (user_id, session_id.filter(|s| !s.is_empty())) {
        (Some(_), Some(_)) => Err(SyncError::AmbiguousIdentity),
        (Some(user_id), None) => Ok(CartOwner::User(user_id)),
        (None, Some(session_id)) => Ok(CartOwner::Guest(session_id.to_string())),
        (None, None) => Err(SyncError::MissingIdentity),
    }
}

struct Shortfall {
    variant_id: Uuid,
    requested: u64,
    available: u64,
}

/// A hold change made ahead of a cart save.
enum HoldChange {
    Placed(ReservationId),
    Resized { id: ReservationId, from: u32 },
}

struct Cover {
    hold: Reservation,
    change: Option<HoldChange>,
}

pub struct CartSyncService {
    repo: Arc<dyn CartRepository>,
    ledger: Arc<ReservationLedger>,
    audit: Arc<dyn AuditSink>,
    currency: String,
}

impl CartSyncService {
    pub fn new(repo: Arc<dyn CartRepository>, ledger: Arc<ReservationLedger>) -> Self {
        Self {
            repo,
            ledger,
            audit: Arc::new(TracingAuditSink),
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Currency for carts created by `add_item`.
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Reconcile a device's snapshot with the stored cart and persist the
    /// result. Every call leaves exactly one audit record.
    pub async fn sync(&self, req: SyncRequest) -> Result<SyncOutcome, SyncError> {
        let trace_id = TraceId::default();
        let now = self.ledger.now();
        let subject = requester(req.user_id, req.session_id.as_deref());

        let result = self
            .run_sync(&req, now)
            .instrument(root_span("cart_sync", &trace_id))
            .await;

        let event = AuditEvent::new(AUDIT_CATEGORY, "sync", subject, now)
            .with("trace_id", &trace_id)
            .with("client_version", req.snapshot.version);

        let event = match &result {
            Ok(outcome) => event
                .with("cart_id", outcome.cart.id)
                .with("strategy", outcome.strategy)
                .with("version", outcome.cart.version)
                .with("conflicts", outcome.conflicts.len()),
            Err(e) => {
                warn!(phase = %SyncPhase::Rejected, code = e.code(), error = %e, "cart sync rejected");
                event.failed(e.code())
            }
        };
        record_quietly(self.audit.as_ref(), event).await;

        result
    }

    async fn run_sync(&self, req: &SyncRequest, now: DateTime<Utc>) -> Result<SyncOutcome, SyncError> {
        let snapshot = &req.snapshot;
        debug!(phase = %SyncPhase::Received, client_version = snapshot.version, lines = snapshot.items.len(), "cart sync received");

        let owner = identify(req.user_id, req.session_id.as_deref())?;
        let cart = self
            .load(&owner)
            .await?
            .ok_or_else(|| SyncError::CartNotFound(owner.to_string()))?;
        annotate_span(Some(&cart.id), None);

        let resolution = if snapshot.version == cart.version {
            debug!(phase = %SyncPhase::FastApply, version = cart.version, "versions match");
            fast_apply(snapshot, &cart, now)
        } else {
            debug!(
                phase = %SyncPhase::Merge,
                client_version = snapshot.version,
                server_version = cart.version,
                "versions diverged"
            );
            resolve(snapshot, &cart, now)
        };

        for c in &resolution.conflicts {
            info!(
                line = %c.key,
                winner = ?c.winner,
                server_quantity = c.server.quantity,
                client_quantity = c.client.quantity,
                "cart line conflict resolved"
            );
        }

        if let Some(s) = self.check_stock(&resolution.items).await? {
            return Err(rejection(resolution.strategy, s));
        }
        debug!(phase = %SyncPhase::Validated, "stock validated");

        let mut next = Cart {
            items: resolution.items,
            version: resolution.version,
            updated_at: now,
            ..cart.clone()
        };
        next.recompute_totals();

        let changes = match self.cover_lines(&mut next.items, &cart.owner, now).await {
            Ok(changes) => changes,
            Err(e) => return Err(shortfall_or(e, |s| rejection(resolution.strategy, s))),
        };

        if let Err(e) = self.save(&next, Some(cart.version)).await {
            self.undo(changes).await;
            return Err(e);
        }
        debug!(phase = %SyncPhase::Persisted, version = next.version, "cart persisted");

        self.release_dropped(&cart, &next).await;
        self.trim_holds(&next, now).await;

        info!(
            phase = %SyncPhase::Responded,
            strategy = %resolution.strategy,
            version = next.version,
            added = resolution.added,
            updated = resolution.updated,
            removed = resolution.removed,
            conflicts = resolution.conflicts.len(),
            "cart sync complete"
        );

        Ok(SyncOutcome {
            cart: next,
            strategy: resolution.strategy,
            conflicts: resolution.conflicts,
            added: resolution.added,
            updated: resolution.updated,
            removed: resolution.removed,
        })
    }

    /// Add units of a variant, holding stock for the line's whole quantity.
    ///
    /// Creates the cart on first use. Topping up an existing line grows its
    /// hold in place; the hold only changes for good once the cart is saved.
    #[instrument(
        skip(self, req),
        target = "cart",
        fields(variant_id = %req.variant_id, quantity = req.quantity, cart_id = tracing::field::Empty)
    )]
    pub async fn add_item(&self, req: AddItemRequest) -> Result<Cart, SyncError> {
        if req.quantity == 0 {
            return Err(LedgerError::InvalidQuantity.into());
        }

        let owner = identify(req.user_id, req.session_id.as_deref())?;
        let now = self.ledger.now();

        let (mut cart, expected) = match self.load(&owner).await? {
            Some(cart) => {
                let version = cart.version;
                (cart, Some(version))
            }
            None => (Cart::new(Uuid::new_v4(), owner.clone(), &self.currency, now), None),
        };
        annotate_span(Some(&cart.id), Some(&req.variant_id));

        let key = LineKey {
            variant_id: req.variant_id,
            campaign: req.campaign.clone(),
        };
        let version = cart.version + 1;

        let position = match cart.items.iter().position(|i| i.key() == key) {
            Some(p) => {
                let line = &mut cart.items[p];
                line.quantity = line.quantity.saturating_add(req.quantity);
                line.valid = true;
                line.updated_at = now;
                p
            }
            None => {
                cart.items.push(CartLineItem {
                    id: key.line_id(cart.id, version),
                    variant_id: req.variant_id,
                    quantity: req.quantity,
                    locked_price: req.unit_price,
                    price_lock_expires_at: None,
                    campaign: req.campaign,
                    reservation_id: None,
                    valid: true,
                    added_at: now,
                    updated_at: now,
                });
                cart.items.len() - 1
            }
        };

        let line = &mut cart.items[position];
        let quantity = line.quantity;
        let cover = self
            .cover(line, &owner, now)
            .await
            .map_err(|e| shortfall_or(e, insufficient))?;
        line.reprice(req.unit_price, now, cover.hold.expires_at);

        cart.version = version;
        cart.updated_at = now;
        cart.recompute_totals();

        if let Err(e) = self.save(&cart, expected).await {
            self.undo(cover.change.into_iter().collect()).await;
            return Err(e);
        }

        info!(cart_id = %cart.id, version = cart.version, "cart item added");
        self.emit(
            AuditEvent::new(AUDIT_CATEGORY, "add_item", cart.id.to_string(), now)
                .with("variant_id", req.variant_id)
                .with("quantity", quantity)
                .with("reservation_id", &cover.hold.id),
        )
        .await;

        Ok(cart)
    }

    /// Drop a line and give back its hold. Removing an absent line is a no-op.
    #[instrument(skip(self, session_id, key), target = "cart", fields(line = %key))]
    pub async fn remove_item(
        &self,
        user_id: Option<Uuid>,
        session_id: Option<&str>,
        key: &LineKey,
    ) -> Result<Cart, SyncError> {
        let owner = identify(user_id, session_id)?;
        let mut cart = self
            .load(&owner)
            .await?
            .ok_or_else(|| SyncError::CartNotFound(owner.to_string()))?;

        let Some(position) = cart.items.iter().position(|i| &i.key() == key) else {
            debug!("line not in cart; nothing to remove");
            return Ok(cart);
        };

        let now = self.ledger.now();
        let expected = cart.version;
        let line = cart.items.remove(position);
        cart.version += 1;
        cart.updated_at = now;
        cart.recompute_totals();

        self.save(&cart, Some(expected)).await?;

        if let Some(id) = &line.reservation_id {
            self.release_quietly(id).await;
        }

        info!(cart_id = %cart.id, version = cart.version, "cart item removed");
        self.emit(
            AuditEvent::new(AUDIT_CATEGORY, "remove_item", cart.id.to_string(), now)
                .with("variant_id", line.variant_id)
                .with("quantity", line.quantity),
        )
        .await;

        Ok(cart)
    }

    /// Turn the holds behind the cart's valid lines into order holds and
    /// return their ids.
    ///
    /// All or nothing: if any valid line lacks a live hold covering its
    /// quantity, nothing is converted and the lines are reported in
    /// [`SyncError::UncoveredLines`]. A fresh sync re-places their holds.
    #[instrument(skip(self, session_id), target = "cart")]
    pub async fn convert_for_checkout(
        &self,
        user_id: Option<Uuid>,
        session_id: Option<&str>,
    ) -> Result<Vec<ReservationId>, SyncError> {
        let owner = identify(user_id, session_id)?;
        let cart = self
            .load(&owner)
            .await?
            .ok_or_else(|| SyncError::CartNotFound(owner.to_string()))?;
        let now = self.ledger.now();

        let mut holds = Vec::new();
        let mut uncovered = Vec::new();
        for line in cart.items.iter().filter(|i| i.valid) {
            let covering = match &line.reservation_id {
                Some(id) => self
                    .ledger
                    .get(id)
                    .await?
                    .filter(|r| r.cart_item_id == line.id && r.is_live(now) && r.quantity >= line.quantity),
                None => None,
            };
            match covering {
                Some(r) => holds.push(r.id),
                None => uncovered.push(line.key()),
            }
        }

        if !uncovered.is_empty() {
            warn!(cart_id = %cart.id, uncovered = uncovered.len(), "checkout refused: lines without a live hold");
            self.emit(
                AuditEvent::new(AUDIT_CATEGORY, "convert", cart.id.to_string(), now)
                    .with("uncovered", uncovered.len())
                    .failed("uncovered_lines"),
            )
            .await;
            return Err(SyncError::UncoveredLines {
                cart_id: cart.id,
                lines: uncovered,
            });
        }

        for id in &holds {
            self.ledger.convert_to_order(id).await?;
        }

        info!(cart_id = %cart.id, converted = holds.len(), "cart holds converted for checkout");
        self.emit(
            AuditEvent::new(AUDIT_CATEGORY, "convert", cart.id.to_string(), now)
                .with("reservations", holds.len()),
        )
        .await;

        Ok(holds)
    }

    /// Make sure the line's hold covers its quantity: keep a live hold that
    /// already does, grow one that is too small, or place a new one.
    async fn cover(
        &self,
        line: &mut CartLineItem,
        owner: &CartOwner,
        now: DateTime<Utc>,
    ) -> Result<Cover, LedgerError> {
        if let Some(id) = &line.reservation_id {
            match self.ledger.get(id).await? {
                Some(r) if r.cart_item_id == line.id && r.is_live(now) => {
                    if r.quantity >= line.quantity {
                        return Ok(Cover { hold: r, change: None });
                    }
                    let from = r.quantity;
                    let hold = self.ledger.resize(id, line.quantity).await?;
                    return Ok(Cover {
                        change: Some(HoldChange::Resized { id: hold.id.clone(), from }),
                        hold,
                    });
                }
                _ => {}
            }
        }

        let hold = self
            .ledger
            .reserve(ReservationRequest {
                variant_id: line.variant_id,
                cart_item_id: line.id,
                quantity: line.quantity,
                owner: owner.reservation_owner(),
            })
            .await?;
        line.reservation_id = Some(hold.id.clone());

        Ok(Cover {
            change: Some(HoldChange::Placed(hold.id.clone())),
            hold,
        })
    }

    /// Cover every valid line. On failure the changes made so far are undone.
    async fn cover_lines(
        &self,
        items: &mut [CartLineItem],
        owner: &CartOwner,
        now: DateTime<Utc>,
    ) -> Result<Vec<HoldChange>, LedgerError> {
        let mut changes = Vec::new();
        for line in items.iter_mut().filter(|i| i.valid) {
            match self.cover(line, owner, now).await {
                Ok(cover) => changes.extend(cover.change),
                Err(e) => {
                    self.undo(changes).await;
                    return Err(e);
                }
            }
        }
        Ok(changes)
    }

    /// Revert hold changes whose cart write never landed.
    async fn undo(&self, changes: Vec<HoldChange>) {
        for change in changes {
            match change {
                HoldChange::Placed(id) => self.release_quietly(&id).await,
                HoldChange::Resized { id, from } => {
                    if let Err(e) = self.ledger.resize(&id, from).await {
                        warn!(reservation_id = %id, error = ?e, "failed to shrink hold back after failed save");
                    }
                }
            }
        }
    }

    /// Shrink holds that are larger than their line after a sync lowered it.
    async fn trim_holds(&self, cart: &Cart, now: DateTime<Utc>) {
        for line in cart.items.iter().filter(|i| i.valid) {
            let Some(id) = &line.reservation_id else {
                continue;
            };
            let oversized = match self.ledger.get(id).await {
                Ok(hold) => hold.is_some_and(|r| r.is_live(now) && r.quantity > line.quantity),
                Err(e) => {
                    warn!(reservation_id = %id, error = ?e, "failed to read hold for trimming");
                    false
                }
            };
            if oversized {
                if let Err(e) = self.ledger.resize(id, line.quantity).await {
                    warn!(reservation_id = %id, error = ?e, "failed to trim hold; it stays oversized until it expires");
                }
            }
        }
    }

    /// Post-merge stock check: each variant's total across valid lines must
    /// fit in what is free plus what those lines already hold.
    async fn check_stock(&self, items: &[CartLineItem]) -> Result<Option<Shortfall>, SyncError> {
        let mut required: BTreeMap<Uuid, u64> = BTreeMap::new();
        for item in items.iter().filter(|i| i.valid) {
            *required.entry(item.variant_id).or_default() += u64::from(item.quantity);
        }

        let held = self.own_holds(items).await?;

        for (variant_id, requested) in required {
            let available = self.ledger.check_availability(variant_id).await?.available_quantity
                + held.get(&variant_id).copied().unwrap_or(0);
            if requested > available {
                debug!(%variant_id, requested, available, "post-merge stock check failed");
                return Ok(Some(Shortfall {
                    variant_id,
                    requested,
                    available,
                }));
            }
        }

        Ok(None)
    }

    /// Live units the valid lines already hold, per variant. A hold larger
    /// than its line only counts up to the line's quantity.
    async fn own_holds(&self, items: &[CartLineItem]) -> Result<BTreeMap<Uuid, u64>, SyncError> {
        let now = self.ledger.now();
        let mut held = BTreeMap::new();

        for item in items.iter().filter(|i| i.valid) {
            let Some(id) = &item.reservation_id else {
                continue;
            };
            match self.ledger.get(id).await? {
                Some(r) if r.cart_item_id == item.id && r.is_live(now) => {
                    *held.entry(r.variant_id).or_default() += u64::from(r.quantity.min(item.quantity));
                }
                _ => {}
            }
        }

        Ok(held)
    }

    /// Holds whose line did not survive the sync.
    async fn release_dropped(&self, before: &Cart, after: &Cart) {
        let kept: BTreeSet<&ReservationId> = after
            .items
            .iter()
            .filter_map(|i| i.reservation_id.as_ref())
            .collect();

        for id in before.items.iter().filter_map(|i| i.reservation_id.as_ref()) {
            if !kept.contains(id) {
                self.release_quietly(id).await;
            }
        }
    }

    async fn release_quietly(&self, id: &ReservationId) {
        if let Err(e) = self.ledger.release(id).await {
            warn!(reservation_id = %id, error = ?e, "failed to release hold; sweep will expire it");
        }
    }

    async fn load(&self, owner: &CartOwner) -> Result<Option<Cart>, SyncError> {
        let lookup = async {
            match owner {
                CartOwner::User(user_id) => self.repo.find_by_user(*user_id).await,
                CartOwner::Guest(session_id) => self.repo.find_by_session(session_id).await,
            }
        };

        warn_if_slow("cart_load", StdDuration::from_millis(100), lookup)
            .await
            .map_err(SyncError::StoreUnavailable)
    }

    async fn save(&self, cart: &Cart, expected: Option<u64>) -> Result<(), SyncError> {
        warn_if_slow(
            "cart_save",
            StdDuration::from_millis(100),
            self.repo.save_atomic(cart, expected),
        )
        .await
        .map_err(|e| match e {
            SaveError::VersionConflict { cart_id, expected } => SyncError::VersionConflict {
                cart_id,
                expected: expected.unwrap_or_default(),
            },
            SaveError::Store(e) => SyncError::StoreUnavailable(e),
        })
    }

    async fn emit(&self, event: AuditEvent) {
        record_quietly(self.audit.as_ref(), event).await;
    }
}

fn rejection(strategy: SyncStrategy, s: Shortfall) -> SyncError {
    match strategy {
        SyncStrategy::FastApply => insufficient(s),
        SyncStrategy::Merge => SyncError::UnresolvableConflict {
            variant_id: s.variant_id,
            requested: s.requested,
            available: s.available,
        },
    }
}

fn insufficient(s: Shortfall) -> SyncError {
    SyncError::InsufficientInventory {
        variant_id: s.variant_id,
        requested: s.requested,
        available: s.available,
    }
}

/// Ledger shortfalls become cart-level rejections; anything else passes through.
fn shortfall_or(e: LedgerError, reject: impl FnOnce(Shortfall) -> SyncError) -> SyncError {
    match e {
        LedgerError::InsufficientInventory {
            variant_id,
            requested,
            available,
        } => reject(Shortfall {
            variant_id,
            requested: u64::from(requested),
            available,
        }),
        e => e.into(),
    }
}

fn requester(user_id: Option<Uuid>, session_id: Option<&str>) -> String {
    identify(user_id, session_id)
        .map(|owner| owner.to_string())
        .unwrap_or_else(|_| "unidentified".to_string())
}
