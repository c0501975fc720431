use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use common::audit::{AuditEvent, AuditSink, TracingAuditSink, record_quietly};
use common::logger::warn_if_slow;
use common::time::Clock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::links::CartLinks;
use crate::model::{Availability, Reservation, ReservationId, ReservationRequest, ReservationStatus};
use crate::oracle::StockOracle;
use crate::store::{KEY_PREFIX, ReservationStore, record_key, variant_prefix};

const AUDIT_CATEGORY: &str = "reservation";

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    /// Lapsed holds that could not be written back as expired.
    pub failed: usize,
    /// Holds expired, but whose cart line kept its back-reference.
    pub detach_failed: usize,
}

/// Owns every reservation: mints, extends, closes and expires holds, and
/// answers availability as `stock - live holds`.
///
/// `reserve` reads availability and then writes the hold without a
/// compare-and-swap. Two concurrent requests for the same hot variant can both
/// pass the check and over-reserve; checkout re-validating stock is the
/// backstop for that window.
pub struct ReservationLedger {
    cfg: LedgerConfig,
    store: Arc<dyn ReservationStore>,
    oracle: Arc<dyn StockOracle>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    links: Option<Arc<dyn CartLinks>>,
}

impl ReservationLedger {
    pub fn new(
        cfg: LedgerConfig,
        store: Arc<dyn ReservationStore>,
        oracle: Arc<dyn StockOracle>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cfg,
            store,
            oracle,
            clock,
            audit: Arc::new(TracingAuditSink),
            links: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Lets the sweep clear a cart line's reference to an expired hold.
    pub fn with_links(mut self, links: Arc<dyn CartLinks>) -> Self {
        self.links = Some(links);
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.cfg
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Stock, live holds and what is left for the variant.
    #[instrument(skip(self), target = "ledger", fields(variant_id = %variant_id))]
    pub async fn check_availability(&self, variant_id: Uuid) -> Result<Availability, LedgerError> {
        self.availability_at(variant_id, self.clock.now()).await
    }

    async fn availability_at(
        &self,
        variant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Availability, LedgerError> {
        let total_stock = warn_if_slow(
            "stock_level",
            StdDuration::from_millis(100),
            self.oracle.stock_level(variant_id),
        )
        .await
        .map_err(LedgerError::StockUnavailable)?;

        let reserved_quantity: u64 = self
            .scan(&variant_prefix(variant_id))
            .await?
            .iter()
            .filter(|r| r.variant_id == variant_id && r.is_live(now))
            .map(|r| u64::from(r.quantity))
            .sum();

        let availability = Availability::new(total_stock, reserved_quantity);
        debug!(
            total_stock,
            reserved_quantity,
            available_quantity = availability.available_quantity,
            "availability computed"
        );
        Ok(availability)
    }

    /// Place a hold for `quantity` units of the variant.
    ///
    /// On a shortfall the error carries what *is* available so the caller can
    /// offer a partial add.
    #[instrument(
        skip(self, req),
        target = "ledger",
        fields(variant_id = %req.variant_id, cart_item_id = %req.cart_item_id, quantity = req.quantity)
    )]
    pub async fn reserve(&self, req: ReservationRequest) -> Result<Reservation, LedgerError> {
        if req.quantity == 0 {
            return Err(LedgerError::InvalidQuantity);
        }

        let now = self.clock.now();
        let availability = self.availability_at(req.variant_id, now).await?;

        if availability.available_quantity < u64::from(req.quantity) {
            info!(
                available = availability.available_quantity,
                "reservation rejected: insufficient inventory"
            );
            self.emit(
                AuditEvent::new(AUDIT_CATEGORY, "reserve", req.variant_id.to_string(), now)
                    .with("quantity", req.quantity)
                    .with("available", availability.available_quantity)
                    .failed("insufficient_inventory"),
            )
            .await;

            return Err(LedgerError::InsufficientInventory {
                variant_id: req.variant_id,
                requested: req.quantity,
                available: availability.available_quantity,
            });
        }

        let reservation = Reservation {
            id: ReservationId::compose(req.variant_id, req.cart_item_id, now),
            variant_id: req.variant_id,
            cart_item_id: req.cart_item_id,
            quantity: req.quantity,
            owner: req.owner,
            created_at: now,
            expires_at: now + self.cfg.reservation_timeout,
            extension_count: 0,
            status: ReservationStatus::Active,
            closed_at: None,
        };

        self.persist(&reservation, now).await?;

        info!(reservation_id = %reservation.id, expires_at = %reservation.expires_at, "reservation created");
        self.emit(
            self.event("reserve", &reservation, now)
                .with("quantity", reservation.quantity)
                .with("owner", &reservation.owner),
        )
        .await;

        Ok(reservation)
    }

    /// Push the hold's expiry to `now + extension_increment`.
    #[instrument(skip(self), target = "ledger", fields(reservation_id = %id))]
    pub async fn extend(&self, id: &ReservationId) -> Result<DateTime<Utc>, LedgerError> {
        let now = self.clock.now();

        let Some(mut reservation) = self.load(id).await? else {
            warn!("extend requested for unknown reservation");
            return Err(LedgerError::ReservationNotFound(id.clone()));
        };

        if reservation.status.is_terminal() {
            return Err(LedgerError::ReservationClosed {
                id: id.clone(),
                status: reservation.status,
            });
        }

        if reservation.is_lapsed(now) {
            // Expired on the clock but not yet swept: settle it here.
            self.expire_one(&mut reservation, now).await?;
            return Err(LedgerError::ReservationClosed {
                id: id.clone(),
                status: ReservationStatus::Expired,
            });
        }

        if reservation.extension_count >= self.cfg.max_extensions {
            self.emit(
                self.event("extend", &reservation, now)
                    .failed("extension_limit_reached"),
            )
            .await;
            return Err(LedgerError::ExtensionLimitReached {
                id: id.clone(),
                max: self.cfg.max_extensions,
            });
        }

        reservation.expires_at = reservation
            .expires_at
            .max(now + self.cfg.extension_increment);
        reservation.extension_count += 1;
        reservation.status = ReservationStatus::Extended;

        self.persist(&reservation, now).await?;

        info!(
            expires_at = %reservation.expires_at,
            extension_count = reservation.extension_count,
            "reservation extended"
        );
        self.emit(
            self.event("extend", &reservation, now)
                .with("extension_count", reservation.extension_count),
        )
        .await;

        Ok(reservation.expires_at)
    }

    /// Change how many units a live hold covers, keeping its id and expiry.
    ///
    /// Growing needs the extra units to be free; shrinking always succeeds.
    /// A shortfall reports `available` as free stock plus what the hold
    /// already covers.
    #[instrument(skip(self), target = "ledger", fields(reservation_id = %id))]
    pub async fn resize(&self, id: &ReservationId, quantity: u32) -> Result<Reservation, LedgerError> {
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity);
        }

        let now = self.clock.now();
        let Some(mut reservation) = self.load(id).await? else {
            return Err(LedgerError::ReservationNotFound(id.clone()));
        };

        if reservation.status.is_terminal() {
            return Err(LedgerError::ReservationClosed {
                id: id.clone(),
                status: reservation.status,
            });
        }

        if reservation.is_lapsed(now) {
            self.expire_one(&mut reservation, now).await?;
            return Err(LedgerError::ReservationClosed {
                id: id.clone(),
                status: ReservationStatus::Expired,
            });
        }

        if quantity == reservation.quantity {
            return Ok(reservation);
        }

        if quantity > reservation.quantity {
            let free = self
                .availability_at(reservation.variant_id, now)
                .await?
                .available_quantity;
            let held = u64::from(reservation.quantity);
            if free < u64::from(quantity) - held {
                info!(available = free, "resize rejected: insufficient inventory");
                return Err(LedgerError::InsufficientInventory {
                    variant_id: reservation.variant_id,
                    requested: quantity,
                    available: free + held,
                });
            }
        }

        let from = reservation.quantity;
        reservation.quantity = quantity;
        self.persist(&reservation, now).await?;

        info!(from, to = quantity, "reservation resized");
        self.emit(
            self.event("resize", &reservation, now)
                .with("from", from)
                .with("quantity", quantity),
        )
        .await;

        Ok(reservation)
    }

    /// Give the units back. Unknown or already-closed ids are a no-op.
    #[instrument(skip(self), target = "ledger", fields(reservation_id = %id))]
    pub async fn release(&self, id: &ReservationId) -> Result<(), LedgerError> {
        self.close(id, ReservationStatus::Released, "release").await
    }

    /// Mark the hold as consumed by a placed order. Same contract as `release`.
    #[instrument(skip(self), target = "ledger", fields(reservation_id = %id))]
    pub async fn convert_to_order(&self, id: &ReservationId) -> Result<(), LedgerError> {
        self.close(id, ReservationStatus::Converted, "convert").await
    }

    pub async fn get(&self, id: &ReservationId) -> Result<Option<Reservation>, LedgerError> {
        self.load(id).await
    }

    /// Expire every lapsed hold. Individual failures are logged and counted;
    /// only a failed scan aborts the pass.
    #[instrument(skip(self), target = "ledger")]
    pub async fn sweep(&self) -> Result<SweepReport, LedgerError> {
        let now = self.clock.now();
        let holds = self.scan(KEY_PREFIX).await?;

        let mut report = SweepReport {
            scanned: holds.len(),
            ..SweepReport::default()
        };

        for candidate in holds.into_iter().filter(|r| r.is_lapsed(now)) {
            // Re-read: an extend may have landed since the scan.
            let mut reservation = match self.load(&candidate.id).await {
                Ok(Some(r)) if r.is_lapsed(now) => r,
                Ok(_) => continue,
                Err(e) => {
                    warn!(reservation_id = %candidate.id, error = ?e, "failed to reload lapsed reservation; continuing");
                    report.failed += 1;
                    continue;
                }
            };

            reservation.close(ReservationStatus::Expired, now);
            if let Err(e) = self.persist(&reservation, now).await {
                warn!(reservation_id = %reservation.id, error = ?e, "failed to expire reservation; continuing");
                report.failed += 1;
                continue;
            }
            report.expired += 1;

            if let Err(e) = self.detach(&reservation).await {
                warn!(
                    reservation_id = %reservation.id,
                    cart_item_id = %reservation.cart_item_id,
                    error = ?e,
                    "failed to clear cart back-reference; continuing"
                );
                report.detach_failed += 1;
            }

            self.emit(self.event("expire", &reservation, now)).await;
        }

        info!(
            scanned = report.scanned,
            expired = report.expired,
            failed = report.failed,
            detach_failed = report.detach_failed,
            "reservation sweep complete"
        );

        Ok(report)
    }

    async fn close(
        &self,
        id: &ReservationId,
        status: ReservationStatus,
        action: &'static str,
    ) -> Result<(), LedgerError> {
        let now = self.clock.now();

        let Some(mut reservation) = self.load(id).await? else {
            debug!(action, "reservation unknown; nothing to do");
            return Ok(());
        };

        if reservation.status.is_terminal() {
            debug!(action, status = %reservation.status, "reservation already closed");
            return Ok(());
        }

        reservation.close(status, now);
        self.persist(&reservation, now).await?;

        info!(action, status = %status, "reservation closed");
        self.emit(self.event(action, &reservation, now)).await;

        Ok(())
    }

    async fn expire_one(
        &self,
        reservation: &mut Reservation,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        reservation.close(ReservationStatus::Expired, now);
        self.persist(reservation, now).await?;

        if let Err(e) = self.detach(reservation).await {
            warn!(reservation_id = %reservation.id, error = ?e, "failed to clear cart back-reference");
        }
        self.emit(self.event("expire", reservation, now)).await;
        Ok(())
    }

    async fn detach(&self, reservation: &Reservation) -> anyhow::Result<()> {
        match &self.links {
            Some(links) => {
                links
                    .detach_reservation(reservation.cart_item_id, &reservation.id)
                    .await
            }
            None => Ok(()),
        }
    }

    /// Store TTL: live holds stay readable for their remaining lifetime plus
    /// the retention window, closed ones for the retention window only.
    fn ttl_for(&self, reservation: &Reservation, now: DateTime<Utc>) -> Duration {
        let remaining = if reservation.status.is_holding() {
            (reservation.expires_at - now).max(Duration::zero())
        } else {
            Duration::zero()
        };
        remaining + self.cfg.retention
    }

    async fn persist(&self, reservation: &Reservation, now: DateTime<Utc>) -> Result<(), LedgerError> {
        let key = record_key(&reservation.id);
        let ttl = self.ttl_for(reservation, now);

        warn_if_slow(
            "store_put",
            StdDuration::from_millis(50),
            self.store.put(&key, reservation, ttl),
        )
        .await
        .map_err(LedgerError::StoreUnavailable)
    }

    async fn load(&self, id: &ReservationId) -> Result<Option<Reservation>, LedgerError> {
        let key = record_key(id);
        warn_if_slow(
            "store_get",
            StdDuration::from_millis(50),
            self.store.get(&key),
        )
        .await
        .map_err(LedgerError::StoreUnavailable)
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<Reservation>, LedgerError> {
        warn_if_slow(
            "store_scan",
            StdDuration::from_millis(200),
            self.store.scan_by_prefix(prefix),
        )
        .await
        .map_err(LedgerError::StoreUnavailable)
    }

    fn event(&self, action: &str, reservation: &Reservation, now: DateTime<Utc>) -> AuditEvent {
        AuditEvent::new(AUDIT_CATEGORY, action, reservation.id.to_string(), now)
            .with("variant_id", reservation.variant_id)
            .with("status", reservation.status)
    }

    async fn emit(&self, event: AuditEvent) {
        record_quietly(self.audit.as_ref(), event).await;
    }
}
