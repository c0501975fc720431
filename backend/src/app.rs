//! Wires the stores, the ledger and the cart service onto one SQLite pool.

use std::sync::Arc;
use std::time::Duration;

use cart::{CartRepository, CartSyncService, RepositoryCartLinks, SqliteCartRepository};
use common::time::Clock;
use ledger::ReservationLedger;
use ledger::store::sqlite_store::SqliteReservationStore;
use ledger::sweeper::spawn_sweeper;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::AppConfig;
use crate::db::Db;
use crate::stock::SqlStockOracle;

pub struct App {
    pub db: Db,
    pub stock: SqlStockOracle,
    pub reservations: Arc<SqliteReservationStore>,
    pub carts: Arc<dyn CartRepository>,
    pub ledger: Arc<ReservationLedger>,
    pub sync: Arc<CartSyncService>,
}

impl App {
    /// Connect, migrate and construct every service.
    pub async fn build(cfg: &AppConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let db = Db::connect(&cfg.database_url, cfg.db_max_connections).await?;
        db.migrate().await?;

        let stock = SqlStockOracle::new(db.pool.clone());
        let reservations = Arc::new(SqliteReservationStore::from_pool(
            db.pool.clone(),
            clock.clone(),
        ));
        let carts: Arc<dyn CartRepository> = Arc::new(SqliteCartRepository::from_pool(
            db.pool.clone(),
            clock.clone(),
        ));

        let ledger = Arc::new(
            ReservationLedger::new(
                cfg.ledger.clone(),
                reservations.clone(),
                Arc::new(stock.clone()),
                clock,
            )
            .with_links(Arc::new(RepositoryCartLinks::new(carts.clone()))),
        );

        let sync = Arc::new(
            CartSyncService::new(carts.clone(), ledger.clone())
                .with_currency(cfg.default_currency.clone()),
        );

        Ok(Self {
            db,
            stock,
            reservations,
            carts,
            ledger,
            sync,
        })
    }

    /// Expiry sweep plus TTL purge; both stop when `shutdown` flips.
    pub fn spawn_background(
        &self,
        cfg: &AppConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        vec![
            spawn_sweeper(self.ledger.clone(), cfg.ledger.sweep_period(), shutdown.clone()),
            spawn_purger(self.reservations.clone(), cfg.purge_interval, shutdown),
        ]
    }
}

/// Deletes reservation rows whose TTL elapsed.
fn spawn_purger(
    store: Arc<SqliteReservationStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = store.purge_expired().await {
                        tracing::error!(error = ?e, "reservation purge failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
