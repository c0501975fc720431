//! Periodic expiry sweep.
//!
//! Runs on its own fixed cadence, independent of request traffic, until the
//! shutdown channel flips to `true` or its sender is dropped.

use std::sync::Arc;
use std::time::Duration;

use common::logger::{TraceId, root_span};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, error, info};

use crate::ledger::ReservationLedger;

pub fn spawn_sweeper(
    ledger: Arc<ReservationLedger>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = interval.as_secs(), "reservation sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let span = root_span("reservation_sweep", &TraceId::default());
                    if let Err(e) = ledger.sweep().instrument(span).await {
                        error!(error = ?e, "reservation sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("reservation sweeper stopped");
    })
}
