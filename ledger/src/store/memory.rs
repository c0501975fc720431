use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::time::Clock;
use parking_lot::Mutex;
use tracing::debug;

use super::ReservationStore;
use crate::model::Reservation;

#[derive(Clone, Debug)]
struct Entry {
    record: Reservation,
    evict_at: DateTime<Utc>,
}

/// In-process store backed by an ordered map.
///
/// Prefix scans are range scans over the key order, so per-variant lookups
/// cost `O(log n + k)`.
pub struct InMemoryReservationStore {
    entries: Mutex<BTreeMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryReservationStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            clock,
        }
    }

    /// Physically drop entries whose TTL elapsed. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.evict_at > now);
        let purged = before - entries.len();

        if purged > 0 {
            debug!(purged, "evicted expired reservation entries");
        }
        purged
    }

    /// Raw entry count, including entries past their TTL.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn put(&self, key: &str, record: &Reservation, ttl: Duration) -> anyhow::Result<()> {
        let evict_at = self.clock.now() + ttl;
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                record: record.clone(),
                evict_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Reservation>> {
        let now = self.clock.now();
        Ok(self
            .entries
            .lock()
            .get(key)
            .filter(|e| e.evict_at > now)
            .map(|e| e.record.clone()))
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn scan_by_prefix(&self, prefix: &str) -> anyhow::Result<Vec<Reservation>> {
        let now = self.clock.now();
        let entries = self.entries.lock();

        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.evict_at > now)
            .map(|(_, e)| e.record.clone())
            .collect())
    }
}
