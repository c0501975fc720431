//! Audit collaborator contract.
//!
//! Sinks are fire-and-forget from the caller's point of view: a failing sink
//! is logged and never fails the primary operation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    /// Subsystem that produced the event, e.g. `reservation` or `cart_sync`.
    pub category: &'static str,
    pub action: String,
    pub subject: String,
    pub outcome: AuditOutcome,
    pub attributes: BTreeMap<String, String>,
}

impl AuditEvent {
    pub fn new(
        category: &'static str,
        action: impl Into<String>,
        subject: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            at,
            category,
            action: action.into(),
            subject: subject.into(),
            outcome: AuditOutcome::Success,
            attributes: BTreeMap::new(),
        }
    }

    pub fn failed(mut self, reason: impl Into<String>) -> Self {
        self.outcome = AuditOutcome::Failure(reason.into());
        self
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == AuditOutcome::Success
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> anyhow::Result<()>;
}

/// Forwards to the sink and swallows (but logs) any failure.
pub async fn record_quietly(sink: &dyn AuditSink, event: AuditEvent) {
    let category = event.category;
    let action = event.action.clone();

    if let Err(e) = sink.record(event).await {
        tracing::warn!(error = ?e, category, action = %action, "audit sink rejected event");
    }
}

/// Writes events to the `audit` tracing target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> anyhow::Result<()> {
        match &event.outcome {
            AuditOutcome::Success => tracing::info!(
                target: "audit",
                category = event.category,
                action = %event.action,
                subject = %event.subject,
                attributes = ?event.attributes,
                "audit"
            ),
            AuditOutcome::Failure(reason) => tracing::warn!(
                target: "audit",
                category = event.category,
                action = %event.action,
                subject = %event.subject,
                reason = %reason,
                attributes = ?event.attributes,
                "audit"
            ),
        }
        Ok(())
    }
}

/// Keeps every event in memory. Used by tests and local tooling.
#[derive(Clone, Debug, Default)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.action.clone()).collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> anyhow::Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}
