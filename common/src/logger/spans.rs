use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{Span, field};

use super::TraceId;

/// Create a root span for a sync call / sweep pass
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id.as_str(),
        cart_id = field::Empty,
        variant_id = field::Empty
    )
}

pub fn annotate_span(cart_id: Option<&uuid::Uuid>, variant_id: Option<&uuid::Uuid>) {
    let span = Span::current();
    if let Some(cid) = cart_id {
        span.record("cart_id", field::display(cid));
    }
    if let Some(vid) = variant_id {
        span.record("variant_id", field::display(vid));
    }
}

pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
