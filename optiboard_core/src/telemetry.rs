//! Pluggable observability sink for sync activity.
//!
//! The engine reports coarse-grained events (batch finished, item failed)
//! through this interface so deployments can forward them to an external
//! collector without touching the sync path.

/// Receives sync lifecycle events. Implementations must be cheap and must
/// never fail the calling operation.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: &str, payload: &serde_json::Value);
}

/// Default sink: structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, event: &str, payload: &serde_json::Value) {
        tracing::info!(target: "optiboard::telemetry", event, payload = %payload, "telemetry");
    }
}
