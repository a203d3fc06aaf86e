use crate::server::AppState;
use axum::{Extension, Json};
use std::sync::Arc;

/// GET /health — liveness plus uptime.
pub async fn get_health(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}
