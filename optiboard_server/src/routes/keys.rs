//! API-key management routes, backed by the credential vault.

use crate::error::ApiError;
use crate::extract::UserIdHeader;
use crate::server::AppState;
use axum::extract::Path;
use axum::routing::{delete, get};
use axum::{Extension, Json};
use optiboard_core::ApiKeyRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CreateKeyResponse {
    pub key: ApiKeyRecord,
    /// The plaintext key. Returned exactly once; unrecoverable afterwards.
    pub secret: String,
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/keys", get(list_keys).post(create_key))
        .route("/keys/{key_id}", delete(revoke_key))
}

/// POST /api/v1/keys — mint a new remote-service key.
#[tracing::instrument(level = "info", skip_all)]
async fn create_key(
    UserIdHeader(user_id): UserIdHeader,
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<CreateKeyRequest>,
) -> Result<Json<CreateKeyResponse>, ApiError> {
    let (key, secret) = state.vault.create(user_id, &req.name).await?;
    Ok(Json(CreateKeyResponse { key, secret }))
}

/// GET /api/v1/keys — key metadata, newest first. Never includes secrets.
#[tracing::instrument(level = "debug", skip_all)]
async fn list_keys(
    UserIdHeader(user_id): UserIdHeader,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<ApiKeyRecord>>, ApiError> {
    let keys = state.vault.list(user_id).await?;
    Ok(Json(keys))
}

/// DELETE /api/v1/keys/{key_id} — irreversible revocation (the row stays).
#[tracing::instrument(level = "info", skip_all)]
async fn revoke_key(
    UserIdHeader(user_id): UserIdHeader,
    Extension(state): Extension<Arc<AppState>>,
    Path(key_id): Path<Uuid>,
) -> Result<Json<ApiKeyRecord>, ApiError> {
    let key = state.vault.revoke(user_id, key_id).await?;
    Ok(Json(key))
}
