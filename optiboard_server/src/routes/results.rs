//! Dashboard result listing and sync routes.
//!
//! Listing serves the local cache; an empty cache or an explicit `sync=true`
//! triggers an automatic sync first. Sync failures degrade to cached data
//! rather than blocking the dashboard.

use crate::error::ApiError;
use crate::extract::UserIdHeader;
use crate::server::AppState;
use axum::extract::{Path, Query};
use axum::routing::{get, post};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use optiboard_core::{
    DashboardDb as _, Pagination, ResultPage, ResultQuery, ResultRecord, RunStatus, SortField,
    SortOrder, SyncReport,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<RunStatus>,
    pub strategy: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub sort_by: Option<SortField>,
    pub sort_order: Option<SortOrder>,
    /// Force a refresh from the remote service before answering.
    #[serde(default)]
    pub sync: bool,
}

#[derive(Debug, Deserialize)]
pub struct SyncManyRequest {
    pub operation_ids: Vec<String>,
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/results", get(list_results))
        .route("/results/sync", post(sync_many))
        .route("/results/{operation_id}", get(get_result))
        .route("/results/{operation_id}/sync", post(sync_one))
}

/// GET /api/v1/results — paginated, filtered, sorted listing with stats.
#[tracing::instrument(level = "debug", skip_all)]
async fn list_results(
    UserIdHeader(user_id): UserIdHeader,
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<ResultPage>, ApiError> {
    let query = ResultQuery {
        page: params.page.unwrap_or(1),
        limit: params.limit.unwrap_or(20),
        status: params.status,
        strategy: params.strategy,
        since: params.start_date,
        until: params.end_date,
        search: params.search,
        sort_by: params.sort_by.unwrap_or(SortField::CreatedAt),
        sort_order: params.sort_order.unwrap_or(SortOrder::Desc),
    }
    .clamped();

    let (mut items, mut total) = state.db.list_results(user_id, &query).await?;

    if total == 0 || params.sync {
        match state.sync.auto_sync(user_id).await {
            Ok(_) => {
                (items, total) = state.db.list_results(user_id, &query).await?;
            }
            Err(e) => {
                tracing::warn!(error = %e, "auto sync failed; serving cached data");
            }
        }
    }

    let stats = state.db.result_stats(user_id).await?;
    Ok(Json(ResultPage {
        items,
        pagination: Pagination::new(query.page, query.limit, total),
        stats,
    }))
}

/// GET /api/v1/results/{operation_id} — cache miss falls through to the
/// remote service.
#[tracing::instrument(level = "debug", skip_all)]
async fn get_result(
    UserIdHeader(user_id): UserIdHeader,
    Extension(state): Extension<Arc<AppState>>,
    Path(operation_id): Path<String>,
) -> Result<Json<ResultRecord>, ApiError> {
    if let Some(record) = state.db.get_result(user_id, &operation_id).await? {
        return Ok(Json(record));
    }

    match state.sync.sync_one(user_id, &operation_id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::Core(optiboard_core::Error::NotFound(format!(
            "operation not found: {operation_id}"
        )))),
    }
}

/// POST /api/v1/results/{operation_id}/sync — explicit single-operation sync.
#[tracing::instrument(level = "info", skip_all)]
async fn sync_one(
    UserIdHeader(user_id): UserIdHeader,
    Extension(state): Extension<Arc<AppState>>,
    Path(operation_id): Path<String>,
) -> Result<Json<ResultRecord>, ApiError> {
    match state.sync.sync_one(user_id, &operation_id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::Core(optiboard_core::Error::NotFound(format!(
            "operation not found: {operation_id}"
        )))),
    }
}

/// POST /api/v1/results/sync — batch sync; one bad id never aborts the rest.
#[tracing::instrument(level = "info", skip_all)]
async fn sync_many(
    UserIdHeader(user_id): UserIdHeader,
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<SyncManyRequest>,
) -> Result<Json<SyncReport>, ApiError> {
    let report = state.sync.sync_many(user_id, &req.operation_ids).await?;
    Ok(Json(report))
}
