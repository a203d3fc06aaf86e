use crate::routes;
use axum::{Extension, Router};
use optiboard_core::store::traits::DashboardDb;
use optiboard_core::{
    CredentialVault, DashboardConfig, HttpRemoteClient, SqliteDashboardDb, SyncEngine,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DashboardDb>,
    pub vault: Arc<CredentialVault>,
    pub sync: Arc<SyncEngine>,
    pub started_at: Instant,
}

/// Wire up the store, vault, remote client, and sync engine from config.
///
/// A missing master secret fails here, at startup, not on the first request.
pub async fn build_state(cfg: &DashboardConfig) -> optiboard_core::Result<AppState> {
    let db: Arc<dyn DashboardDb> = Arc::new(SqliteDashboardDb::new(&cfg.db_path).await?);
    let vault = Arc::new(CredentialVault::new(db.clone(), &cfg.master_secret)?);
    let remote = Arc::new(HttpRemoteClient::new(&cfg.remote)?);
    let sync = Arc::new(SyncEngine::new(db.clone(), vault.clone(), remote));

    Ok(AppState {
        db,
        vault,
        sync,
        started_at: Instant::now(),
    })
}

pub fn router(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .merge(routes::router())
        .layer(Extension(state))
        .layer(SetRequestIdLayer::new(
            axum::http::HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "optiboard api listening");
    axum::serve(listener, app).await?;
    Ok(())
}
