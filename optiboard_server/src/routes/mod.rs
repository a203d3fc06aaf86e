use axum::routing::get;
use axum::Router;

pub mod health;
pub mod keys;
pub mod results;

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health::get_health))
        .nest(
            "/api/v1",
            Router::new()
                .merge(results::router())
                .merge(keys::router()),
        )
}
