//! API route definitions

use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::server::{PoolState, RelayState};

/// Pool service routes
pub fn pool_router(state: PoolState) -> Router {
    Router::new()
        .route("/proxies", get(handlers::pool::list_proxies))
        .route("/random-proxies", get(handlers::pool::random_proxies))
        .route(
            "/random-self-managed-proxies",
            get(handlers::pool::random_self_managed_proxies),
        )
        .route("/health", get(handlers::pool::health))
        .route("/stats", get(handlers::pool::stats))
        .route("/metrics", get(handlers::pool::metrics))
        .with_state(state)
}

/// Relay service routes
pub fn relay_router(state: RelayState) -> Router {
    Router::new()
        .route("/scrape", post(handlers::relay::scrape))
        .route("/health", get(handlers::relay::health))
        .with_state(state)
}
