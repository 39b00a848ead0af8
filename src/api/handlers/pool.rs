//! Pool service handlers
//!
//! Lists are served as newline-separated canonical URIs.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::api::server::PoolState;
use crate::error::RelayPoolError;
use crate::models::ProxyEndpoint;

/// Query parameters for the random sampling endpoints
#[derive(Debug, Deserialize, Default)]
pub struct SampleQuery {
    /// Kept as text so a malformed value falls back to 1 instead of a 400
    pub count: Option<String>,
    pub prefix: Option<String>,
}

impl SampleQuery {
    fn count(&self) -> usize {
        self.count
            .as_deref()
            .and_then(|c| c.trim().parse::<i64>().ok())
            .map(|c| c.max(1) as usize)
            .unwrap_or(1)
    }

    fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref().filter(|p| !p.is_empty())
    }
}

fn join_lines(endpoints: &[ProxyEndpoint]) -> String {
    endpoints
        .iter()
        .map(ProxyEndpoint::as_str)
        .collect::<Vec<_>>()
        .join("\n")
}

/// All pool entries
pub async fn list_proxies(State(state): State<PoolState>) -> impl IntoResponse {
    join_lines(&state.pool.list_all())
}

/// Random sample over the whole pool
pub async fn random_proxies(
    State(state): State<PoolState>,
    Query(query): Query<SampleQuery>,
) -> impl IntoResponse {
    join_lines(&state.pool.random(query.count(), query.prefix()))
}

/// Random sample over the self-managed set
pub async fn random_self_managed_proxies(
    State(state): State<PoolState>,
    Query(query): Query<SampleQuery>,
) -> impl IntoResponse {
    join_lines(&state.pool.random_self_managed(query.count(), query.prefix()))
}

/// Healthy only above the minimum pool size
pub async fn health(State(state): State<PoolState>) -> impl IntoResponse {
    if state.pool.is_healthy() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "NEP")
    }
}

pub async fn stats(State(state): State<PoolState>) -> impl IntoResponse {
    Json(state.pool.stats())
}

/// Prometheus text exposition
pub async fn metrics(
    State(state): State<PoolState>,
) -> Result<impl IntoResponse, RelayPoolError> {
    let body = state.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, state.metrics.content_type())], body))
}
