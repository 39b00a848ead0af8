//! Relay service handlers

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::api::server::RelayState;
use crate::error::RelayPoolError;
use crate::relay::ScrapeRequest;

/// Body for fetch failures, kept terse for relay clients
const TRANSPORT_ERROR_BODY: &str = "Async err";

/// Relay the target URL given as the request body
pub async fn scrape(
    State(state): State<RelayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = ScrapeRequest {
        url: String::from_utf8_lossy(&body).into_owned(),
        headers,
    };

    match state.dispatcher.dispatch(request).await {
        Ok(response) => {
            let content_type = response
                .content_type
                .unwrap_or_else(|| "application/json".to_string());
            (
                response.status,
                [(header::CONTENT_TYPE, content_type)],
                response.body,
            )
                .into_response()
        }
        Err(RelayPoolError::RelayTransport(_)) | Err(RelayPoolError::ErrorBudgetExhausted { .. }) => {
            (StatusCode::INTERNAL_SERVER_ERROR, TRANSPORT_ERROR_BODY).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Healthy while at least one session is pooled
pub async fn health(State(state): State<RelayState>) -> impl IntoResponse {
    let pool = state.dispatcher.pool();
    if pool.is_empty() {
        (StatusCode::INTERNAL_SERVER_ERROR, "NEP".to_string())
    } else {
        (StatusCode::OK, format!("OK {}/{}", pool.len(), pool.target()))
    }
}
