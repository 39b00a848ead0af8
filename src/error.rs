use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the pool and relay services
#[derive(Error, Debug)]
pub enum RelayPoolError {
    // Aggregation errors
    #[error("Source {url} unavailable: {reason}")]
    SourceFetch { url: String, reason: String },

    #[error("Validation budget of {budget_secs}s exhausted")]
    ValidationTimeout { budget_secs: u64 },

    #[error("Invalid proxy URI: {0}")]
    InvalidProxyUri(String),

    #[error("Unsupported proxy scheme: {0}")]
    UnsupportedScheme(String),

    // Bootstrap errors
    #[error("Bootstrap probe failed for {endpoint}: {reason}")]
    BootstrapProbe { endpoint: String, reason: String },

    #[error("No proxy candidates available")]
    NoCandidates,

    // Relay errors
    #[error("Relay transport error: {0}")]
    RelayTransport(String),

    #[error("Blocked by challenge (status {status})")]
    RelayChallenge { status: u16 },

    #[error("No scraper sessions available")]
    PoolExhausted,

    #[error("Relay error budget exhausted after {errors} consecutive failures")]
    ErrorBudgetExhausted { errors: u64 },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Operation timed out")]
    Timeout,

    // Metrics errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for relaypool operations
pub type Result<T> = std::result::Result<T, RelayPoolError>;

impl RelayPoolError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            RelayPoolError::InvalidRequest(_)
            | RelayPoolError::InvalidProxyUri(_)
            | RelayPoolError::UnsupportedScheme(_)
            | RelayPoolError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 502 Bad Gateway
            RelayPoolError::SourceFetch { .. }
            | RelayPoolError::BootstrapProbe { .. }
            | RelayPoolError::RelayChallenge { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            RelayPoolError::PoolExhausted | RelayPoolError::NoCandidates => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 504 Gateway Timeout
            RelayPoolError::Timeout | RelayPoolError::ValidationTimeout { .. } => {
                StatusCode::GATEWAY_TIMEOUT
            }

            // 500 Internal Server Error
            RelayPoolError::RelayTransport(_)
            | RelayPoolError::ErrorBudgetExhausted { .. }
            | RelayPoolError::Metrics(_)
            | RelayPoolError::Io(_)
            | RelayPoolError::Http(_)
            | RelayPoolError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for RelayPoolError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<reqwest::Error> for RelayPoolError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RelayPoolError::Timeout
        } else {
            RelayPoolError::Http(err.to_string())
        }
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for RelayPoolError {
    fn from(err: url::ParseError) -> Self {
        RelayPoolError::InvalidProxyUri(err.to_string())
    }
}
