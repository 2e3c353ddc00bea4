//! Error types for the indexer API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors returned by indexer endpoints.
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    /// A query parameter could not be parsed.
    #[error("invalid {param}: {reason}")]
    InvalidQuery {
        /// Query parameter name.
        param: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
    /// No listing has the requested name.
    #[error("Service not found")]
    ServiceNotFound,
    /// The cheapest-match lookup found no candidate.
    #[error("No matching services found")]
    NoMatch,
}

impl IndexerError {
    /// The HTTP status this error renders as.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidQuery { .. } => StatusCode::BAD_REQUEST,
            Self::ServiceNotFound | Self::NoMatch => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for IndexerError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (self.status(), axum::Json(body)).into_response()
    }
}
