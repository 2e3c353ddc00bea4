//! Request gate errors and their HTTP rendering.

use axum_core::response::{IntoResponse, Response};
use automata::verifier::VerifyError;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use serde_json::json;

/// Why the gate refused a request.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// No payment header was sent.
    #[error("payment required: {amount} to {receiver}")]
    PaymentRequired {
        /// Per-call cost of the route.
        amount: u64,
        /// Provider address payments must go to.
        receiver: String,
    },
    /// The payment header is empty or not valid text.
    #[error("malformed payment header")]
    MalformedHeader,
    /// The referenced transaction failed verification.
    #[error(transparent)]
    Verification(#[from] VerifyError),
}

impl GateError {
    /// HTTP status for this error.
    ///
    /// Transient ledger failures map to `503` so clients can retry with the
    /// same transaction; every other rejection is final.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::PaymentRequired { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::MalformedHeader => StatusCode::FORBIDDEN,
            Self::Verification(err) if err.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Verification(_) => StatusCode::FORBIDDEN,
        }
    }

    /// JSON body for this error.
    #[must_use]
    pub fn body(&self) -> serde_json::Value {
        match self {
            Self::PaymentRequired { amount, receiver } => json!({
                "error": "Payment Required",
                "detail": format!("Please pay {amount} to access this resource."),
                "paymentInfo": {
                    "amount": amount,
                    "receiver": receiver,
                },
            }),
            Self::Verification(err) if err.is_retryable() => json!({
                "error": "Payment Verification Unavailable",
                "detail": err.to_string(),
            }),
            Self::MalformedHeader | Self::Verification(_) => json!({
                "error": "Payment Invalid",
                "detail": self.to_string(),
            }),
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(CONTENT_TYPE, "application/json")],
            self.body().to_string(),
        )
            .into_response()
    }
}
