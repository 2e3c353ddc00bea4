//! The request gate.
//!
//! [`PaymentGate`] is a tower [`Layer`] that wraps a protected handler. For
//! each request it:
//!
//! 1. Answers `402 Payment Required` with the price and receiver when no
//!    payment header is present.
//! 2. Verifies the referenced transaction against the route's provider and cost.
//! 3. Answers `403` (or `503` when the ledger is unreachable) if verification fails.
//! 4. Otherwise stores the [`VerifiedPayment`] in the request extensions and
//!    calls the handler.
//!
//! The gate keeps no state between requests. Build one per route when routes
//! have different prices:
//!
//! ```rust,ignore
//! let gate = PaymentGate::new(verifier, "0xprovider", 5);
//! let app = Router::new()
//!     .route("/v1/chat", post(chat).layer(gate.clone()))
//!     .route("/v1/image", post(image).layer(gate.with_cost(20)));
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use automata::ledger::LedgerReader;
use automata::verifier::{PaymentVerifier, VerifiedPayment};
use axum_core::extract::Request;
use axum_core::response::{IntoResponse, Response};
use http::HeaderMap;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};
#[cfg(feature = "telemetry")]
use tracing::instrument;

use super::error::GateError;
use crate::constants::{LEGACY_PAYMENT_HEADER, PAYMENT_TX_HEADER};

/// Payment requirement for a protected route.
pub struct PaymentGate<L> {
    verifier: Arc<PaymentVerifier<L>>,
    provider: Arc<str>,
    cost: u64,
}

impl<L> Clone for PaymentGate<L> {
    fn clone(&self) -> Self {
        Self {
            verifier: Arc::clone(&self.verifier),
            provider: Arc::clone(&self.provider),
            cost: self.cost,
        }
    }
}

impl<L> std::fmt::Debug for PaymentGate<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentGate")
            .field("provider", &self.provider)
            .field("cost", &self.cost)
            .finish_non_exhaustive()
    }
}

impl<L> PaymentGate<L> {
    /// Requires a payment of at least `cost` to `provider` per request.
    pub fn new(verifier: Arc<PaymentVerifier<L>>, provider: impl Into<String>, cost: u64) -> Self {
        Self {
            verifier,
            provider: Arc::from(provider.into()),
            cost,
        }
    }

    /// Same gate with a different per-call cost.
    #[must_use]
    pub fn with_cost(&self, cost: u64) -> Self {
        Self {
            cost,
            ..self.clone()
        }
    }

    /// The provider address payments must go to.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// The per-call cost.
    #[must_use]
    pub const fn cost(&self) -> u64 {
        self.cost
    }

    fn payment_required(&self) -> GateError {
        GateError::PaymentRequired {
            amount: self.cost,
            receiver: self.provider.to_string(),
        }
    }
}

impl<L: LedgerReader> PaymentGate<L> {
    /// Checks the payment carried by `headers`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] if the payment is missing, malformed or invalid.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "automata.gate.authorize", skip_all, fields(cost = self.cost), err)
    )]
    pub async fn authorize(&self, headers: &HeaderMap) -> Result<VerifiedPayment, GateError> {
        let tx_id = payment_tx(headers)?.ok_or_else(|| self.payment_required())?;
        let verified = self.verifier.verify(tx_id, &self.provider, self.cost).await?;
        Ok(verified)
    }

    /// Runs `req` through the gate and, if admitted, through `inner`.
    ///
    /// # Errors
    ///
    /// This method is infallible (`Infallible` error type); rejections are
    /// rendered as responses.
    pub async fn handle_request<S>(&self, mut inner: S, mut req: Request) -> Result<Response, Infallible>
    where
        S: Service<Request, Response = Response, Error = Infallible>,
    {
        let authorized = self.authorize(req.headers()).await;
        match authorized {
            Ok(verified) => {
                req.extensions_mut().insert(verified);
                inner.call(req).await
            }
            Err(err) => {
                tracing::debug!(error = %err, path = %req.uri().path(), "Request rejected by payment gate");
                Ok(err.into_response())
            }
        }
    }
}

/// Reads the transaction id from the current or legacy payment header.
fn payment_tx(headers: &HeaderMap) -> Result<Option<&str>, GateError> {
    let value = headers
        .get(PAYMENT_TX_HEADER)
        .or_else(|| headers.get(LEGACY_PAYMENT_HEADER));
    let Some(value) = value else {
        return Ok(None);
    };
    let tx_id = value
        .to_str()
        .map_err(|_| GateError::MalformedHeader)?
        .trim();
    if tx_id.is_empty() {
        return Err(GateError::MalformedHeader);
    }
    Ok(Some(tx_id))
}

impl<S, L> Layer<S> for PaymentGate<L>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Service = PaymentGateService<L>;

    fn layer(&self, inner: S) -> Self::Service {
        PaymentGateService {
            gate: self.clone(),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// Service produced by [`PaymentGate`].
#[allow(missing_debug_implementations)] // BoxCloneSyncService does not implement Debug
pub struct PaymentGateService<L> {
    gate: PaymentGate<L>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<L> Clone for PaymentGateService<L> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<L> Service<Request> for PaymentGateService<L>
where
    L: LedgerReader + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let gate = self.gate.clone();
        let inner = self.inner.clone();
        Box::pin(async move { gate.handle_request(inner, req).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use automata::ledger::{EntryFunctionCall, LedgerWriter};
    use automata::module::ModuleId;
    use automata::testing::MemoryLedger;
    use automata::verifier::VerifierConfig;
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::extract::Extension;
    use axum::routing::post;
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn module() -> ModuleId {
        "0x1::automata".parse().unwrap()
    }

    fn app(ledger: MemoryLedger, hits: Arc<AtomicUsize>) -> Router {
        let verifier = Arc::new(PaymentVerifier::new(ledger, VerifierConfig::new(&module())));
        let gate = PaymentGate::new(verifier, "0xP", 5);
        Router::new().route(
            "/v1/chat",
            post(move |Extension(payment): Extension<VerifiedPayment>| {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    payment.tx_id
                }
            })
            .layer(gate),
        )
    }

    async fn pay(ledger: &MemoryLedger, provider: &str, amount: u64) -> String {
        ledger
            .submit_and_wait(EntryFunctionCall::pay(&module(), "0xw", provider, amount))
            .await
            .unwrap()
    }

    fn request(header: Option<(&str, &str)>) -> Request {
        let mut builder = http::Request::post("/v1/chat");
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_missing_header_is_payment_required() {
        let hits = Arc::new(AtomicUsize::new(0));
        let response = app(MemoryLedger::new(), Arc::clone(&hits))
            .oneshot(request(None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body = json_body(response).await;
        assert_eq!(body["paymentInfo"]["amount"], 5);
        assert_eq!(body["paymentInfo"]["receiver"], "0xP");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_valid_payment_reaches_handler() {
        let ledger = MemoryLedger::new();
        let tx = pay(&ledger, "0xp", 5).await;
        let hits = Arc::new(AtomicUsize::new(0));
        let response = app(ledger, Arc::clone(&hits))
            .oneshot(request(Some((PAYMENT_TX_HEADER, &tx))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes, tx.as_bytes());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_legacy_header_is_accepted() {
        let ledger = MemoryLedger::new();
        let tx = pay(&ledger, "0xP", 5).await;
        let hits = Arc::new(AtomicUsize::new(0));
        let response = app(ledger, Arc::clone(&hits))
            .oneshot(request(Some((LEGACY_PAYMENT_HEADER, &tx))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_underpayment_is_forbidden() {
        let ledger = MemoryLedger::new();
        let tx = pay(&ledger, "0xP", 4).await;
        let hits = Arc::new(AtomicUsize::new(0));
        let response = app(ledger, Arc::clone(&hits))
            .oneshot(request(Some((PAYMENT_TX_HEADER, &tx))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Payment Invalid");
        assert_eq!(body["detail"], "insufficient amount");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blank_header_is_forbidden() {
        let hits = Arc::new(AtomicUsize::new(0));
        let response = app(MemoryLedger::new(), hits)
            .oneshot(request(Some((PAYMENT_TX_HEADER, "  "))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_ledger_outage_is_service_unavailable() {
        let ledger = MemoryLedger::new();
        let tx = pay(&ledger, "0xP", 5).await;
        ledger.set_unavailable(true);
        let hits = Arc::new(AtomicUsize::new(0));
        let response = app(ledger, Arc::clone(&hits))
            .oneshot(request(Some((PAYMENT_TX_HEADER, &tx))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_with_cost_keeps_provider() {
        let verifier = Arc::new(PaymentVerifier::new(
            MemoryLedger::new(),
            VerifierConfig::new(&module()),
        ));
        let gate = PaymentGate::new(verifier, "0xP", 5).with_cost(20);
        assert_eq!(gate.cost(), 20);
        assert_eq!(gate.provider(), "0xP");
    }
}
