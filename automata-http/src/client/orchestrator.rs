//! Pay a provider on-chain, then call its API.

use std::sync::Arc;
use std::time::Duration;

use automata::discovery::DiscoverySource;
use automata::error::{CallError, ProviderCallFailure};
use automata::ledger::{
    DEFAULT_SUBMIT_TIMEOUT, DEFAULT_TIMEOUT, EntryFunctionCall, LedgerError, LedgerWriter,
};
use automata::listing::ServiceListing;
use automata::module::ModuleId;
use automata::plugin::{CallMethod, CallRequest, PaidContext, PayContext, Plugin, PluginChain};
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method};
use reqwest_middleware as rqm;
use serde_json::Value;
#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::constants::{MAX_ERROR_BODY, PAYMENT_TX_HEADER, SENDER_HEADER};

/// A successful provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body; a JSON string value when the body was not JSON.
    pub body: Value,
    /// The payment that bought this call.
    pub payment_tx: String,
    /// The listing that was paid and called.
    pub service: ServiceListing,
}

/// Runs paid calls: resolve, pay, then call.
///
/// Each call walks a fixed sequence:
///
/// 1. `before_call` hooks may rewrite the request or abort.
/// 2. The API is resolved to a listing through the discovery source.
/// 3. `before_pay` hooks may abort. Nothing has been spent yet.
/// 4. The payment is submitted and awaited, then `after_pay` hooks run.
/// 5. The provider endpoint is called with the payment transaction attached.
///
/// Step 4 runs on its own task: once submission starts, dropping the call
/// future does not stop the payment from being awaited, logged and reported
/// to `after_pay` hooks.
pub struct PaymentOrchestrator<W, D> {
    writer: Arc<W>,
    discovery: D,
    module: ModuleId,
    plugins: PluginChain,
    http: rqm::ClientWithMiddleware,
    call_timeout: Duration,
    payment_timeout: Duration,
}

impl<W, D: std::fmt::Debug> std::fmt::Debug for PaymentOrchestrator<W, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentOrchestrator")
            .field("discovery", &self.discovery)
            .field("module", &self.module)
            .field("plugins", &self.plugins)
            .field("call_timeout", &self.call_timeout)
            .field("payment_timeout", &self.payment_timeout)
            .finish_non_exhaustive()
    }
}

impl<W, D> PaymentOrchestrator<W, D>
where
    W: LedgerWriter + 'static,
    D: DiscoverySource,
{
    /// Pays with `writer` for services resolved through `discovery`.
    ///
    /// Provider calls are bounded by [`DEFAULT_TIMEOUT`] and payment
    /// submission by [`DEFAULT_SUBMIT_TIMEOUT`].
    pub fn new(writer: W, discovery: D, module: ModuleId) -> Self {
        Self {
            writer: Arc::new(writer),
            discovery,
            module,
            plugins: PluginChain::new(),
            http: rqm::ClientBuilder::new(reqwest::Client::new()).build(),
            call_timeout: DEFAULT_TIMEOUT,
            payment_timeout: DEFAULT_SUBMIT_TIMEOUT,
        }
    }

    /// Appends a plugin to the chain.
    #[must_use]
    pub fn with_plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Appends a plugin shared with other owners.
    #[must_use]
    pub fn with_shared_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push_shared(plugin);
        self
    }

    /// Uses `http` for provider calls, e.g. one with retry middleware.
    #[must_use]
    pub fn with_http_client(mut self, http: rqm::ClientWithMiddleware) -> Self {
        self.http = http;
        self
    }

    /// Bounds each provider call by `timeout`.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Bounds payment submission by `timeout`.
    ///
    /// On expiry the call fails with [`LedgerError::Timeout`] and the payment
    /// may still commit.
    #[must_use]
    pub const fn with_payment_timeout(mut self, timeout: Duration) -> Self {
        self.payment_timeout = timeout;
        self
    }

    /// The provider call bound.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// The payment submission bound.
    #[must_use]
    pub const fn payment_timeout(&self) -> Duration {
        self.payment_timeout
    }

    /// The paying account.
    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// The registered plugins.
    pub const fn plugins(&self) -> &PluginChain {
        &self.plugins
    }

    /// The protocol module payments are made through.
    pub const fn module(&self) -> &ModuleId {
        &self.module
    }

    /// `POST`s `body` to `path` on service `api`, paying for it first.
    ///
    /// # Errors
    ///
    /// See [`PaymentOrchestrator::execute`].
    pub async fn call(
        &self,
        api: &str,
        path: &str,
        body: Value,
    ) -> Result<ProviderResponse, CallError> {
        self.execute(CallRequest::new(api, path, body)).await
    }

    /// Runs a paid call.
    ///
    /// # Errors
    ///
    /// Errors raised before payment ([`CallError::PluginAborted`],
    /// [`CallError::ServiceNotFound`], [`CallError::Discovery`]) spent nothing.
    /// [`CallError::PostPaymentAborted`] and [`CallError::ProviderCallFailed`]
    /// carry the committed payment transaction.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "automata.call", skip_all, fields(api = %request.api), err)
    )]
    pub async fn execute(&self, mut request: CallRequest) -> Result<ProviderResponse, CallError> {
        self.plugins.before_call(&mut request).await?;

        let service = self.resolve(&mut request).await?;
        let ctx = PayContext {
            api: service.name.clone(),
            provider: service.provider.clone(),
            amount: service.base_price,
            wallet_owner: request
                .wallet_owner
                .take()
                .unwrap_or_else(|| self.writer.sender().to_owned()),
        };
        let payment_tx = self.settle(ctx).await?;

        match self.send(&service, &request, &payment_tx).await {
            Ok((status, body)) => Ok(ProviderResponse {
                status,
                body,
                payment_tx,
                service,
            }),
            Err(failure) => {
                tracing::warn!(api = %service.name, %payment_tx, %failure, "Provider call failed after payment");
                Err(CallError::ProviderCallFailed {
                    payment_tx,
                    failure,
                })
            }
        }
    }

    /// Pays `amount` to `provider` through the plugin chain without calling a service.
    ///
    /// The `before_pay` context carries an empty `api`. Charges the
    /// writer's own wallet unless `wallet_owner` is given.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::PluginAborted`], [`CallError::Payment`] or
    /// [`CallError::PostPaymentAborted`].
    pub async fn pay(
        &self,
        provider: &str,
        amount: u64,
        wallet_owner: Option<&str>,
    ) -> Result<String, CallError> {
        let ctx = PayContext {
            api: String::new(),
            provider: provider.to_owned(),
            amount,
            wallet_owner: wallet_owner.unwrap_or_else(|| self.writer.sender()).to_owned(),
        };
        self.settle(ctx).await
    }

    /// Opens a usage wallet for the writer's account funded with `deposit`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the transaction is not committed.
    pub async fn create_wallet(&self, deposit: u64) -> Result<String, LedgerError> {
        let tx_id = self
            .submit(EntryFunctionCall::create_wallet(&self.module, deposit))
            .await?;
        tracing::info!(%tx_id, deposit, "Usage wallet created");
        Ok(tx_id)
    }

    /// Lets `spender` pay from the writer's wallet up to `max_daily` per day.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the transaction is not committed.
    pub async fn authorize_spender(
        &self,
        spender: &str,
        max_daily: u64,
    ) -> Result<String, LedgerError> {
        let tx_id = self
            .submit(EntryFunctionCall::authorize_spender(
                &self.module,
                spender,
                max_daily,
            ))
            .await?;
        tracing::info!(%tx_id, spender, max_daily, "Spender authorized");
        Ok(tx_id)
    }

    /// Lists a service named `name` at `base_price`, served from `metadata_url`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the transaction is not committed.
    pub async fn publish_service(
        &self,
        name: &str,
        base_price: u64,
        metadata_url: &str,
    ) -> Result<String, LedgerError> {
        let tx_id = self
            .submit(EntryFunctionCall::publish_service(
                &self.module,
                name,
                base_price,
                metadata_url,
            ))
            .await?;
        tracing::info!(%tx_id, name, base_price, metadata_url, "Service published");
        Ok(tx_id)
    }

    /// Registers the writer's account as an agent.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the transaction is not committed.
    pub async fn register_agent(&self, name: &str, url: &str) -> Result<String, LedgerError> {
        let tx_id = self
            .submit(EntryFunctionCall::register_agent(&self.module, name, url))
            .await?;
        tracing::info!(%tx_id, name, url, "Agent registered");
        Ok(tx_id)
    }

    /// Creates the writer's reputation record.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the transaction is not committed.
    pub async fn initialize_reputation(&self) -> Result<String, LedgerError> {
        let tx_id = self
            .submit(EntryFunctionCall::initialize_reputation(&self.module))
            .await?;
        tracing::info!(%tx_id, "Reputation initialized");
        Ok(tx_id)
    }

    async fn submit(&self, call: EntryFunctionCall) -> Result<String, LedgerError> {
        submit_bounded(self.writer.as_ref(), call, self.payment_timeout).await
    }

    async fn resolve(&self, request: &mut CallRequest) -> Result<ServiceListing, CallError> {
        if let Some(listing) = request.selected.take()
            && listing.is_named(&request.api)
        {
            return Ok(listing);
        }
        self.discovery
            .find(&request.api)
            .await?
            .ok_or_else(|| CallError::ServiceNotFound(request.api.clone()))
    }

    /// Runs `before_pay`, then pays and runs `after_pay` on a detached task.
    async fn settle(&self, ctx: PayContext) -> Result<String, CallError> {
        self.plugins.before_pay(&ctx).await?;

        let writer = Arc::clone(&self.writer);
        let plugins = self.plugins.clone();
        let call = EntryFunctionCall::pay(&self.module, &ctx.wallet_owner, &ctx.provider, ctx.amount);
        let timeout = self.payment_timeout;
        let task = tokio::spawn(async move {
            let tx_id = submit_bounded(writer.as_ref(), call, timeout)
                .await
                .map_err(CallError::Payment)?;
            tracing::info!(
                %tx_id,
                api = %ctx.api,
                provider = %ctx.provider,
                amount = ctx.amount,
                wallet_owner = %ctx.wallet_owner,
                "Payment committed"
            );
            let paid = PaidContext {
                payment: ctx,
                tx_id,
            };
            match plugins.after_pay(&paid).await {
                Ok(()) => Ok(paid.tx_id),
                Err(abort) => Err(CallError::PostPaymentAborted {
                    payment_tx: paid.tx_id,
                    abort,
                }),
            }
        });
        task.await.map_err(|e| {
            CallError::Payment(LedgerError::Unavailable(format!("payment task failed: {e}")))
        })?
    }

    async fn send(
        &self,
        service: &ServiceListing,
        request: &CallRequest,
        payment_tx: &str,
    ) -> Result<(u16, Value), ProviderCallFailure> {
        let url = service.endpoint(&request.path);
        let tx_header = HeaderValue::from_str(payment_tx)
            .map_err(|e| ProviderCallFailure::Transport(format!("invalid payment header: {e}")))?;
        let sender_header = HeaderValue::from_str(self.writer.sender())
            .map_err(|e| ProviderCallFailure::Transport(format!("invalid sender header: {e}")))?;

        let mut req = self
            .http
            .request(http_method(request.method), url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(PAYMENT_TX_HEADER, tx_header)
            .header(SENDER_HEADER, sender_header);
        if request.method.has_body() {
            req = req.body(request.body.to_string());
        }
        let response = req
            .timeout(self.call_timeout)
            .send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderCallFailure::Timeout
            } else {
                ProviderCallFailure::Transport(e.to_string())
            }
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ProviderCallFailure::Timeout
            } else {
                ProviderCallFailure::Transport(e.to_string())
            }
        })?;

        if !status.is_success() {
            return Err(ProviderCallFailure::Status {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY).collect(),
            });
        }
        tracing::debug!(api = %service.name, status = status.as_u16(), "Provider call succeeded");
        Ok((status.as_u16(), decode_body(text)))
    }
}

async fn submit_bounded<W: LedgerWriter + ?Sized>(
    writer: &W,
    call: EntryFunctionCall,
    timeout: Duration,
) -> Result<String, LedgerError> {
    tokio::time::timeout(timeout, writer.submit_and_wait(call))
        .await
        .map_err(|_| LedgerError::Timeout)?
}

const fn http_method(method: CallMethod) -> Method {
    match method {
        CallMethod::Get => Method::GET,
        CallMethod::Post => Method::POST,
        CallMethod::Put => Method::PUT,
        CallMethod::Patch => Method::PATCH,
        CallMethod::Delete => Method::DELETE,
    }
}

fn decode_body(text: String) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use automata::discovery::DiscoveryCache;
    use automata::error::PluginAbort;
    use automata::ledger::LedgerReader;
    use automata::plugin::{Capabilities, HookFuture};
    use automata::plugins::BudgetPlugin;
    use automata::testing::MemoryLedger;
    use serde_json::json;
    use tokio::sync::Notify;
    use wiremock::matchers::{body_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    type Orchestrator = PaymentOrchestrator<MemoryLedger, DiscoveryCache<MemoryLedger>>;

    fn module() -> ModuleId {
        "0x1::automata".parse().unwrap()
    }

    async fn setup(server: &MockServer) -> (MemoryLedger, Orchestrator) {
        setup_at(&server.uri()).await
    }

    async fn setup_at(provider_url: &str) -> (MemoryLedger, Orchestrator) {
        let ledger = MemoryLedger::new();
        ledger.insert_resource(
            "0x1",
            &module().registry_resource(),
            json!({"services": [
                {"provider": "0xp", "name": "gpt", "base_price": "5", "metadata_url": provider_url}
            ]}),
        );
        let cache = DiscoveryCache::new(ledger.clone(), module());
        cache.sync().await.unwrap();
        let orchestrator = PaymentOrchestrator::new(ledger.clone(), cache, module());
        (ledger, orchestrator)
    }

    struct FailAfterPay;

    impl Plugin for FailAfterPay {
        fn name(&self) -> &str {
            "audit"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                after_pay: true,
                ..Capabilities::default()
            }
        }

        fn after_pay<'a>(&'a self, _ctx: &'a PaidContext) -> HookFuture<'a> {
            Box::pin(async { Err(PluginAbort::new("audit", "log sink down")) })
        }
    }

    struct Gated {
        release: Arc<Notify>,
        finished: Arc<Notify>,
    }

    impl Plugin for Gated {
        fn name(&self) -> &str {
            "gated"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                after_pay: true,
                ..Capabilities::default()
            }
        }

        fn after_pay<'a>(&'a self, _ctx: &'a PaidContext) -> HookFuture<'a> {
            Box::pin(async move {
                self.release.notified().await;
                self.finished.notify_one();
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_pays_then_calls_with_payment_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .and(header_exists(PAYMENT_TX_HEADER))
            .and(header(SENDER_HEADER, "0xc0ffee"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"prompt": "hi"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": 42})))
            .expect(1)
            .mount(&server)
            .await;
        let (ledger, orchestrator) = setup(&server).await;

        let response = orchestrator
            .call("gpt", "/v1/chat", json!({"prompt": "hi"}))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, json!({"answer": 42}));
        assert_eq!(response.service.provider, "0xp");

        assert_eq!(
            ledger.submissions(),
            vec![EntryFunctionCall::pay(&module(), "0xc0ffee", "0xp", 5)]
        );
        let received = server.received_requests().await.unwrap();
        assert_eq!(
            received[0].headers.get(PAYMENT_TX_HEADER).unwrap(),
            response.payment_tx.as_str()
        );
    }

    #[tokio::test]
    async fn test_explicit_wallet_owner_and_get_method() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;
        let (ledger, orchestrator) = setup(&server).await;

        let request = CallRequest::new("GPT", "status", Value::Null)
            .with_method(CallMethod::Get)
            .with_wallet_owner("0xowner");
        let response = orchestrator.execute(request).await.unwrap();
        assert_eq!(response.body, Value::String("ok".into()));
        assert_eq!(ledger.submissions()[0].arguments[0], Value::from("0xowner"));
    }

    #[tokio::test]
    async fn test_unknown_service_pays_nothing() {
        let server = MockServer::start().await;
        let (ledger, orchestrator) = setup(&server).await;

        let err = orchestrator.call("nope", "/", Value::Null).await.unwrap_err();
        assert!(matches!(err, CallError::ServiceNotFound(ref api) if api == "nope"));
        assert!(ledger.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_before_pay_abort_pays_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let (ledger, orchestrator) = setup(&server).await;
        let orchestrator = orchestrator.with_plugin(BudgetPlugin::new(1));

        let err = orchestrator.call("gpt", "/", Value::Null).await.unwrap_err();
        let abort = match err {
            CallError::PluginAborted(abort) => abort,
            other => panic!("expected plugin abort, got {other:?}"),
        };
        assert_eq!(abort.plugin, "budget");
        assert!(ledger.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_payment_skips_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let (ledger, orchestrator) = setup(&server).await;
        ledger.set_reject_submissions(true);

        let err = orchestrator.call("gpt", "/", Value::Null).await.unwrap_err();
        assert!(matches!(err, CallError::Payment(LedgerError::Rejected(_))));
        assert!(!err.funds_spent());
    }

    #[tokio::test]
    async fn test_after_pay_failure_stops_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let (ledger, orchestrator) = setup(&server).await;
        let orchestrator = orchestrator.with_plugin(FailAfterPay);

        let err = orchestrator.call("gpt", "/", Value::Null).await.unwrap_err();
        assert!(matches!(err, CallError::PostPaymentAborted { .. }));
        assert!(err.funds_spent());
        assert_eq!(ledger.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_error_reports_payment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(4096)))
            .mount(&server)
            .await;
        let (ledger, orchestrator) = setup(&server).await;

        let err = orchestrator.call("gpt", "/", Value::Null).await.unwrap_err();
        let (payment_tx, status, body) = match err {
            CallError::ProviderCallFailed {
                payment_tx,
                failure: ProviderCallFailure::Status { status, body },
            } => (payment_tx, status, body),
            other => panic!("expected provider failure, got {other:?}"),
        };
        assert_eq!(status, 500);
        assert_eq!(body.len(), MAX_ERROR_BODY);
        assert_eq!(ledger.submissions().len(), 1);
        assert!(ledger.get_transaction(&payment_tx).await.is_ok());
    }

    #[tokio::test]
    async fn test_direct_pay_and_wallet_management() {
        let server = MockServer::start().await;
        let (ledger, orchestrator) = setup(&server).await;

        orchestrator.create_wallet(100).await.unwrap();
        orchestrator.authorize_spender("0xagent", 10).await.unwrap();
        orchestrator.pay("0xp", 3, Some("0xowner")).await.unwrap();

        let submitted = ledger.submissions();
        assert_eq!(submitted[0], EntryFunctionCall::create_wallet(&module(), 100));
        assert_eq!(
            submitted[1],
            EntryFunctionCall::authorize_spender(&module(), "0xagent", 10)
        );
        assert_eq!(
            submitted[2],
            EntryFunctionCall::pay(&module(), "0xowner", "0xp", 3)
        );
    }

    #[tokio::test]
    async fn test_publication_and_identity() {
        let server = MockServer::start().await;
        let (ledger, orchestrator) = setup(&server).await;

        orchestrator
            .publish_service("dalle", 7, "https://dalle.example.com")
            .await
            .unwrap();
        orchestrator
            .register_agent("scout", "https://scout.ai")
            .await
            .unwrap();
        orchestrator.initialize_reputation().await.unwrap();

        assert_eq!(
            ledger.submissions(),
            vec![
                EntryFunctionCall::publish_service(&module(), "dalle", 7, "https://dalle.example.com"),
                EntryFunctionCall::register_agent(&module(), "scout", "https://scout.ai"),
                EntryFunctionCall::initialize_reputation(&module()),
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_publication_is_reported() {
        let server = MockServer::start().await;
        let (ledger, orchestrator) = setup(&server).await;
        ledger.set_unavailable(true);

        let err = orchestrator.register_agent("scout", "").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_provider_times_out_by_default() {
        // Accepts connections into the backlog and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let provider_url = format!("http://{}", listener.local_addr().unwrap());
        let (ledger, orchestrator) = setup_at(&provider_url).await;
        assert_eq!(orchestrator.call_timeout(), DEFAULT_TIMEOUT);
        assert_eq!(orchestrator.payment_timeout(), DEFAULT_SUBMIT_TIMEOUT);

        let err = orchestrator.call("gpt", "/", Value::Null).await.unwrap_err();
        match err {
            CallError::ProviderCallFailed { payment_tx, failure } => {
                assert_eq!(failure, ProviderCallFailure::Timeout);
                assert!(ledger.get_transaction(&payment_tx).await.is_ok());
            }
            other => panic!("unexpected error: {other}"),
        }
        drop(listener);
    }

    #[tokio::test]
    async fn test_payment_completes_when_caller_is_cancelled() {
        let server = MockServer::start().await;
        let (ledger, orchestrator) = setup(&server).await;
        let release = Arc::new(Notify::new());
        let finished = Arc::new(Notify::new());
        let orchestrator = orchestrator.with_plugin(Gated {
            release: Arc::clone(&release),
            finished: Arc::clone(&finished),
        });

        let call = tokio::spawn(async move { orchestrator.call("gpt", "/", Value::Null).await });
        while ledger.submissions().is_empty() {
            tokio::task::yield_now().await;
        }
        call.abort();
        release.notify_one();

        tokio::time::timeout(Duration::from_secs(5), finished.notified())
            .await
            .expect("after_pay ran to completion");
        assert_eq!(ledger.submissions().len(), 1);
    }
}
