//! A [`LedgerReader`] that reads an Aptos fullnode's REST API.
//!
//! Two endpoints are used:
//!
//! - `GET /accounts/{address}/resource/{type}` for registry, reputation and
//!   wallet resources
//! - `GET /transactions/by_hash/{hash}` for payment verification
//!
//! ## Error Handling
//!
//! [`AptosClientError`] keeps the failing endpoint as context. Its conversion
//! into [`LedgerError`] classifies failures:
//!
//! - `404` and `400` mean the object does not exist
//! - other statuses and transport failures mean the node is unavailable
//! - a request timeout maps to [`LedgerError::Timeout`]
//! - an unreadable body maps to [`LedgerError::Malformed`]

use std::time::Duration;

use automata::ledger::{
    DEFAULT_TIMEOUT, LedgerError, LedgerReader, TransactionKind, TransactionRecord,
};
use automata::timestamp::LedgerTimestamp;
use http::StatusCode;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_with::{DisplayFromStr, PickFirst, serde_as};
#[cfg(feature = "telemetry")]
use tracing::instrument;
use url::Url;

use crate::networks::AptosNetwork;

/// Errors that can occur while talking to an Aptos fullnode.
#[derive(Debug, thiserror::Error)]
pub enum AptosClientError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// JSON deserialization error.
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Unexpected HTTP status code.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// Failed to read response body.
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
}

impl From<AptosClientError> for LedgerError {
    fn from(err: AptosClientError) -> Self {
        match &err {
            AptosClientError::HttpStatus {
                status: StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST,
                ..
            } => Self::NotFound(err.to_string()),
            AptosClientError::Http { source, .. } if source.is_timeout() => Self::Timeout,
            AptosClientError::JsonDeserialization { .. } | AptosClientError::UrlParse { .. } => {
                Self::Malformed(err.to_string())
            }
            AptosClientError::Http { .. }
            | AptosClientError::HttpStatus { .. }
            | AptosClientError::ResponseBodyRead { .. } => Self::Unavailable(err.to_string()),
        }
    }
}

/// Aptos address normalization.
///
/// On top of [`automata::ledger::normalize_address`], leading zeros of a
/// hex address are stripped, so the short and long forms of special
/// addresses compare equal.
///
/// ```rust
/// use automata_aptos::client::normalize_address;
///
/// assert_eq!(normalize_address("0x0000000000000000000000000000000000000000000000000000000000000001"), "0x1");
/// assert_eq!(normalize_address("00A"), "0xa");
/// assert_eq!(normalize_address("0x000"), "0x0");
/// ```
#[must_use]
pub fn normalize_address(address: &str) -> String {
    let canonical = automata::ledger::normalize_address(address);
    let body = canonical.strip_prefix("0x").unwrap_or(&canonical);
    if body.is_empty() || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return canonical;
    }
    match body.trim_start_matches('0') {
        "" => "0x0".to_owned(),
        trimmed => format!("0x{trimmed}"),
    }
}

#[derive(Debug, Deserialize)]
struct ResourceResponse {
    data: Value,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    function: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct TransactionResponse {
    #[serde(rename = "type")]
    kind: String,
    hash: String,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    payload: Option<Payload>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    timestamp: Option<u64>,
}

impl From<TransactionResponse> for TransactionRecord {
    fn from(tx: TransactionResponse) -> Self {
        let kind = match tx.kind.as_str() {
            "user_transaction" => TransactionKind::User,
            "pending_transaction" => TransactionKind::Pending,
            _ => TransactionKind::Other(tx.kind),
        };
        let payload = tx.payload.unwrap_or_default();
        Self {
            hash: tx.hash,
            kind,
            success: tx.success,
            sender: tx.sender,
            function: payload.function,
            arguments: payload.arguments,
            timestamp: LedgerTimestamp::from_micros(tx.timestamp.unwrap_or_default()),
        }
    }
}

/// REST client for an Aptos fullnode.
#[derive(Debug, Clone)]
pub struct AptosClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl AptosClient {
    /// Constructs a client for the fullnode API rooted at `base_url`
    /// (for example `https://fullnode.testnet.aptoslabs.com/v1/`).
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            client: Client::new(),
            base_url,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// A client for `network`'s public fullnode.
    ///
    /// # Errors
    ///
    /// Never fails in practice; known fullnode URLs are valid.
    pub fn for_network(network: AptosNetwork) -> Result<Self, AptosClientError> {
        Self::try_from(network.fullnode_url())
    }

    /// Bounds every request by `timeout` instead of [`DEFAULT_TIMEOUT`].
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Uses `client` for all requests.
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// The fullnode API root.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Fetches the `data` of `resource_type` stored under `address`.
    ///
    /// # Errors
    ///
    /// Returns [`AptosClientError`] on transport, status or decoding failure.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "automata.aptos.resource", skip(self), err)
    )]
    pub async fn account_resource(
        &self,
        address: &str,
        resource_type: &str,
    ) -> Result<Value, AptosClientError> {
        let url = self.endpoint(&["accounts", address, "resource", resource_type]);
        let resource: ResourceResponse = self
            .get_json(url, "GET /accounts/{address}/resource/{type}")
            .await?;
        Ok(resource.data)
    }

    /// Fetches a transaction by hash.
    ///
    /// # Errors
    ///
    /// Returns [`AptosClientError`] on transport, status or decoding failure.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "automata.aptos.transaction", skip(self), err)
    )]
    pub async fn transaction_by_hash(
        &self,
        hash: &str,
    ) -> Result<TransactionRecord, AptosClientError> {
        let url = self.endpoint(&["transactions", "by_hash", hash]);
        let tx: TransactionResponse = self
            .get_json(url, "GET /transactions/by_hash/{hash}")
            .await?;
        Ok(tx.into())
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<R>(&self, url: Url, context: &'static str) -> Result<R, AptosClientError>
    where
        R: DeserializeOwned,
    {
        let http_response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AptosClientError::Http { context, source: e })?;

        if http_response.status() == StatusCode::OK {
            http_response
                .json::<R>()
                .await
                .map_err(|e| AptosClientError::JsonDeserialization { context, source: e })
        } else {
            let status = http_response.status();
            let body = http_response
                .text()
                .await
                .map_err(|e| AptosClientError::ResponseBodyRead { context, source: e })?;
            Err(AptosClientError::HttpStatus {
                context,
                status,
                body,
            })
        }
    }
}

/// Converts a string URL into an [`AptosClient`].
impl TryFrom<&str> for AptosClient {
    type Error = AptosClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| AptosClientError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        Ok(Self::new(url))
    }
}

impl TryFrom<String> for AptosClient {
    type Error = AptosClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

#[async_trait::async_trait]
impl LedgerReader for AptosClient {
    async fn get_account_resource(
        &self,
        address: &str,
        resource_type: &str,
    ) -> Result<Value, LedgerError> {
        Ok(self.account_resource(address, resource_type).await?)
    }

    async fn get_transaction(&self, tx_id: &str) -> Result<TransactionRecord, LedgerError> {
        Ok(self.transaction_by_hash(tx_id).await?)
    }

    fn normalize_address(&self, address: &str) -> String {
        normalize_address(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> AptosClient {
        AptosClient::try_from(format!("{}/v1", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_resource_returns_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(
                "/v1/accounts/0x1/resource/0x1::automata::market::GlobalRegistry",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "0x1::automata::market::GlobalRegistry",
                "data": {"services": []}
            })))
            .mount(&server)
            .await;

        let data = client(&server)
            .get_account_resource("0x1", "0x1::automata::market::GlobalRegistry")
            .await
            .unwrap();
        assert_eq!(data, json!({"services": []}));
    }

    #[tokio::test]
    async fn test_user_transaction_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/transactions/by_hash/0xabc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "user_transaction",
                "hash": "0xabc",
                "success": true,
                "sender": "0x00c0ffee",
                "timestamp": "1700000000000000",
                "payload": {
                    "type": "entry_function_payload",
                    "function": "0x1::automata::usage_wallet::pay",
                    "type_arguments": [],
                    "arguments": ["0xw", "0xp", "5"]
                }
            })))
            .mount(&server)
            .await;

        let tx = client(&server).get_transaction("0xabc").await.unwrap();
        assert!(tx.is_successful_user_transaction());
        assert_eq!(tx.function.as_deref(), Some("0x1::automata::usage_wallet::pay"));
        assert_eq!(tx.arguments, vec![json!("0xw"), json!("0xp"), json!("5")]);
        assert_eq!(tx.timestamp.as_micros(), 1_700_000_000_000_000);
    }

    #[tokio::test]
    async fn test_pending_transaction_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/transactions/by_hash/0xpending"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "pending_transaction",
                "hash": "0xpending",
                "sender": "0x1",
                "payload": {"function": "0x1::automata::usage_wallet::pay", "arguments": []}
            })))
            .mount(&server)
            .await;

        let tx = client(&server)
            .get_transaction("0xpending")
            .await
            .unwrap();
        assert_eq!(tx.kind, TransactionKind::Pending);
        assert!(!tx.success);
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/transactions/by_hash/0xmissing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error_code": "transaction_not_found"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/transactions/by_hash/0xbusy"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/transactions/by_hash/0xgarbage"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(matches!(
            client.get_transaction("0xmissing").await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            client.get_transaction("0xbusy").await,
            Err(LedgerError::Unavailable(_))
        ));
        assert!(matches!(
            client.get_transaction("0xgarbage").await,
            Err(LedgerError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        assert_eq!(client(&server).timeout(), DEFAULT_TIMEOUT);
        let client = client(&server)
            .with_timeout(Duration::from_millis(50));
        assert!(matches!(
            client.get_transaction("0xslow").await,
            Err(LedgerError::Timeout)
        ));
    }

    #[test]
    fn test_normalize_strips_leading_zeros() {
        let client = AptosClient::try_from("http://localhost:8080/v1").unwrap();
        assert_eq!(client.normalize_address("0x00C0FFEE"), "0xc0ffee");
        assert_eq!(client.normalize_address("0x0"), "0x0");
        assert_eq!(client.normalize_address("not-hex"), "0xnot-hex");
    }
}
