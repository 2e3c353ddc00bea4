//! HTTP client for a remote discovery indexer.

use std::time::Duration;

use automata::discovery::{DiscoveryError, DiscoverySource, ServiceQuery};
use automata::ledger::DEFAULT_TIMEOUT;
use automata::listing::ServiceListing;
use http::StatusCode;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::constants::DEFAULT_INDEXER_URL;

/// Errors that can occur while talking to a discovery indexer.
#[derive(Debug, thiserror::Error)]
pub enum RemoteDiscoveryError {
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

impl From<RemoteDiscoveryError> for DiscoveryError {
    fn from(err: RemoteDiscoveryError) -> Self {
        match err {
            RemoteDiscoveryError::JsonDeserialization { .. } => {
                Self::InvalidResponse(err.to_string())
            }
            _ => Self::Unavailable(err.to_string()),
        }
    }
}

/// Body of `GET /services`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicesResponse {
    /// Number of listings returned.
    pub count: usize,
    /// Indexer's last successful sync, ms since the Unix epoch.
    pub last_sync: u64,
    /// Matching listings, best reputation first.
    pub services: Vec<ServiceListing>,
}

/// A [`DiscoverySource`] backed by an indexer's HTTP query API.
#[derive(Debug, Clone)]
pub struct RemoteDiscovery {
    client: Client,
    base_url: Url,
    services_url: Url,
    cheapest_url: Url,
    timeout: Duration,
}

impl RemoteDiscovery {
    /// Constructs a client for the indexer at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteDiscoveryError::UrlParse`] if endpoint URLs cannot be derived.
    pub fn try_new(base_url: Url) -> Result<Self, RemoteDiscoveryError> {
        let services_url =
            base_url
                .join("./services")
                .map_err(|e| RemoteDiscoveryError::UrlParse {
                    context: "Failed to construct ./services URL",
                    source: e,
                })?;
        let cheapest_url =
            base_url
                .join("./discover/cheapest")
                .map_err(|e| RemoteDiscoveryError::UrlParse {
                    context: "Failed to construct ./discover/cheapest URL",
                    source: e,
                })?;
        Ok(Self {
            client: Client::new(),
            base_url,
            services_url,
            cheapest_url,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// A client for the indexer at [`DEFAULT_INDEXER_URL`].
    ///
    /// # Errors
    ///
    /// Never fails in practice; the default URL is valid.
    pub fn local() -> Result<Self, RemoteDiscoveryError> {
        Self::try_from(DEFAULT_INDEXER_URL)
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

    /// The indexer base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Runs `GET /services` with `query` as query parameters.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteDiscoveryError`] on transport, status or decoding failure.
    pub async fn services(
        &self,
        query: &ServiceQuery,
    ) -> Result<ServicesResponse, RemoteDiscoveryError> {
        let url = with_query(self.services_url.clone(), query);
        self.get_json(url, "GET /services")
            .await?
            .ok_or_else(|| RemoteDiscoveryError::HttpStatus {
                context: "GET /services",
                status: StatusCode::NOT_FOUND,
                body: String::new(),
            })
    }

    /// Sends a GET request and decodes the JSON body; `404` yields `None`.
    async fn get_json<R>(
        &self,
        url: Url,
        context: &'static str,
    ) -> Result<Option<R>, RemoteDiscoveryError>
    where
        R: DeserializeOwned,
    {
        let http_response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RemoteDiscoveryError::Http { context, source: e })?;

        match http_response.status() {
            StatusCode::OK => http_response
                .json::<R>()
                .await
                .map(Some)
                .map_err(|e| RemoteDiscoveryError::JsonDeserialization { context, source: e }),
            StatusCode::NOT_FOUND => Ok(None),
            status => {
                let body = http_response
                    .text()
                    .await
                    .map_err(|e| RemoteDiscoveryError::ResponseBodyRead { context, source: e })?;
                Err(RemoteDiscoveryError::HttpStatus {
                    context,
                    status,
                    body,
                })
            }
        }
    }
}

fn with_query(mut url: Url, query: &ServiceQuery) -> Url {
    {
        let mut pairs = url.query_pairs_mut();
        if let Some(text) = &query.text {
            pairs.append_pair("q", text);
        }
        if !query.tags.is_empty() {
            pairs.append_pair("tags", &query.tags.join(","));
        }
        if let Some(max_price) = query.max_price {
            pairs.append_pair("maxPrice", &max_price.to_string());
        }
        if let Some(min_reputation) = query.min_reputation {
            pairs.append_pair("minReputation", &min_reputation.to_string());
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
    url
}

/// Converts a string URL into a [`RemoteDiscovery`], normalizing the trailing slash.
impl TryFrom<&str> for RemoteDiscovery {
    type Error = RemoteDiscoveryError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| RemoteDiscoveryError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        Self::try_new(url)
    }
}

impl TryFrom<String> for RemoteDiscovery {
    type Error = RemoteDiscoveryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

#[async_trait::async_trait]
impl DiscoverySource for RemoteDiscovery {
    async fn query(&self, query: &ServiceQuery) -> Result<Vec<ServiceListing>, DiscoveryError> {
        Ok(self.services(query).await?.services)
    }

    async fn cheapest(
        &self,
        query: &ServiceQuery,
    ) -> Result<Option<ServiceListing>, DiscoveryError> {
        let url = with_query(self.cheapest_url.clone(), query);
        Ok(self.get_json(url, "GET /discover/cheapest").await?)
    }

    async fn find(&self, name: &str) -> Result<Option<ServiceListing>, DiscoveryError> {
        let mut url = self.services_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(name);
        }
        Ok(self.get_json(url, "GET /services/{name}").await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn listing_json(name: &str, price: u64, reputation: u8) -> serde_json::Value {
        json!({
            "provider": "0xp",
            "name": name,
            "base_price": price,
            "metadata_url": "https://p.example.com",
            "tags": ["ai"],
            "reputation_score": reputation,
            "last_updated": 1
        })
    }

    #[tokio::test]
    async fn test_query_sends_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services"))
            .and(query_param("tags", "ai,image"))
            .and(query_param("minReputation", "70"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 1,
                "lastSync": 42,
                "services": [listing_json("gpt", 5, 90)]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let discovery = RemoteDiscovery::try_from(server.uri()).unwrap();
        let query = ServiceQuery::new()
            .with_tags(["ai", "image"])
            .with_min_reputation(70);
        let listings = DiscoverySource::query(&discovery, &query).await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].name, "gpt");
    }

    #[tokio::test]
    async fn test_cheapest_not_found_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/discover/cheapest"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "No matching service found"})))
            .mount(&server)
            .await;

        let discovery = RemoteDiscovery::try_from(server.uri()).unwrap();
        let cheapest = discovery.cheapest(&ServiceQuery::new()).await.unwrap();
        assert!(cheapest.is_none());
    }

    #[tokio::test]
    async fn test_cheapest_sends_full_filter_set() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/discover/cheapest"))
            .and(query_param("q", "gpt"))
            .and(query_param("maxPrice", "6"))
            .and(query_param("tags", "ai"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing_json("gpt-mini", 2, 40)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/services"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let discovery = RemoteDiscovery::try_from(server.uri()).unwrap();
        let query = ServiceQuery::new()
            .with_text("gpt")
            .with_tags(["ai"])
            .with_max_price(6);
        let cheapest = discovery.cheapest(&query).await.unwrap().unwrap();
        assert_eq!(cheapest.name, "gpt-mini");
    }

    #[tokio::test]
    async fn test_slow_indexer_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([]))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let discovery = RemoteDiscovery::try_from(server.uri()).unwrap();
        assert_eq!(discovery.timeout(), DEFAULT_TIMEOUT);
        let err = discovery
            .with_timeout(Duration::from_millis(50))
            .query(&ServiceQuery::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_find_by_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/gpt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing_json("gpt", 5, 90)))
            .mount(&server)
            .await;

        let discovery = RemoteDiscovery::try_from(format!("{}/", server.uri())).unwrap();
        let found = discovery.find("gpt").await.unwrap().unwrap();
        assert_eq!(found.base_price, 5);
        assert!(discovery.find("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let discovery = RemoteDiscovery::try_from(server.uri()).unwrap();
        let err = DiscoverySource::query(&discovery, &ServiceQuery::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_garbage_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let discovery = RemoteDiscovery::try_from(server.uri()).unwrap();
        let err = DiscoverySource::query(&discovery, &ServiceQuery::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidResponse(_)));
    }
}
