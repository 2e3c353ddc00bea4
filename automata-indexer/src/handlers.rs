//! Axum route handlers for the discovery query API.
//!
//! All reads are served from the latest successful snapshot of the
//! [`DiscoveryCache`]; a sync in progress never blocks them.

use std::sync::Arc;

use automata::discovery::{DiscoveryCache, ServiceQuery, parse_tag_list};
use automata::ledger::LedgerReader;
use automata::listing::ServiceListing;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Shared application state.
pub type IndexerState<L> = Arc<DiscoveryCache<L>>;

/// Query parameters of `GET /services` and `GET /discover/cheapest`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicesParams {
    /// Free-text search over names and tags.
    pub q: Option<String>,
    /// Comma-separated tags; a listing needs at least one.
    pub tags: Option<String>,
    /// Inclusive price ceiling.
    pub max_price: Option<String>,
    /// Inclusive reputation floor.
    pub min_reputation: Option<String>,
}

impl ServicesParams {
    /// Converts the raw parameters into a [`ServiceQuery`]. Blank values are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::InvalidQuery`] for non-numeric bounds.
    pub fn to_query(&self) -> Result<ServiceQuery, IndexerError> {
        let mut query = ServiceQuery::new();
        if let Some(q) = non_blank(self.q.as_deref()) {
            query = query.with_text(q);
        }
        if let Some(tags) = non_blank(self.tags.as_deref()) {
            query = query.with_tags(parse_tag_list(tags));
        }
        if let Some(max_price) = non_blank(self.max_price.as_deref()) {
            query = query.with_max_price(parse_bound("maxPrice", max_price)?);
        }
        if let Some(min_reputation) = non_blank(self.min_reputation.as_deref()) {
            // Floors above 100 match nothing.
            let floor = parse_bound("minReputation", min_reputation)?;
            query = query.with_min_reputation(u8::try_from(floor).unwrap_or(u8::MAX));
        }
        Ok(query)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_bound(param: &'static str, value: &str) -> Result<u64, IndexerError> {
    value.parse().map_err(|e: std::num::ParseIntError| IndexerError::InvalidQuery {
        param,
        reason: format!("{value:?} is not a non-negative integer ({e})"),
    })
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: String,
    /// Last successful sync, ms since the Unix epoch; `0` before the first.
    pub last_sync: u64,
    /// Listings in the current snapshot.
    pub service_count: usize,
    /// Server version.
    pub version: String,
}

/// Body of `GET /services`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicesResponse {
    /// Number of matching listings.
    pub count: usize,
    /// Last successful sync, ms since the Unix epoch.
    pub last_sync: u64,
    /// Matching listings, best reputation first.
    pub services: Vec<ServiceListing>,
}

/// Body of `POST /sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// `"synced"` or `"failed"`.
    pub status: String,
    /// Listings in the snapshot now being served.
    pub count: usize,
    /// Sync time of the snapshot now being served.
    pub timestamp: u64,
    /// Failure detail when `status` is `"failed"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `GET /health` - Liveness and sync freshness.
pub async fn get_health<L: LedgerReader + 'static>(
    State(cache): State<IndexerState<L>>,
) -> Json<HealthResponse> {
    let snapshot = cache.snapshot().await;
    Json(HealthResponse {
        status: "ok".to_owned(),
        last_sync: snapshot.last_sync(),
        service_count: snapshot.len(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
    })
}

/// `GET /services` - Filtered listings sorted by reputation.
///
/// # Errors
///
/// Returns 400 on a malformed numeric filter.
pub async fn get_services<L: LedgerReader + 'static>(
    State(cache): State<IndexerState<L>>,
    Query(params): Query<ServicesParams>,
) -> Result<Json<ServicesResponse>, IndexerError> {
    let query = params.to_query()?;
    let snapshot = cache.snapshot().await;
    let services = query.apply(snapshot.listings());
    Ok(Json(ServicesResponse {
        count: services.len(),
        last_sync: snapshot.last_sync(),
        services,
    }))
}

/// `GET /services/{name}` - A listing by case-insensitive name.
///
/// # Errors
///
/// Returns 404 if no listing has that name.
pub async fn get_service<L: LedgerReader + 'static>(
    State(cache): State<IndexerState<L>>,
    Path(name): Path<String>,
) -> Result<Json<ServiceListing>, IndexerError> {
    cache
        .find(&name)
        .await
        .map(Json)
        .ok_or(IndexerError::ServiceNotFound)
}

/// `GET /discover/cheapest` - The lowest-priced matching listing.
///
/// # Errors
///
/// Returns 404 if nothing matches, 400 on a malformed numeric filter.
pub async fn get_cheapest<L: LedgerReader + 'static>(
    State(cache): State<IndexerState<L>>,
    Query(params): Query<ServicesParams>,
) -> Result<Json<ServiceListing>, IndexerError> {
    let query = params.to_query()?;
    cache
        .cheapest(&query)
        .await
        .map(Json)
        .ok_or(IndexerError::NoMatch)
}

/// `POST /sync` - Forces a sync.
///
/// A failed sync answers `503` and describes the snapshot still being served.
pub async fn post_sync<L: LedgerReader + 'static>(
    State(cache): State<IndexerState<L>>,
) -> (StatusCode, Json<SyncResponse>) {
    match cache.sync().await {
        Ok(report) => (
            StatusCode::OK,
            Json(SyncResponse {
                status: "synced".to_owned(),
                count: report.count,
                timestamp: report.last_sync,
                error: None,
            }),
        ),
        Err(err) => {
            tracing::error!(error = %err, "Forced sync failed");
            let snapshot = cache.snapshot().await;
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(SyncResponse {
                    status: "failed".to_owned(),
                    count: snapshot.len(),
                    timestamp: snapshot.last_sync(),
                    error: Some(err.to_string()),
                }),
            )
        }
    }
}

/// Creates an Axum [`Router`] with all indexer endpoints.
///
/// Endpoints:
/// - `GET /health` - liveness and sync freshness
/// - `GET /services` - filtered listings
/// - `GET /services/{name}` - one listing
/// - `GET /discover/cheapest` - cheapest matching listing
/// - `POST /sync` - force a sync
pub fn indexer_router<L: LedgerReader + 'static>(state: IndexerState<L>) -> Router {
    Router::new()
        .route("/health", get(get_health::<L>))
        .route("/services", get(get_services::<L>))
        .route("/services/{name}", get(get_service::<L>))
        .route("/discover/cheapest", get(get_cheapest::<L>))
        .route("/sync", post(post_sync::<L>))
        .with_state(state)
}
