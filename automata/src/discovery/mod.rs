//! Service discovery.
//!
//! - [`DiscoveryCache`] - in-memory snapshot of the on-chain registry with
//!   reputation and tags, refreshed on a timer and on demand
//! - [`ServiceQuery`] - the filter set used by listing and cheapest-match queries
//! - [`DiscoverySource`] - anything that can answer those queries, local or remote

mod cache;
mod query;

use std::sync::Arc;

pub use cache::{DiscoveryCache, Snapshot, SyncError, SyncReport};
pub use query::{ServiceQuery, parse_tag_list};

use crate::listing::ServiceListing;

#[cfg(test)]
pub(crate) use query::listing;

/// Errors returned by a [`DiscoverySource`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    /// The source could not be reached.
    #[error("discovery source unavailable: {0}")]
    Unavailable(String),
    /// The source answered with something other than listings.
    #[error("invalid discovery response: {0}")]
    InvalidResponse(String),
}

/// A queryable set of service listings.
#[async_trait::async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Listings matching `query`, best reputation first.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] if the source cannot be queried.
    async fn query(&self, query: &ServiceQuery) -> Result<Vec<ServiceListing>, DiscoveryError>;

    /// The cheapest listing matching `query`.
    ///
    /// The default picks the lowest price from [`DiscoverySource::query`], so
    /// equal prices go to the listing `query` returns first, the better
    /// reputed one. Sources that hold listings in registry order override it
    /// to let the first-registered listing win ties.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] if the source cannot be queried.
    async fn cheapest(
        &self,
        query: &ServiceQuery,
    ) -> Result<Option<ServiceListing>, DiscoveryError> {
        let listings = self.query(query).await?;
        Ok(listings.into_iter().min_by_key(|l| l.base_price))
    }

    /// The listing named `name`, ignoring ASCII case.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] if the source cannot be queried.
    async fn find(&self, name: &str) -> Result<Option<ServiceListing>, DiscoveryError> {
        let listings = self.query(&ServiceQuery::new()).await?;
        Ok(listings.into_iter().find(|l| l.is_named(name)))
    }
}

#[async_trait::async_trait]
impl<T: DiscoverySource + ?Sized> DiscoverySource for Arc<T> {
    async fn query(&self, query: &ServiceQuery) -> Result<Vec<ServiceListing>, DiscoveryError> {
        (**self).query(query).await
    }

    async fn cheapest(
        &self,
        query: &ServiceQuery,
    ) -> Result<Option<ServiceListing>, DiscoveryError> {
        (**self).cheapest(query).await
    }

    async fn find(&self, name: &str) -> Result<Option<ServiceListing>, DiscoveryError> {
        (**self).find(name).await
    }
}
