//! Provider selection.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::discovery::{DiscoverySource, ServiceQuery};
use crate::listing::ServiceListing;
use crate::plugin::{CallRequest, Capabilities, HookFuture, Plugin};

/// How candidates are ranked when the requested service is not among them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Lowest price first.
    Cheapest,
    /// Highest reputation first.
    BestReputation,
    /// Highest `reputation / (price + 1)` first.
    #[default]
    Balanced,
}

impl Strategy {
    /// Orders `a` before `b` when `a` ranks better.
    #[must_use]
    pub fn compare(self, a: &ServiceListing, b: &ServiceListing) -> Ordering {
        match self {
            Self::Cheapest => a.base_price.cmp(&b.base_price),
            Self::BestReputation => b.reputation_score.cmp(&a.reputation_score),
            Self::Balanced => {
                // a.rep / (a.price + 1) vs b.rep / (b.price + 1), cross-multiplied
                let a_side = u128::from(a.reputation_score) * (u128::from(b.base_price) + 1);
                let b_side = u128::from(b.reputation_score) * (u128::from(a.base_price) + 1);
                b_side.cmp(&a_side)
            }
        }
    }

    /// The best candidate; among equals the earliest wins.
    #[must_use]
    pub fn pick(self, candidates: &[ServiceListing]) -> Option<&ServiceListing> {
        candidates.iter().reduce(|best, next| {
            if self.compare(next, best) == Ordering::Less {
                next
            } else {
                best
            }
        })
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cheapest => "cheapest",
            Self::BestReputation => "best-reputation",
            Self::Balanced => "balanced",
        })
    }
}

/// Error returned when parsing an unknown strategy name.
#[derive(Debug, thiserror::Error)]
#[error("unknown selection strategy {0:?}, expected cheapest, best-reputation or balanced")]
pub struct UnknownStrategy(String);

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cheapest" => Ok(Self::Cheapest),
            "best-reputation" | "best_reputation" => Ok(Self::BestReputation),
            "balanced" => Ok(Self::Balanced),
            _ => Err(UnknownStrategy(s.to_owned())),
        }
    }
}

/// Result of [`SelectorPlugin::select`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Service name to call.
    pub api: String,
    /// Listing backing `api`, if discovery returned one.
    pub listing: Option<ServiceListing>,
}

impl Selection {
    fn unchanged(requested: &str) -> Self {
        Self {
            api: requested.to_owned(),
            listing: None,
        }
    }

    /// Returns `true` if a different service than `requested` was chosen.
    #[must_use]
    pub fn is_substitution(&self, requested: &str) -> bool {
        !self.api.eq_ignore_ascii_case(requested)
    }
}

/// Redirects calls to the best listing matching configured criteria.
///
/// If the requested service passes the criteria it is kept; otherwise the best
/// candidate under [`Strategy`] replaces it. The hook never aborts: an empty
/// candidate set or an unreachable discovery source leaves the request as is.
#[derive(Debug)]
pub struct SelectorPlugin<D> {
    source: D,
    strategy: Strategy,
    criteria: ServiceQuery,
}

impl<D: DiscoverySource> SelectorPlugin<D> {
    /// Plugin name.
    pub const NAME: &'static str = "selector";

    /// Selects among listings from `source` matching `criteria`.
    pub const fn new(source: D, strategy: Strategy, criteria: ServiceQuery) -> Self {
        Self {
            source,
            strategy,
            criteria,
        }
    }

    /// Prefers the cheapest matching listing.
    pub const fn cheapest(source: D, criteria: ServiceQuery) -> Self {
        Self::new(source, Strategy::Cheapest, criteria)
    }

    /// Prefers the best-reputed matching listing.
    pub const fn best_reputation(source: D, criteria: ServiceQuery) -> Self {
        Self::new(source, Strategy::BestReputation, criteria)
    }

    /// The configured strategy.
    pub const fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Chooses the service to call instead of `requested`.
    pub async fn select(&self, requested: &str) -> Selection {
        self.select_with(requested, &self.criteria).await
    }

    /// Like [`SelectorPlugin::select`] with explicit criteria.
    pub async fn select_with(&self, requested: &str, criteria: &ServiceQuery) -> Selection {
        let candidates = match self.source.query(criteria).await {
            Ok(candidates) => candidates,
            Err(err) => {
                tracing::warn!(error = %err, api = requested, "Discovery unavailable, keeping requested service");
                return Selection::unchanged(requested);
            }
        };

        if let Some(listing) = candidates.iter().find(|l| l.is_named(requested)) {
            tracing::debug!(
                api = %listing.name,
                price = listing.base_price,
                reputation = listing.reputation_score,
                "Requested service meets criteria"
            );
            return Selection {
                api: listing.name.clone(),
                listing: Some(listing.clone()),
            };
        }

        let Some(best) = self.strategy.pick(&candidates) else {
            tracing::warn!(api = requested, "No service matches selection criteria");
            return Selection::unchanged(requested);
        };
        tracing::info!(
            requested,
            chosen = %best.name,
            strategy = %self.strategy,
            price = best.base_price,
            reputation = best.reputation_score,
            "Substituting service"
        );
        Selection {
            api: best.name.clone(),
            listing: Some(best.clone()),
        }
    }
}

impl<D: DiscoverySource> Plugin for SelectorPlugin<D> {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::BEFORE_CALL
    }

    fn before_call<'a>(&'a self, request: &'a mut CallRequest) -> HookFuture<'a> {
        Box::pin(async move {
            if let Some(listing) = self.select(&request.api).await.listing {
                request.select(listing);
            }
            Ok(())
        })
    }
}
