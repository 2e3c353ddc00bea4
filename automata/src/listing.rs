//! Service listings and provider reputation.
//!
//! [`RegistryEntry`] is the raw shape stored in the on-chain registry;
//! [`ServiceListing`] is the enriched, immutable view the discovery cache
//! serves after tagging and reputation lookup.

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};

/// Reputation percentage assigned to providers without any recorded history.
pub const NEUTRAL_REPUTATION: u8 = 100;

/// A published service as stored in the on-chain registry.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Provider address that receives payments.
    pub provider: String,
    /// Service name, unique per provider.
    pub name: String,
    /// Price per call in the smallest ledger unit.
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub base_price: u64,
    /// Base URL of the service endpoint.
    pub metadata_url: String,
}

/// The registry resource published under the module address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    /// All published services, in registration order.
    #[serde(default)]
    pub services: Vec<RegistryEntry>,
}

/// A priced AI service entry in the discovery cache.
///
/// Identity is the `(provider, name)` pair. Listings are rebuilt wholesale on
/// every sync and never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceListing {
    /// Provider address that receives payments.
    pub provider: String,
    /// Service name.
    pub name: String,
    /// Price per call in the smallest ledger unit.
    pub base_price: u64,
    /// Base URL of the service endpoint.
    pub metadata_url: String,
    /// Lowercase category tags.
    pub tags: Vec<String>,
    /// Derived provider reputation, 0-100.
    pub reputation_score: u8,
    /// When this listing was built, in milliseconds since the Unix epoch.
    #[serde(default)]
    pub last_updated: u64,
}

impl ServiceListing {
    /// Returns `true` if the listing carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Returns `true` if `name` equals this listing's name, ignoring ASCII case.
    #[must_use]
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Joins `path` onto the listing's endpoint base.
    ///
    /// ```rust
    /// # use automata::listing::ServiceListing;
    /// let listing = ServiceListing {
    ///     provider: "0x1".into(),
    ///     name: "gpt".into(),
    ///     base_price: 5,
    ///     metadata_url: "https://api.example.com/".into(),
    ///     tags: vec!["ai".into()],
    ///     reputation_score: 100,
    ///     last_updated: 0,
    /// };
    /// assert_eq!(listing.endpoint("v1/chat"), "https://api.example.com/v1/chat");
    /// ```
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        let base = self.metadata_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}

/// A provider's on-chain reputation record.
#[serde_as]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationSnapshot {
    /// Cumulative score.
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub score: u64,
    /// Number of rated transactions.
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub total_transactions: u64,
}

impl ReputationSnapshot {
    /// Derives the 0-100 reputation percentage.
    ///
    /// Computed as `round(score / total_transactions * 100)`, capped at 100.
    /// Providers with no transactions get [`NEUTRAL_REPUTATION`].
    #[must_use]
    pub fn percentage(&self) -> u8 {
        if self.total_transactions == 0 {
            return NEUTRAL_REPUTATION;
        }
        let total = u128::from(self.total_transactions);
        let scaled = (u128::from(self.score) * 100 + total / 2) / total;
        u8::try_from(scaled.min(100)).unwrap_or(NEUTRAL_REPUTATION)
    }
}

/// Derives the reputation percentage for an optional snapshot.
#[must_use]
pub fn reputation_percentage(snapshot: Option<&ReputationSnapshot>) -> u8 {
    snapshot.map_or(NEUTRAL_REPUTATION, ReputationSnapshot::percentage)
}
