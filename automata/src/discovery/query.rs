//! Listing filters.

use crate::listing::ServiceListing;

/// Filter set shared by listing queries and cheapest-match lookups.
///
/// Every field is optional; an empty query matches every listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceQuery {
    /// Case-insensitive substring matched against the name or any tag.
    pub text: Option<String>,
    /// A listing passes if it carries at least one of these tags.
    pub tags: Vec<String>,
    /// Inclusive price ceiling.
    pub max_price: Option<u64>,
    /// Inclusive reputation floor.
    pub min_reputation: Option<u8>,
}

impl ServiceQuery {
    /// A query matching everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a free-text filter. Blank text is ignored.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into().trim().to_lowercase();
        self.text = (!text.is_empty()).then_some(text);
        self
    }

    /// Requires at least one of `tags`.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = tags
            .into_iter()
            .map(|t| t.as_ref().trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        self
    }

    /// Sets the price ceiling.
    #[must_use]
    pub const fn with_max_price(mut self, max_price: u64) -> Self {
        self.max_price = Some(max_price);
        self
    }

    /// Sets the reputation floor.
    #[must_use]
    pub const fn with_min_reputation(mut self, min_reputation: u8) -> Self {
        self.min_reputation = Some(min_reputation);
        self
    }

    /// Returns `true` if `listing` passes every filter.
    #[must_use]
    pub fn matches(&self, listing: &ServiceListing) -> bool {
        if let Some(text) = &self.text {
            let text = text.to_lowercase();
            let hit = listing.name.to_lowercase().contains(&text)
                || listing.tags.iter().any(|t| t.contains(&text));
            if !hit {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| listing.has_tag(t)) {
            return false;
        }
        if self.max_price.is_some_and(|max| listing.base_price > max) {
            return false;
        }
        if self
            .min_reputation
            .is_some_and(|min| listing.reputation_score < min)
        {
            return false;
        }
        true
    }

    /// Matching listings, best reputation first.
    ///
    /// The sort is stable: equally reputed listings keep their input order.
    #[must_use]
    pub fn apply(&self, listings: &[ServiceListing]) -> Vec<ServiceListing> {
        let mut matched: Vec<ServiceListing> = listings
            .iter()
            .filter(|l| self.matches(l))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.reputation_score.cmp(&a.reputation_score));
        matched
    }

    /// The lowest-priced matching listing; the first one seen wins ties.
    #[must_use]
    pub fn cheapest(&self, listings: &[ServiceListing]) -> Option<ServiceListing> {
        listings
            .iter()
            .filter(|l| self.matches(l))
            .min_by_key(|l| l.base_price)
            .cloned()
    }
}

/// Splits a comma-separated tag list, dropping blanks.
///
/// ```rust
/// # use automata::discovery::parse_tag_list;
/// assert_eq!(parse_tag_list(" AI,,image "), vec!["ai", "image"]);
/// ```
#[must_use]
pub fn parse_tag_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
pub(crate) fn listing(name: &str, price: u64, reputation: u8, tags: &[&str]) -> ServiceListing {
    ServiceListing {
        provider: format!("0x{name}"),
        name: name.to_owned(),
        base_price: price,
        metadata_url: format!("https://{name}.example.com"),
        tags: tags.iter().map(|t| (*t).to_owned()).collect(),
        reputation_score: reputation,
        last_updated: 0,
    }
}
