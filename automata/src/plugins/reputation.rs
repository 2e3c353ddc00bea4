//! Provider reputation floor.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::account::AccountReader;
use crate::error::PluginAbort;
use crate::ledger::{LedgerError, LedgerReader};
use crate::listing::{ReputationSnapshot, reputation_percentage};
use crate::module::ModuleId;
use crate::plugin::{Capabilities, HookFuture, PayContext, Plugin};

/// How long a fetched reputation record is reused.
pub const DEFAULT_REPUTATION_TTL: Duration = Duration::from_secs(60);

/// Refuses payments to providers whose on-chain reputation is below a floor.
///
/// Providers without a reputation record are treated as neutral. When the
/// ledger cannot be read the payment is refused.
#[derive(Debug)]
pub struct ReputationPlugin<L> {
    accounts: AccountReader<L>,
    min_score: u8,
    ttl: Duration,
    cache: DashMap<String, (Instant, Option<ReputationSnapshot>)>,
}

impl<L: LedgerReader> ReputationPlugin<L> {
    /// Plugin name.
    pub const NAME: &'static str = "reputation";

    /// Requires a reputation of at least `min_score` (0-100).
    pub fn new(ledger: L, module: ModuleId, min_score: u8) -> Self {
        Self {
            accounts: AccountReader::new(ledger, module),
            min_score,
            ttl: DEFAULT_REPUTATION_TTL,
            cache: DashMap::new(),
        }
    }

    /// Overrides how long records are cached.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Bounds each reputation read by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.accounts = self.accounts.with_timeout(timeout);
        self
    }

    /// The provider's reputation percentage.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the ledger cannot be read in time or the
    /// record is malformed.
    pub async fn score(&self, provider: &str) -> Result<u8, LedgerError> {
        let key = self.accounts.ledger().normalize_address(provider);
        let cached = self
            .cache
            .get(&key)
            .filter(|entry| entry.0.elapsed() < self.ttl)
            .map(|entry| entry.1);
        if let Some(snapshot) = cached {
            return Ok(reputation_percentage(snapshot.as_ref()));
        }

        let snapshot = self.accounts.reputation(&key).await?;
        self.cache.insert(key, (Instant::now(), snapshot));
        Ok(reputation_percentage(snapshot.as_ref()))
    }
}

impl<L: LedgerReader> Plugin for ReputationPlugin<L> {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::BEFORE_PAY
    }

    fn before_pay<'a>(&'a self, ctx: &'a PayContext) -> HookFuture<'a> {
        Box::pin(async move {
            let score = self.score(&ctx.provider).await.map_err(|err| {
                PluginAbort::new(Self::NAME, format!("reputation unavailable: {err}"))
            })?;
            tracing::debug!(provider = %ctx.provider, score, min = self.min_score, "Reputation check");
            if score < self.min_score {
                return Err(PluginAbort::new(
                    Self::NAME,
                    format!(
                        "provider reputation {score} is below required {}",
                        self.min_score
                    ),
                ));
            }
            Ok(())
        })
    }
}
