//! Per-account state: usage wallet balances, reputation and agent identities.
//!
//! [`AccountReader`] reads the module's account resources through a
//! [`LedgerReader`]. A missing resource is an answer ("no wallet", "no
//! history"), not an error.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};

use crate::ledger::{DEFAULT_TIMEOUT, LedgerError, LedgerReader};
use crate::listing::ReputationSnapshot;
use crate::module::ModuleId;

/// An agent's on-chain identity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Registered display name.
    pub name: String,
    /// Registered URL; empty when none was given.
    #[serde(default)]
    pub url: String,
    /// Whether the identity has been verified by the module operator.
    #[serde(default)]
    pub verified: bool,
}

#[serde_as]
#[derive(Deserialize)]
struct CoinValue {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    value: u64,
}

#[derive(Deserialize)]
struct UsageWalletResource {
    balance: CoinValue,
}

/// Reads account resources of one protocol module.
#[derive(Debug, Clone)]
pub struct AccountReader<L> {
    ledger: L,
    module: ModuleId,
    timeout: Duration,
}

impl<L: LedgerReader> AccountReader<L> {
    /// Reads `module`'s resources from `ledger`.
    pub const fn new(ledger: L, module: ModuleId) -> Self {
        Self {
            ledger,
            module,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bounds each read by `timeout` instead of [`DEFAULT_TIMEOUT`].
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The underlying ledger reader.
    pub const fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Balance of `owner`'s usage wallet; `0` if the account has none.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the ledger cannot be read or the wallet
    /// resource has an unexpected shape.
    pub async fn balance(&self, owner: &str) -> Result<u64, LedgerError> {
        let wallet: Option<UsageWalletResource> = self
            .resource(owner, &self.module.usage_wallet_resource())
            .await?;
        Ok(wallet.map_or(0, |w| w.balance.value))
    }

    /// Reputation record of `address`; `None` if it has no history.
    ///
    /// # Errors
    ///
    /// See [`AccountReader::balance`].
    pub async fn reputation(&self, address: &str) -> Result<Option<ReputationSnapshot>, LedgerError> {
        self.resource(address, &self.module.reputation_resource())
            .await
    }

    /// Identity registered by `address`; `None` if it never registered.
    ///
    /// # Errors
    ///
    /// See [`AccountReader::balance`].
    pub async fn agent_info(&self, address: &str) -> Result<Option<AgentIdentity>, LedgerError> {
        self.resource(address, &self.module.agent_identity_resource())
            .await
    }

    async fn resource<T: DeserializeOwned>(
        &self,
        address: &str,
        resource_type: &str,
    ) -> Result<Option<T>, LedgerError> {
        let read = self.ledger.get_account_resource(address, resource_type);
        match tokio::time::timeout(self.timeout, read).await {
            Err(_) => Err(LedgerError::Timeout),
            Ok(Err(LedgerError::NotFound(_))) => Ok(None),
            Ok(Err(err)) => Err(err),
            Ok(Ok(value)) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| LedgerError::Malformed(format!("{resource_type}: {e}"))),
        }
    }
}
