//! Ledger access abstractions.
//!
//! The ledger is an external collaborator: the core never assumes a specific
//! chain, it only needs the operations below plus an address-normalization
//! rule.
//!
//! - [`LedgerReader`] - read-only access to account resources and transactions
//! - [`LedgerWriter`] - submission of entry-function transactions
//! - [`TransactionRecord`] - the chain-agnostic view of a committed transaction
//! - [`LedgerError`] - failure taxonomy shared by every backend

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::module::ModuleId;
use crate::timestamp::LedgerTimestamp;

/// Default bound on a single ledger read.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on submitting a transaction and waiting for it to commit.
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors returned by ledger backends.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    /// The requested transaction or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The ledger could not be reached or answered with a server error.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    /// The ledger did not answer within the configured bound.
    #[error("ledger request timed out")]
    Timeout,
    /// The ledger answered with data that could not be interpreted.
    #[error("malformed ledger response: {0}")]
    Malformed(String),
    /// A submitted transaction was rejected or failed on-chain.
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

impl LedgerError {
    /// Returns `true` for transient failures a caller may retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }
}

/// The kind of a ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// A finalized, user-submitted transaction.
    User,
    /// A transaction that has not been committed yet.
    Pending,
    /// Any system transaction (genesis, block metadata, checkpoints, ...).
    Other(String),
}

/// A committed (or pending) ledger transaction, reduced to the fields the core inspects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Transaction hash / identifier.
    pub hash: String,
    /// Transaction kind.
    pub kind: TransactionKind,
    /// Whether the transaction executed successfully on-chain.
    pub success: bool,
    /// Sender address for user transactions.
    pub sender: Option<String>,
    /// Fully-qualified entry function invoked by the payload, if any.
    pub function: Option<String>,
    /// Positional entry-function arguments as JSON values.
    pub arguments: Vec<Value>,
    /// Commit timestamp.
    pub timestamp: LedgerTimestamp,
}

impl TransactionRecord {
    /// Returns `true` for finalized user transactions that succeeded on-chain.
    #[must_use]
    pub fn is_successful_user_transaction(&self) -> bool {
        self.kind == TransactionKind::User && self.success
    }
}

/// An entry-function invocation to submit to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryFunctionCall {
    /// Fully-qualified function identifier (e.g. `0x1::automata::usage_wallet::pay`).
    pub function: String,
    /// Positional arguments.
    pub arguments: Vec<Value>,
}

impl EntryFunctionCall {
    /// Builds the `usage_wallet::pay(wallet_owner, provider, amount)` call for `module`.
    ///
    /// The amount is encoded as a decimal string, the ledger's JSON encoding for `u64`.
    #[must_use]
    pub fn pay(module: &ModuleId, wallet_owner: &str, provider: &str, amount: u64) -> Self {
        Self {
            function: module.pay_function(),
            arguments: vec![
                Value::String(wallet_owner.to_owned()),
                Value::String(provider.to_owned()),
                Value::String(amount.to_string()),
            ],
        }
    }

    /// Builds `usage_wallet::create_wallet(deposit)`, funding a new usage wallet for the sender.
    #[must_use]
    pub fn create_wallet(module: &ModuleId, deposit: u64) -> Self {
        Self {
            function: module.create_wallet_function(),
            arguments: vec![Value::String(deposit.to_string())],
        }
    }

    /// Builds `usage_wallet::authorize_spender(spender, max_daily)`, letting
    /// `spender` pay from the sender's wallet up to `max_daily` per day.
    #[must_use]
    pub fn authorize_spender(module: &ModuleId, spender: &str, max_daily: u64) -> Self {
        Self {
            function: module.authorize_spender_function(),
            arguments: vec![
                Value::String(spender.to_owned()),
                Value::String(max_daily.to_string()),
            ],
        }
    }

    /// Builds `market::publish_service(name, price, metadata_url)`, listing a
    /// service paid to the sender.
    #[must_use]
    pub fn publish_service(module: &ModuleId, name: &str, price: u64, metadata_url: &str) -> Self {
        Self {
            function: module.publish_service_function(),
            arguments: vec![
                Value::String(name.to_owned()),
                Value::String(price.to_string()),
                Value::String(metadata_url.to_owned()),
            ],
        }
    }

    /// Builds `identity::register_agent(name, url)` for the sender.
    #[must_use]
    pub fn register_agent(module: &ModuleId, name: &str, url: &str) -> Self {
        Self {
            function: module.register_agent_function(),
            arguments: vec![
                Value::String(name.to_owned()),
                Value::String(url.to_owned()),
            ],
        }
    }

    /// Builds `reputation::initialize()`, starting reputation tracking for the sender.
    #[must_use]
    pub fn initialize_reputation(module: &ModuleId) -> Self {
        Self {
            function: module.initialize_reputation_function(),
            arguments: Vec::new(),
        }
    }
}

/// Canonical address form: trimmed, lowercase, exactly one `0x` prefix.
///
/// `"ABC"`, `"0xabc"` and `" 0XAbC "` all normalize to `"0xabc"`.
#[must_use]
pub fn normalize_address(address: &str) -> String {
    let lower = address.trim().to_ascii_lowercase();
    let body = lower.strip_prefix("0x").unwrap_or(&lower);
    format!("0x{body}")
}

/// Read-only ledger access.
#[async_trait::async_trait]
pub trait LedgerReader: Send + Sync {
    /// Fetches the `data` of a resource stored under `address`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] if the account has no such resource.
    async fn get_account_resource(
        &self,
        address: &str,
        resource_type: &str,
    ) -> Result<Value, LedgerError>;

    /// Fetches a transaction by its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] if no such transaction exists.
    async fn get_transaction(&self, tx_id: &str) -> Result<TransactionRecord, LedgerError>;

    /// Normalizes an address for equality comparisons.
    fn normalize_address(&self, address: &str) -> String {
        normalize_address(address)
    }
}

/// Transaction submission.
#[async_trait::async_trait]
pub trait LedgerWriter: Send + Sync {
    /// Address of the account that signs submitted transactions.
    fn sender(&self) -> &str;

    /// Signs and submits `call`, then waits for the ledger to commit it.
    ///
    /// Returns the committed transaction's identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Rejected`] if the transaction failed on-chain.
    async fn submit_and_wait(&self, call: EntryFunctionCall) -> Result<String, LedgerError>;
}

#[async_trait::async_trait]
impl<T: LedgerReader + ?Sized> LedgerReader for Arc<T> {
    async fn get_account_resource(
        &self,
        address: &str,
        resource_type: &str,
    ) -> Result<Value, LedgerError> {
        (**self).get_account_resource(address, resource_type).await
    }

    async fn get_transaction(&self, tx_id: &str) -> Result<TransactionRecord, LedgerError> {
        (**self).get_transaction(tx_id).await
    }

    fn normalize_address(&self, address: &str) -> String {
        (**self).normalize_address(address)
    }
}

#[async_trait::async_trait]
impl<T: LedgerWriter + ?Sized> LedgerWriter for Arc<T> {
    fn sender(&self) -> &str {
        (**self).sender()
    }

    async fn submit_and_wait(&self, call: EntryFunctionCall) -> Result<String, LedgerError> {
        (**self).submit_and_wait(call).await
    }
}
