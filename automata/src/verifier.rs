//! Payment verification.
//!
//! [`PaymentVerifier`] turns a transaction identifier into a trust decision:
//! it fetches the transaction from the ledger and checks, without trusting
//! the payer's client, that it is a successful call of the configured pay
//! function that sent at least the expected amount to the expected provider.
//!
//! Verification is a single read. Transient ledger failures surface as
//! [`VerifyError::LedgerUnavailable`] or [`VerifyError::Timeout`] so that the
//! HTTP layer can decide between retrying and rejecting.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::ledger::{DEFAULT_TIMEOUT, LedgerError, LedgerReader, TransactionRecord};
use crate::module::ModuleId;
use crate::timestamp::LedgerTimestamp;

/// Suggested freshness window when the replay check is enabled.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Whether old transactions are rejected.
///
/// A payment transaction can be presented more than once. Replay protection
/// is the caller's responsibility; this policy only bounds how old a
/// presented transaction may be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FreshnessPolicy {
    /// Transactions of any age are accepted.
    // TODO: switch the default to `MaxAge(DEFAULT_FRESHNESS_WINDOW)` once
    // deployed clients pay immediately before calling. Leaving it disabled
    // lets one old payment unlock any number of requests.
    #[default]
    Disabled,
    /// Transactions older than the given age are rejected.
    MaxAge(Duration),
}

/// Configuration for a [`PaymentVerifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierConfig {
    /// Fully-qualified pay function a valid transaction must invoke.
    pub pay_function: String,
    /// Replay window policy.
    pub freshness: FreshnessPolicy,
}

impl VerifierConfig {
    /// Configuration accepting payments made through `module`'s pay function.
    #[must_use]
    pub fn new(module: &ModuleId) -> Self {
        Self {
            pay_function: module.pay_function(),
            freshness: FreshnessPolicy::default(),
        }
    }

    /// Sets the freshness policy.
    #[must_use]
    pub const fn with_freshness(mut self, freshness: FreshnessPolicy) -> Self {
        self.freshness = freshness;
        self
    }
}

/// A transaction presented as payment for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReference {
    /// Transaction identifier.
    pub tx_id: String,
    /// Provider the transaction must have paid.
    pub provider: String,
    /// Minimum amount the transaction must have paid, inclusive.
    pub amount: u64,
}

impl PaymentReference {
    /// Creates a reference claiming that `tx_id` paid at least `amount` to `provider`.
    pub fn new(tx_id: impl Into<String>, provider: impl Into<String>, amount: u64) -> Self {
        Self {
            tx_id: tx_id.into(),
            provider: provider.into(),
            amount,
        }
    }
}

/// A payment that passed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedPayment {
    /// Transaction identifier.
    pub tx_id: String,
    /// Address that signed the payment.
    pub payer: String,
    /// Amount actually paid.
    pub amount: u64,
    /// Ledger commit time.
    pub timestamp: LedgerTimestamp,
}

/// Why a transaction does not count as payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// Not a committed user transaction, or it aborted on-chain.
    NotSuccessfulUserTransaction,
    /// Invoked a function other than the configured pay function.
    WrongFunction,
    /// Paid a different provider.
    RecipientMismatch,
    /// Paid less than the expected amount.
    InsufficientAmount,
    /// Older than the configured freshness window.
    TooOld,
    /// Payload arguments do not have the `[wallet_owner, provider, amount]` shape.
    MalformedArguments,
}

impl InvalidReason {
    /// Human-readable reason.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotSuccessfulUserTransaction => "not a successful user transaction",
            Self::WrongFunction => "wrong function",
            Self::RecipientMismatch => "recipient mismatch",
            Self::InsufficientAmount => "insufficient amount",
            Self::TooOld => "transaction too old",
            Self::MalformedArguments => "malformed payment arguments",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`PaymentVerifier::verify`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum VerifyError {
    /// The referenced transaction does not exist.
    #[error("transaction not found: {0}")]
    NotFound(String),
    /// The ledger could not be read.
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),
    /// The ledger read did not complete in time.
    #[error("ledger read timed out")]
    Timeout,
    /// The transaction exists but is not a valid payment.
    #[error("{0}")]
    Invalid(InvalidReason),
}

impl VerifyError {
    /// Returns `true` if the same verification may succeed when retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LedgerUnavailable(_) | Self::Timeout)
    }

    /// The rejection reason for [`VerifyError::Invalid`].
    #[must_use]
    pub const fn reason(&self) -> Option<InvalidReason> {
        match self {
            Self::Invalid(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl From<InvalidReason> for VerifyError {
    fn from(reason: InvalidReason) -> Self {
        Self::Invalid(reason)
    }
}

impl From<LedgerError> for VerifyError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(what) => Self::NotFound(what),
            LedgerError::Timeout => Self::Timeout,
            other => Self::LedgerUnavailable(other.to_string()),
        }
    }
}

/// Verifies payment transactions against a ledger.
///
/// Stateless apart from its configuration; share it behind an [`Arc`](std::sync::Arc)
/// and call it concurrently.
#[derive(Debug, Clone)]
pub struct PaymentVerifier<L> {
    ledger: L,
    config: VerifierConfig,
    timeout: Duration,
}

impl<L> PaymentVerifier<L> {
    /// Creates a verifier reading from `ledger`.
    ///
    /// Each ledger read is bounded by [`DEFAULT_TIMEOUT`].
    pub const fn new(ledger: L, config: VerifierConfig) -> Self {
        Self {
            ledger,
            config,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bounds each ledger read by `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The bound on each ledger read.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The verifier configuration.
    pub const fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// The underlying ledger reader.
    pub const fn ledger(&self) -> &L {
        &self.ledger
    }
}

impl<L: LedgerReader> PaymentVerifier<L> {
    /// Verifies that `tx_id` paid at least `min_amount` to `provider`.
    ///
    /// # Errors
    ///
    /// - [`VerifyError::NotFound`] if the transaction does not exist
    /// - [`VerifyError::LedgerUnavailable`] / [`VerifyError::Timeout`] on read failure
    /// - [`VerifyError::Invalid`] if the transaction is not an acceptable payment
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "automata.verify", skip(self), err)
    )]
    pub async fn verify(
        &self,
        tx_id: &str,
        provider: &str,
        min_amount: u64,
    ) -> Result<VerifiedPayment, VerifyError> {
        let reference = PaymentReference::new(tx_id, provider, min_amount);
        self.verify_reference(&reference).await
    }

    /// Verifies a [`PaymentReference`].
    ///
    /// # Errors
    ///
    /// See [`PaymentVerifier::verify`].
    pub async fn verify_reference(
        &self,
        reference: &PaymentReference,
    ) -> Result<VerifiedPayment, VerifyError> {
        let fetch = self.ledger.get_transaction(&reference.tx_id);
        let record = tokio::time::timeout(self.timeout, fetch)
            .await
            .map_err(|_| VerifyError::Timeout)??;
        let verified = self.check(&record, reference, LedgerTimestamp::now())?;
        tracing::debug!(
            tx_id = %verified.tx_id,
            payer = %verified.payer,
            amount = verified.amount,
            "Payment verified"
        );
        Ok(verified)
    }

    /// Applies the validity checks to an already-fetched transaction.
    ///
    /// `now` is the reference time for the freshness policy.
    ///
    /// # Errors
    ///
    /// Returns the first check that fails, in order: transaction kind and
    /// status, function, recipient, amount, age.
    pub fn check(
        &self,
        record: &TransactionRecord,
        reference: &PaymentReference,
        now: LedgerTimestamp,
    ) -> Result<VerifiedPayment, InvalidReason> {
        if !record.is_successful_user_transaction() {
            return Err(InvalidReason::NotSuccessfulUserTransaction);
        }
        if record.function.as_deref() != Some(self.config.pay_function.as_str()) {
            return Err(InvalidReason::WrongFunction);
        }

        let (wallet_owner, paid_to, amount) = pay_arguments(&record.arguments)?;
        if self.ledger.normalize_address(paid_to) != self.ledger.normalize_address(&reference.provider)
        {
            return Err(InvalidReason::RecipientMismatch);
        }
        if amount < reference.amount {
            return Err(InvalidReason::InsufficientAmount);
        }
        if let FreshnessPolicy::MaxAge(max_age) = self.config.freshness
            && record.timestamp.age_at(now) > max_age
        {
            return Err(InvalidReason::TooOld);
        }

        let payer = record.sender.as_deref().unwrap_or(wallet_owner);
        Ok(VerifiedPayment {
            tx_id: record.hash.clone(),
            payer: self.ledger.normalize_address(payer),
            amount,
            timestamp: record.timestamp,
        })
    }
}

/// Extracts `[wallet_owner, provider, amount]` from pay-function arguments.
fn pay_arguments(arguments: &[Value]) -> Result<(&str, &str, u64), InvalidReason> {
    let [owner, provider, amount, ..] = arguments else {
        return Err(InvalidReason::MalformedArguments);
    };
    let owner = owner.as_str().ok_or(InvalidReason::MalformedArguments)?;
    let provider = provider.as_str().ok_or(InvalidReason::MalformedArguments)?;
    let amount = match amount {
        Value::String(s) => s.parse::<u64>().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
    .ok_or(InvalidReason::MalformedArguments)?;
    Ok((owner, provider, amount))
}
