//! Errors returned by paid calls.
//!
//! [`CallError`] separates failures that happened before any funds moved from
//! failures that happened after the payment was committed. The latter carry
//! the payment transaction id, which is the only evidence the caller has for
//! a dispute: there is no escrow and no refund path.

use std::fmt;

use crate::discovery::DiscoveryError;
use crate::ledger::LedgerError;

/// A plugin hook refused to let the call continue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{plugin}: {reason}")]
pub struct PluginAbort {
    /// Name of the aborting plugin.
    pub plugin: String,
    /// Human-readable reason.
    pub reason: String,
}

impl PluginAbort {
    /// Creates an abort raised by `plugin`.
    pub fn new(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }
}

/// How the provider call failed after payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCallFailure {
    /// The provider answered with a non-success status.
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// The request could not be sent or the response could not be read.
    Transport(String),
    /// The provider did not answer in time.
    Timeout,
}

impl fmt::Display for ProviderCallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { status, body } if body.is_empty() => write!(f, "status {status}"),
            Self::Status { status, body } => write!(f, "status {status}: {body}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Timeout => f.write_str("timed out"),
        }
    }
}

/// Errors returned by a paid call.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// A `before_call` or `before_pay` hook aborted; nothing was paid.
    #[error("aborted by plugin {0}")]
    PluginAborted(#[source] PluginAbort),
    /// No listing matches the requested API; nothing was paid.
    #[error("service not found: {0}")]
    ServiceNotFound(String),
    /// The discovery source could not resolve the API; nothing was paid.
    #[error("service lookup failed: {0}")]
    Discovery(#[from] DiscoveryError),
    /// Submitting the payment failed.
    ///
    /// A [`LedgerError::Timeout`] leaves the outcome unknown: the transaction
    /// may still commit.
    #[error("payment failed: {0}")]
    Payment(#[source] LedgerError),
    /// An `after_pay` hook failed, so the provider was not called.
    #[error("payment {payment_tx} committed but plugin {abort} stopped the call")]
    PostPaymentAborted {
        /// The committed payment.
        payment_tx: String,
        /// The first failing hook.
        abort: PluginAbort,
    },
    /// The provider call failed after payment.
    #[error("payment {payment_tx} committed but provider call failed: {failure}")]
    ProviderCallFailed {
        /// The committed payment.
        payment_tx: String,
        /// What went wrong.
        failure: ProviderCallFailure,
    },
}

impl CallError {
    /// The committed payment transaction, for errors raised after payment.
    #[must_use]
    pub fn payment_tx(&self) -> Option<&str> {
        match self {
            Self::PostPaymentAborted { payment_tx, .. }
            | Self::ProviderCallFailed { payment_tx, .. } => Some(payment_tx),
            _ => None,
        }
    }

    /// Returns `true` if funds were spent before the call failed.
    #[must_use]
    pub fn funds_spent(&self) -> bool {
        self.payment_tx().is_some()
    }
}

impl From<PluginAbort> for CallError {
    fn from(abort: PluginAbort) -> Self {
        Self::PluginAborted(abort)
    }
}
