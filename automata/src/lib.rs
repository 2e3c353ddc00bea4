#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for pay-per-call AI services settled on a ledger.
//!
//! A consumer pays a provider per API call from a pre-funded usage wallet,
//! then calls the provider with the payment transaction id attached. The
//! provider checks that transaction on the ledger before serving the request.
//! This crate holds everything in that flow that does not speak HTTP.
//!
//! # Modules
//!
//! - [`ledger`] - Ledger reader/writer traits and the transaction model
//! - [`account`] - Wallet balances, reputation and agent identities
//! - [`module`] - On-chain module identifiers and derived function/resource names
//! - [`verifier`] - Payment verification
//! - [`discovery`] - Service registry cache and queries
//! - [`listing`] - Service listings and reputation
//! - [`tags`] - Pluggable listing categorization
//! - [`plugin`] - The hook pipeline around paid calls
//! - [`plugins`] - Budget, reputation and provider-selection plugins
//! - [`error`] - Paid-call errors
//! - [`timestamp`] - Ledger timestamps
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing spans on verification and sync
//! - `test-util` - Exposes [`testing::MemoryLedger`]

pub mod account;
pub mod discovery;
pub mod error;
pub mod ledger;
pub mod listing;
pub mod module;
pub mod plugin;
pub mod plugins;
pub mod tags;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod timestamp;
pub mod verifier;
