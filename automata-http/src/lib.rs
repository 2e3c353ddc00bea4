#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP transport for pay-per-call services.
//!
//! # Modules
//!
//! - [`constants`] - Header names and defaults
//! - [`server`] - Request gate: tower layer that admits requests carrying a
//!   verified payment (feature: `server`)
//! - [`client`] - Payment orchestrator that pays a provider and then calls it,
//!   and a remote discovery client (feature: `client`)
//!
//! # Feature Flags
//!
//! - `server` - Request gate
//! - `client` - Orchestrator and remote discovery
//! - `telemetry` - Tracing spans

pub mod constants;

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "server")]
pub mod server;
