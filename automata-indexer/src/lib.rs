//! Discovery indexer for pay-per-call services.
//!
//! Keeps a [`DiscoveryCache`](automata::discovery::DiscoveryCache) of the
//! on-chain service registry fresh and serves it over HTTP.
//!
//! # Modules
//!
//! - [`handlers`] - Axum route handlers and router builder
//! - [`error`] - API error types
//! - [`config`] - Server configuration with environment variable expansion
//! - [`util`] - Shutdown signal handling

pub mod config;
pub mod error;
pub mod handlers;
pub mod util;

pub use handlers::{IndexerState, indexer_router};
