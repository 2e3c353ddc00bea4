#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Aptos backend for the automata ledger interfaces.
//!
//! [`AptosClient`] implements [`automata::ledger::LedgerReader`] over a
//! fullnode's REST API, so the payment verifier, the discovery cache and the
//! reputation plugin can run against a live network:
//!
//! ```rust,no_run
//! use automata::discovery::DiscoveryCache;
//! use automata_aptos::{AptosClient, AptosNetwork};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = AptosClient::for_network(AptosNetwork::Testnet)?;
//! let cache = DiscoveryCache::new(ledger, "0x1::automata".parse()?);
//! let report = cache.sync().await?;
//! println!("{} services", report.count);
//! # Ok(())
//! # }
//! ```
//!
//! Transaction signing is not provided; applications bring their own
//! [`automata::ledger::LedgerWriter`].

pub mod client;
pub mod networks;

pub use client::{AptosClient, AptosClientError};
pub use networks::AptosNetwork;
