//! Client side of a paid call.
//!
//! [`PaymentOrchestrator`] resolves a service, pays its provider through the
//! plugin chain and then calls the provider with the payment attached.
//! [`RemoteDiscovery`] resolves services against an indexer's HTTP API.
//!
//! ```rust,no_run
//! use automata::plugins::BudgetPlugin;
//! use automata::testing::MemoryLedger;
//! use automata_http::client::{PaymentOrchestrator, RemoteDiscovery};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let discovery = RemoteDiscovery::try_from("http://localhost:3001")?;
//! let orchestrator = PaymentOrchestrator::new(
//!     MemoryLedger::new(),
//!     discovery,
//!     "0x1::automata".parse()?,
//! )
//! .with_plugin(BudgetPlugin::new(1_000));
//!
//! let response = orchestrator
//!     .call("gpt-proxy", "/v1/chat", json!({"prompt": "hello"}))
//!     .await?;
//! println!("{} paid by {}", response.body, response.payment_tx);
//! # Ok(())
//! # }
//! ```

mod discovery;
mod orchestrator;

pub use discovery::{RemoteDiscovery, RemoteDiscoveryError, ServicesResponse};
pub use orchestrator::{PaymentOrchestrator, ProviderResponse};
