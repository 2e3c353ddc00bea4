//! Discovery indexer HTTP server.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p automata-indexer --release
//!
//! # Run with custom config path
//! automata-indexer --config /path/to/config.toml
//!
//! # Configure logging level
//! RUST_LOG=debug automata-indexer
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to TOML configuration file (default: `config.toml`)
//! - `HOST` - Override bind address (default: `0.0.0.0`)
//! - `PORT` - Override port (default: `3001`)
//! - `AUTOMATA_MODULE_ID` - Override the protocol module
//! - `APTOS_NETWORK` - Override the network (default: `testnet`)
//! - `APTOS_NODE_URL` - Override the fullnode URL
//! - `RUST_LOG` - Log level filter (default: `info`)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use automata::discovery::DiscoveryCache;
use automata_aptos::AptosClient;
use axum::http::Method;
use clap::Parser;
use tower_http::cors;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use automata_indexer::config::IndexerConfig;
use automata_indexer::indexer_router;
use automata_indexer::util::SigDown;

/// Discovery indexer for pay-per-call services.
#[derive(Debug, Parser)]
#[command(name = "automata-indexer", version, about)]
struct Cli {
    /// Path to the TOML configuration file; a missing file means defaults.
    #[arg(long, env = "CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!("Indexer failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = IndexerConfig::load_from(&cli.config)?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        module = %config.module_id,
        network = %config.network,
        node_url = config.node_url(),
        "Loaded configuration"
    );

    let ledger = AptosClient::try_from(config.node_url())?.with_timeout(config.request_timeout());
    let cache = Arc::new(DiscoveryCache::new(ledger, config.module_id.clone()));

    let sig_down = SigDown::try_new()?;
    let token = sig_down.cancellation_token();
    let sync_task = cache.spawn_periodic(config.sync_interval(), token.clone());

    let app = indexer_router(Arc::clone(&cache))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Indexer listening on http://{addr}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(token.clone().cancelled_owned())
        .await;
    token.cancel();
    served?;

    sig_down.recv().await;
    if let Err(e) = sync_task.await {
        tracing::warn!("Sync task ended abnormally: {e}");
    }
    tracing::info!("Indexer shut down gracefully");
    Ok(())
}
