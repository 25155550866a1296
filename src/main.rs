//! meshwire - cluster messaging node
//!
//! Starts a single transport node: binds the server, registers a demo echo
//! handler and runs until interrupted.

use bytes::Bytes;
use meshwire_messaging::{executor, Address, MessagingConfig, MessagingService};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cluster = std::env::var("MESHWIRE_CLUSTER").unwrap_or_else(|_| "meshwire".to_string());
    let address: Address = std::env::var("MESHWIRE_ADDRESS")
        .unwrap_or_else(|_| "127.0.0.1:5000".to_string())
        .parse()?;

    // Config comes from MESHWIRE_CONFIG if set, with env-var overrides on
    // top; a broken explicit config file is fatal.
    let config = match MessagingConfig::load() {
        Ok(config) => {
            if let Ok(path) = std::env::var("MESHWIRE_CONFIG") {
                tracing::info!("loaded config from {}", path);
            }
            config
        }
        Err(error) => {
            tracing::error!("failed to load config: {}", error);
            return Err(error.into());
        }
    };

    tracing::info!("starting meshwire node");
    tracing::info!("  cluster: {}", cluster);
    tracing::info!("  address: {}", address);
    if config.tls.enabled {
        tracing::info!("  TLS: enabled (mutual authentication)");
    } else {
        tracing::info!("  TLS: disabled");
    }

    let service = MessagingService::new(&cluster, address, config);
    service.register_handler(
        "echo",
        |_sender, payload: Bytes| payload,
        executor::direct(),
    );
    service.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    service.stop().await;
    Ok(())
}
