//! Multi-Node Coordination Service
//!
//! This binary runs the coordinator that the nodes of a distributed test
//! job poll to rendezvous, synchronise and exchange results.
//!
//! # Usage
//!
//! ```bash
//! # Start coordinator with default settings
//! mnc-coordinator
//!
//! # Start with custom port
//! mnc-coordinator --port 4000
//!
//! # Start with configuration file
//! mnc-coordinator --config coordinator.toml
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coordinator_core::{CoordinatorConfig, CoordinatorServer};

/// Multi-Node Coordinator
#[derive(Parser, Debug)]
#[command(name = "mnc-coordinator")]
#[command(about = "Coordination service for multi-node test jobs")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Address to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Receive chunk size in bytes
    #[arg(long)]
    blocksize: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn load_config(&self) -> coordinator_core::Result<CoordinatorConfig> {
        let config = match &self.config {
            Some(path) => CoordinatorConfig::from_file(path)?,
            None => CoordinatorConfig::default(),
        };

        let mut config = config.with_env_overrides();
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(blocksize) = self.blocksize {
            config.server.blocksize = blocksize;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.load_config()?;

    tracing::info!("Starting MNC Coordinator");
    tracing::info!("  Blocksize: {} bytes", config.server.blocksize);
    tracing::info!("  Max frame: {} bytes", config.server.max_frame_bytes);
    tracing::info!(
        "  Aggregate pacing: {} rounds",
        config.groups.aggregate_pacing_rounds
    );

    let server = CoordinatorServer::bind(config.server, &config.groups).await?;
    tracing::info!("Listening on {}", server.local_addr()?);

    server
        .serve_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down coordinator...");
        })
        .await?;

    Ok(())
}
