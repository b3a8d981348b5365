//! Pulsecast Server
//!
//! Run with: cargo run -- serve --config config.toml
//!
//! Without `--config` the default locations are searched, then environment
//! variables (`PULSECAST_*`) are applied on top. `RUST_LOG` overrides the
//! configured log level.

use anyhow::Context;
use clap::{Parser, Subcommand};
use pulsecast::api::{serve, AppState};
use pulsecast::config::{generate_default_config, Config, LoadedConfig};
use pulsecast::logging::init_logging;
use pulsecast::sampler::{DashboardSampler, SimulatedDashboard};
use pulsecast::websocket::{Hub, HubConfig};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "pulsecast")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Real-time event broadcast hub")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the broadcast server (default)
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Disable the dashboard sampler
        #[arg(long)]
        no_sampler: bool,
    },
    /// Print a default config file
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
        no_sampler: false,
    });

    match command {
        Commands::Config => {
            print!("{}", generate_default_config());
            Ok(())
        }
        Commands::Serve {
            host,
            port,
            no_sampler,
        } => {
            let mut loaded = match &cli.config {
                Some(path) => Config::load_with_env(path)
                    .map(|config| LoadedConfig::from_file(config, path.clone()))
                    .with_context(|| format!("loading config from {}", path.display()))?,
                None => Config::load_default(),
            };
            if let Some(host) = host {
                loaded.config.api.host = host;
            }
            if let Some(port) = port {
                loaded.config.api.port = port;
            }
            if no_sampler {
                loaded.config.sampler.enabled = false;
            }

            run(loaded).await
        }
    }
}

async fn run(loaded: LoadedConfig) -> anyhow::Result<()> {
    init_logging(&loaded.config.logging).context("initializing logging")?;

    tracing::info!("Starting Pulsecast v{}", env!("CARGO_PKG_VERSION"));
    loaded.log_outcome();
    let config = loaded.config;

    let hub = Arc::new(Hub::new(HubConfig::from(&config.hub)));
    tracing::info!(
        queue_capacity = hub.config().outbound_queue_capacity,
        max_connections = ?hub.config().max_connections,
        idle_timeout = ?hub.config().idle_timeout,
        "Broadcast hub ready"
    );

    let sampler_handle = if config.sampler.enabled {
        let sampler = Arc::new(DashboardSampler::new(
            Arc::clone(&hub),
            Arc::new(SimulatedDashboard),
            config.sampler.clone(),
        ));
        Some(sampler.start())
    } else {
        tracing::info!("Dashboard sampler disabled");
        None
    };

    let state = AppState::new(Arc::clone(&hub), config.api.clone());
    let result = serve(state, &config.api).await;

    if let Some(handle) = sampler_handle {
        handle.abort();
    }

    let stats = hub.stats();
    tracing::info!(
        published = stats.published_total,
        registered = stats.registered_total,
        evicted = stats.evicted_total,
        "Pulsecast stopped"
    );

    result.context("running API server")
}
