//! Ensemble server binary

use clap::{Parser, Subcommand};
use coordkit::{Config, EnsembleServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "coordkit-ensemble")]
#[command(about = "In-memory coordination ensemble served over HTTP")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./coordkit.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the ensemble server
    Serve {
        /// Bind address for HTTP (overrides the config file)
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config from file, then override with CLI arguments
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve { bind } => {
            tracing::info!("coordkit-ensemble {}", coordkit::BUILD_INFO);
            if let Some(bind) = bind {
                config.server.bind_addr = bind;
            }
            EnsembleServer::new(config.server).serve().await?;
        }
    }

    Ok(())
}
