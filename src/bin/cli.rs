//! CLI for ensemble nodes and service discovery

use bytes::Bytes;
use clap::{Parser, Subcommand};
use coordkit::discovery::{FixedWeight, ServiceType, UriSpec};
use coordkit::{Config, Registration, ServiceDiscovery};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "coordkit")]
#[command(about = "coordkit coordination and service discovery CLI")]
#[command(version)]
struct Cli {
    /// Ensemble URL (overrides the config file)
    #[arg(long)]
    ensemble: Option<String>,

    /// Namespace applied to every path
    #[arg(long)]
    namespace: Option<String>,

    /// Config file (defaults to ./coordkit.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a node (missing parents are created)
    Create {
        path: String,

        /// Node data
        #[arg(long)]
        data: Option<String>,

        /// Remove the node when this session ends
        #[arg(long)]
        ephemeral: bool,
    },

    /// Print a node's data
    Get { path: String },

    /// Replace a node's data
    Set {
        path: String,

        /// New data (clears the node when omitted)
        data: Option<String>,
    },

    /// Delete a node and everything below it
    Delete { path: String },

    /// List a node's children
    Ls {
        path: String,

        /// Also print each child's data
        #[arg(long)]
        data: bool,
    },

    /// Register a service instance
    Register {
        service: String,
        port: u16,

        /// Instance id (random UUID if omitted)
        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        address: Option<String>,

        /// URI template, e.g. `{scheme}://{address}:{port}`
        #[arg(long)]
        uri_spec: Option<String>,

        /// Metadata entries as key=value
        #[arg(long = "meta", value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,

        /// Keep the record after this process exits
        #[arg(long = "static")]
        persistent: bool,

        /// Replace an existing record with the same id
        #[arg(long)]
        overwrite: bool,

        /// Publish this weight periodically while running
        #[arg(long)]
        refresh_weight: Option<u64>,

        /// Refresh interval, e.g. `500ms` or `30s` (defaults to the configured one)
        #[arg(long, value_parser = parse_interval)]
        refresh_interval: Option<Duration>,

        #[arg(long)]
        base_path: Option<String>,
    },

    /// Print the instances of a service, or the service names when omitted
    Query {
        service: Option<String>,

        #[arg(long)]
        base_path: Option<String>,
    },

    /// Set an instance's weight
    Weight {
        service: String,
        id: String,
        weight: u64,

        #[arg(long)]
        base_path: Option<String>,
    },

    /// Remove an instance record
    Unregister {
        service: String,
        id: String,

        #[arg(long)]
        base_path: Option<String>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

fn parse_interval(s: &str) -> Result<Duration, String> {
    coordkit::common::parse_duration(s).map_err(|e| e.to_string())
}

fn render(data: Option<&Bytes>) -> String {
    match data {
        Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        None => "<no data>".to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(address) = cli.ensemble {
        config.ensemble.address = address;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let coordinator = coordkit::coordinator::connect(&config).await?;
    let timeout = config.request_timeout();
    let ns = cli.namespace.as_deref();

    let discovery = || {
        let discovery = ServiceDiscovery::new(coordinator.clone(), &config);
        match &cli.namespace {
            Some(namespace) => discovery.with_namespace(namespace.clone()),
            None => discovery,
        }
    };
    let base_or_default =
        |base: Option<String>| base.unwrap_or_else(|| config.discovery.base_path.clone());

    match cli.command {
        Commands::Create {
            path,
            data,
            ephemeral,
        } => {
            let created = coordinator
                .create_node(path, ephemeral, data.map(Bytes::from), ns)
                .wait(timeout)
                .await?;
            println!("Created {}", created);
            if ephemeral {
                println!("Holding session open; Ctrl-C to release");
                tokio::signal::ctrl_c().await?;
            }
        }

        Commands::Get { path } => {
            let data = coordinator.get_data(path, ns).wait(timeout).await?;
            println!("{}", render(data.as_ref()));
        }

        Commands::Set { path, data } => {
            let path = coordinator
                .set_data(path, data.map(Bytes::from), ns)
                .wait(timeout)
                .await?;
            println!("Updated {}", path);
        }

        Commands::Delete { path } => {
            let path = coordinator.delete_node(path, ns).wait(timeout).await?;
            println!("Deleted {}", path);
        }

        Commands::Ls { path, data } => {
            let children = coordinator
                .get_children(path, data, ns)
                .wait(timeout)
                .await?;
            for child in children {
                if data {
                    println!("{}\t{}", child.name, render(child.data.as_ref()));
                } else {
                    println!("{}", child.name);
                }
            }
        }

        Commands::Register {
            service,
            port,
            id,
            address,
            uri_spec,
            metadata,
            persistent,
            overwrite,
            refresh_weight,
            refresh_interval,
            base_path,
        } => {
            let discovery = discovery();
            let mut registration = Registration::new(service, port)
                .base_path(base_or_default(base_path))
                .with_metadata(metadata.into_iter().collect())
                .overwrite(overwrite);
            if let Some(id) = id {
                registration = registration.instance_id(id);
            }
            if let Some(address) = address {
                registration = registration.address(address);
            }
            if let Some(spec) = uri_spec {
                registration = registration.uri_spec(UriSpec::new(spec));
            }
            if persistent {
                registration = registration.service_type(ServiceType::Static);
            }
            if let Some(weight) = refresh_weight {
                let policy = Arc::new(FixedWeight(weight));
                registration = match refresh_interval {
                    Some(interval) => registration.refresh_every(policy, interval),
                    None => registration.refresh_with(policy),
                };
            }

            let instance = discovery.make_discoverable(registration).await?;
            println!("{}", serde_json::to_string_pretty(&instance)?);

            if !persistent || refresh_weight.is_some() {
                println!("Registered; Ctrl-C to stop");
                tokio::signal::ctrl_c().await?;
            }
            discovery.close().await;
        }

        Commands::Query { service, base_path } => {
            let discovery = discovery();
            let base_path = base_or_default(base_path);
            match service {
                Some(service) => {
                    let instances = discovery.query_for_instances(&base_path, &service).await?;
                    println!("{} instance(s) of {}:", instances.len(), service);
                    for instance in instances {
                        let endpoint = instance.build_uri().unwrap_or_else(|| {
                            format!(
                                "{}:{}",
                                instance.address.as_deref().unwrap_or("-"),
                                instance.port
                            )
                        });
                        println!("  {}  weight={}  {}", instance.id, instance.weight, endpoint);
                    }
                }
                None => {
                    for name in discovery.query_for_names(&base_path).await? {
                        println!("{}", name);
                    }
                }
            }
        }

        Commands::Weight {
            service,
            id,
            weight,
            base_path,
        } => {
            let instance = discovery()
                .update_weight(weight, &base_or_default(base_path), &service, &id)
                .await?;
            println!("{} weight={}", instance.id, instance.weight);
        }

        Commands::Unregister {
            service,
            id,
            base_path,
        } => {
            discovery()
                .unregister(&base_or_default(base_path), &service, &id)
                .await?;
            println!("Unregistered {}/{}", service, id);
        }
    }

    coordinator.close().wait(timeout).await?;
    Ok(())
}
