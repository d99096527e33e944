//! `mesh`: run a socket-bridge node from the command line.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use mesh_core::{Messenger, logging};
use mesh_network::{MeshNode, NetworkConfig};

#[derive(Parser)]
#[command(name = "mesh")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Relay local pub/sub topics across a TCP mesh", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Mesh server address (listen address for the hub, dial target for everyone)
    #[arg(short, long, env = "MESH_SERVER")]
    server: Option<String>,

    /// Do not listen, only connect upstream
    #[arg(short, long)]
    client: bool,

    /// Node name included in topology reports
    #[arg(short, long, env = "MESH_NAME")]
    name: Option<String>,

    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective config (file plus flags) to this path before starting
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Also write logs to a daily-rolling file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a bridge node until Ctrl-C
    Node,
    /// Run a node and publish a counter on a topic
    Pub {
        #[arg(short, long)]
        topic: String,
        /// Seconds between samples
        #[arg(short, long, default_value = "1")]
        interval: f64,
    },
    /// Run a node and print every sample received on a topic
    Sub {
        #[arg(short, long)]
        topic: String,
    },
}

impl Cli {
    fn network_config(&self) -> NetworkConfig {
        let mut config = match &self.config {
            Some(path) => NetworkConfig::load_or_default(path),
            None => NetworkConfig::default(),
        };
        if let Some(server) = &self.server {
            config.server = server.clone();
        }
        if self.client {
            config.client_only = true;
        }
        if self.name.is_some() {
            config.name = self.name.clone();
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug,mesh_network=debug,mesh_app=debug"
    } else {
        logging::DEFAULT_FILTER
    };
    let _log_guard = match &cli.log_dir {
        Some(dir) => Some(logging::init_logging_to_dir(dir, filter)?),
        None => {
            logging::init_logging(filter)?;
            None
        }
    };

    let config = cli.network_config().normalized();
    if let Some(path) = &cli.save_config {
        config
            .save_to_file(path)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Failed to save config to {}", path.display()))?;
        info!("Saved config to {}", path.display());
    }

    let messenger = Messenger::new();
    let mut node = MeshNode::new(config.clone(), messenger.clone());
    node.start()
        .await
        .with_context(|| format!("Failed to start mesh node on {}", config.server))?;

    match cli.command {
        Commands::Node => wait_for_ctrl_c().await?,
        Commands::Pub { topic, interval } => {
            let period = Duration::try_from_secs_f64(interval)
                .with_context(|| format!("Invalid interval {interval}"))?;
            run_publisher(&messenger, &topic, period).await?;
        }
        Commands::Sub { topic } => {
            let _subscriber = messenger.subscribe(&topic, "", 1, |sample| {
                println!("{:?} {}", sample.origin, sample.value);
            });
            info!("Subscribed to '{topic}'");
            wait_for_ctrl_c().await?;
        }
    }

    node.stop();
    Ok(())
}

async fn run_publisher(messenger: &Messenger, topic: &str, period: Duration) -> Result<()> {
    let publisher = messenger.advertise(topic, "int");
    let mut ticker = tokio::time::interval(period);
    let mut counter: i64 = 0;
    info!("Publishing on '{topic}' every {period:?}");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                publisher.publish(counter);
                counter += 1;
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                return Ok(());
            }
        }
    }
}

async fn wait_for_ctrl_c() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    Ok(())
}
