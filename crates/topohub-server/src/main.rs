//! Topohub Server - topology hub process
//!
//! Loads configuration, starts the hub and runs until Ctrl-C.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use topohub_server::{Hub, HubConfig, api};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Topohub server CLI arguments
#[derive(Parser, Debug)]
#[command(name = "topohub-server")]
#[command(about = "Topology hub with full-mesh replication", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Config file (defaults to config/topohub.toml when present)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Hub identity
    #[arg(long)]
    host_id: Option<String>,

    /// HTTP API bind address
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Peer replication address, repeatable; replaces configured peers
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Keep the graph in LMDB under this directory
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut HubConfig) {
        if let Some(host_id) = &self.host_id {
            config.host_id = host_id.clone();
        }
        if let Some(addr) = self.http_addr {
            config.http_addr = addr;
        }
        if !self.peers.is_empty() {
            config.peers = self.peers.clone();
        }
        if let Some(data_dir) = &self.data_dir {
            config.use_data_dir(data_dir.clone());
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let worker_threads = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(2, 16);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .thread_name("topohub-worker")
        .enable_all()
        .build()?;

    let default_filter = if args.verbose {
        "topohub_server=debug,topohub_core=debug,tower_http=debug"
    } else {
        "topohub_server=info,topohub_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Configured Tokio runtime: {} worker threads", worker_threads);

    rt.block_on(async_main(args))
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    let mut config = HubConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    api::health::init();

    let hub = Arc::new(Hub::new(config)?);
    let addrs = hub.start().await?;
    info!("Hub ready, HTTP API at http://{}", addrs.http);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    hub.stop().await;
    info!("Hub stopped");
    Ok(())
}
