//! Plexus control plane node binary.
//!
//! Loads configuration, opens the RocksDB blocklist, starts the control plane
//! and the operator JSON-RPC server, then runs until Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use plexus_node_lib::node::now_ms;
use plexus_node_lib::{ControlCommand, ControlPlane, NodeConfig, RocksBlocklistStore, start_rpc_server};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// How long shutdown waits for queued blocklist writes.
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

const TRANSPORT_EVENT_BUFFER: usize = 1024;

/// Plexus peer-mesh control plane.
#[derive(Parser, Debug)]
#[command(
    name = "plexus-node",
    version,
    about = "Plexus peer-mesh control plane with blocklist persistence and JSON-RPC"
)]
struct Args {
    /// TOML configuration file, layered under PLEXUS_* environment variables
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for the blocklist database
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// RPC server bind address
    #[arg(long)]
    rpc_bind: Option<String>,

    /// RPC server port
    #[arg(long)]
    rpc_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Start from the public test mesh preset instead of mainnet defaults.
    ///
    /// Uses a separate data directory, RPC port and beacon list.
    #[arg(long)]
    testnet: bool,
}

impl Args {
    /// Layer defaults, file, environment and command-line flags.
    fn load_config(&self) -> anyhow::Result<NodeConfig> {
        let base = if self.testnet { NodeConfig::testnet() } else { NodeConfig::default() };
        let mut builder = NodeConfig::builder(&base, self.config.as_deref())?;

        if let Some(dir) = &self.data_dir {
            builder = builder.set_override("data_dir", dir.to_string_lossy().into_owned())?;
        }
        if let Some(bind) = &self.rpc_bind {
            builder = builder.set_override("rpc_bind", bind.clone())?;
        }
        if let Some(port) = self.rpc_port {
            builder = builder.set_override("rpc_port", port)?;
        }
        if let Some(level) = &self.log_level {
            builder = builder.set_override("log_level", level.clone())?;
        }

        Ok(NodeConfig::from_builder(builder)?)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = match args.load_config() {
        Ok(c) => c,
        Err(e) => {
            // Logging is not up yet.
            eprintln!("plexus-node: invalid configuration: {e:#}");
            std::process::exit(2);
        }
    };

    init_logging(&config.log_level, &args.log_format);

    if let Err(e) = run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run(config: NodeConfig) -> anyhow::Result<()> {
    info!("Plexus Node v{}", env!("CARGO_PKG_VERSION"));
    info!("data_dir: {:?}", config.data_dir);
    info!("rpc_addr: {}", config.rpc_addr());
    info!("community: {}", config.mesh.rendezvous.community);
    info!("beacons: {:?}", config.mesh.rendezvous.beacons);

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data_dir {}", config.data_dir.display()))?;

    let store = RocksBlocklistStore::open(config.blocklist_db_path()).context("failed to open blocklist database")?;
    let (plane, mut channels) = ControlPlane::open(config.mesh.clone(), Arc::new(store), now_ms())
        .await
        .context("failed to start control plane")?;
    let blocked = plane.blocklist();
    info!(
        all = blocked.all.len(),
        inbound = blocked.inbound.len(),
        outbound = blocked.outbound.len(),
        "control plane initialized"
    );

    let rpc_handle = start_rpc_server(&config.rpc_addr(), Arc::clone(&plane))
        .await
        .context("failed to start RPC server")?;
    info!("RPC server listening on {}", config.rpc_addr());

    // No transport is attached in this binary. The node holds the sender so the
    // event loop stays up until shutdown; until a transport feeds events here,
    // every rendezvous round times out and the mesh auto-disables once the
    // failure streak reaches its ceiling.
    let (events_tx, events_rx) = mpsc::channel(TRANSPORT_EVENT_BUFFER);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let loop_plane = Arc::clone(&plane);
    let event_loop = tokio::spawn(async move { loop_plane.run(events_rx, shutdown_rx).await });

    // Commands and accepted messages are only logged until a transport and
    // application consume them.
    let command_log = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(cmd) = channels.commands.recv() => match cmd {
                    ControlCommand::StartRendezvousRound => info!("command: start rendezvous round"),
                    ControlCommand::Disconnect { peer, reason } => info!(%peer, %reason, "command: disconnect"),
                },
                Some((peer, msg)) = channels.messages.recv() => {
                    debug!(%peer, kind = msg.kind().as_str(), "message: accepted");
                }
                else => break,
            }
        }
    });

    info!("Plexus node running (Ctrl+C to stop)");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl+C: {e}");
    }
    info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    drop(events_tx);
    if let Err(e) = event_loop.await {
        warn!("event loop task failed: {e}");
    }
    command_log.abort();

    if plane.flush_persistence(SHUTDOWN_FLUSH_TIMEOUT).await {
        info!("blocklist writes flushed");
    } else {
        warn!(pending = plane.persistence_status().pending_writes, "blocklist writes still pending at shutdown");
    }

    rpc_handle.stop().ok();
    info!("RPC server stopped");
    info!("Plexus node shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output. Any other value
/// defaults to human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry().with(filter).with(fmt::layer().json()).init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
