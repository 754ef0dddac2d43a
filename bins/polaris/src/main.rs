//! Polaris rendezvous daemon.
//!
//! Binds the discovery transport, loads the node identity and deny list,
//! starts the service and the administrative JSON-RPC endpoint, and runs
//! until interrupted.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::Parser;
use libp2p::identity::Keypair;
use serde::Deserialize;
use tracing::{error, info};

use polaris_core::{ChainId, ChainIdProvider, ForkSchedule, HostInfo};
use polaris_server::rpc::start_admin_rpc;
use polaris_server::{ListManager, PolarisConfig, PolarisService, TcpTransport};

/// Polaris — chain-scoped peer rendezvous for blockchain networks.
#[derive(Parser, Debug)]
#[command(name = "polaris", version, about = "Peer-discovery rendezvous server")]
struct Args {
    /// Optional JSON config file; CLI flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the node key and deny list
    #[arg(long)]
    auth_dir: Option<PathBuf>,

    /// Genesis description file defining the chain identity
    #[arg(long)]
    genesis: Option<PathBuf>,

    /// Discovery listen address
    #[arg(long)]
    listen_addr: Option<String>,

    /// Admin JSON-RPC address ("" to disable)
    #[arg(long)]
    rpc_addr: Option<String>,

    /// Enforce the deny list
    #[arg(long)]
    enable_blacklist: bool,

    /// Register peers advertising private addresses (closed networks)
    #[arg(long)]
    allow_private: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,
}

/// On-disk genesis description: the chain identity plus an optional
/// hard-fork schedule of `[height, version]` pairs.
#[derive(Debug, Deserialize)]
struct GenesisFile {
    #[serde(flatten)]
    chain_id: ChainId,
    #[serde(default)]
    forks: Vec<(u64, i32)>,
}

fn load_config(args: &Args) -> Result<PolarisConfig, String> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read config '{}': {e}", path.display()))?;
            serde_json::from_str(&text)
                .map_err(|e| format!("cannot parse config '{}': {e}", path.display()))?
        }
        None => PolarisConfig::default(),
    };
    if let Some(listen) = &args.listen_addr {
        config.listen_addr = listen.clone();
    }
    if let Some(rpc) = &args.rpc_addr {
        config.rpc_addr = rpc.clone();
    }
    if args.enable_blacklist {
        config.enable_deny_list = true;
    }
    if args.allow_private {
        config.allow_private = true;
    }
    if config.auth_dir.is_none() {
        config.auth_dir = args.auth_dir.clone().or_else(|| {
            dirs::data_dir().map(|d| d.join("polaris"))
        });
    }
    Ok(config)
}

fn load_chain(args: &Args) -> Result<Arc<dyn ChainIdProvider>, String> {
    match &args.genesis {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read genesis '{}': {e}", path.display()))?;
            let genesis: GenesisFile = serde_json::from_str(&text)
                .map_err(|e| format!("cannot parse genesis '{}': {e}", path.display()))?;
            if genesis.forks.is_empty() {
                Ok(Arc::new(genesis.chain_id))
            } else {
                Ok(Arc::new(ForkSchedule::new(genesis.chain_id, genesis.forks)))
            }
        }
        // Local development identity; real deployments pass --genesis.
        None => Ok(Arc::new(ChainId {
            magic: "dev.chain".to_string(),
            public: false,
            mainnet: false,
            consensus: "sbp".to_string(),
            version: 1,
        })),
    }
}

/// Load the Ed25519 node key, or generate and persist one. The file holds
/// the raw 32-byte secret so the peer id survives restarts.
fn load_or_generate_keypair(path: &Path) -> Result<Keypair, String> {
    if path.exists() {
        let bytes = std::fs::read(path)
            .map_err(|e| format!("cannot read node key '{}': {e}", path.display()))?;
        let keypair = Keypair::ed25519_from_bytes(bytes)
            .map_err(|e| format!("invalid node key in '{}': {e}", path.display()))?;
        info!(path = %path.display(), "loaded node identity key");
        Ok(keypair)
    } else {
        let keypair = Keypair::generate_ed25519();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create '{}': {e}", parent.display()))?;
        }
        let ed = keypair
            .clone()
            .try_into_ed25519()
            .map_err(|e| format!("keypair is not Ed25519: {e}"))?;
        std::fs::write(path, ed.secret().as_ref())
            .map_err(|e| format!("cannot write node key '{}': {e}", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| format!("cannot chmod '{}': {e}", path.display()))?;
        }
        info!(path = %path.display(), "generated new node identity key");
        Ok(keypair)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.log_level, &args.log_format);

    info!("Polaris rendezvous v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };
    let chain = match load_chain(&args) {
        Ok(chain) => chain,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    let auth_dir = config.auth_dir.clone();
    if let Some(dir) = &auth_dir {
        if let Err(e) = std::fs::create_dir_all(dir) {
            error!("cannot create auth dir '{}': {e}", dir.display());
            process::exit(1);
        }
    }

    let keypair = match auth_dir
        .as_ref()
        .map(|d| load_or_generate_keypair(&d.join("node.key")))
        .unwrap_or_else(|| Ok(Keypair::generate_ed25519()))
    {
        Ok(keypair) => keypair,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };
    let host = HostInfo::new(keypair, format!("v{}", env!("CARGO_PKG_VERSION")));
    info!(id = %host.id(), "node identity ready");

    let listen: SocketAddr = match config.listen_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid listen_addr '{}': {e}", config.listen_addr);
            process::exit(1);
        }
    };
    let transport = match TcpTransport::bind(host.clone(), listen).await {
        Ok(transport) => transport,
        Err(e) => {
            error!("cannot bind '{listen}': {e}");
            process::exit(1);
        }
    };

    let deny_list = Arc::new(ListManager::load(
        auth_dir.as_deref(),
        config.enable_deny_list,
    ));
    let rpc_addr = config.rpc_addr.clone();
    let service = PolarisService::new(host, config, chain, transport.clone(), deny_list);
    Arc::clone(&service).start();

    let rpc_handle = if rpc_addr.is_empty() {
        None
    } else {
        match start_admin_rpc(&rpc_addr, Arc::clone(&service)).await {
            Ok(handle) => {
                info!("admin RPC listening on {rpc_addr}");
                Some(handle)
            }
            Err(e) => {
                error!("cannot start admin RPC on '{rpc_addr}': {e}");
                process::exit(1);
            }
        }
    };

    info!("Polaris running (Ctrl+C to stop)");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("cannot install Ctrl+C handler: {e}");
    }
    info!("shutting down");

    service.stop().await;
    transport.shutdown();
    if let Some(handle) = rpc_handle {
        handle.stop().ok();
    }
    info!("shutdown complete");
}

/// Initialize the tracing subscriber. `format = "json"` gives structured
/// output for log pipelines; anything else is human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
