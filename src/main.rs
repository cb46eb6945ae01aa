//! WolfMesh - WireGuard Mesh Membership Client
//!
//! Keeps this node's WireGuard peers in sync with the mesh directory.

use std::io::Write;
use std::net::IpAddr;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ipnet::IpNet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfmesh::config::WolfMeshConfig;
use wolfmesh::control::{IpTool, TunnelControl, WgTool};
use wolfmesh::directory::DirectoryClient;
use wolfmesh::keys::{PresharedKey, PrivateKey, PublicKey};
use wolfmesh::lifecycle::MeshClient;
use wolfmesh::overlay;

/// WolfMesh - WireGuard Mesh Membership Client
#[derive(Parser)]
#[command(name = "wolfmesh")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/wolfmesh/wolfmesh.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring up the interface and keep peers in sync until interrupted
    Run,

    /// Generate a new private key
    Genkey {
        /// Write the key to this file (mode 0600) instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the public key of the configured private key
    Pubkey,

    /// Generate a new preshared key
    Genpsk,

    /// Show the overlay address a public key derives to
    Address {
        /// Base64 public key
        public_key: PublicKey,

        /// Mesh prefix (defaults to the configured one)
        #[arg(long)]
        net: Option<IpNet>,
    },

    /// List the peers currently configured on the interface
    Peers,

    /// Initialize a new configuration file with a fresh private key
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfmesh.toml")]
        output: PathBuf,

        /// Directory node's public key
        #[arg(long)]
        directory_key: PublicKey,

        /// Directory node's public address
        #[arg(long)]
        directory_address: IpAddr,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't need a config still pick up its log level if one exists
    let config = WolfMeshConfig::from_file(&cli.config);
    let level = cli
        .log_level
        .clone()
        .or_else(|| config.as_ref().ok().map(|c| c.logging.level.clone()))
        .unwrap_or_else(|| "info".to_string());
    init_logging(&level);

    let load = || config.with_context(|| format!("Failed to load configuration from {}", cli.config.display()));

    match cli.command {
        Commands::Run => run_client(load()?).await,
        Commands::Genkey { output } => run_genkey(output.as_deref()),
        Commands::Pubkey => run_pubkey(&load()?),
        Commands::Genpsk => {
            println!("{}", PresharedKey::generate().to_base64());
            Ok(())
        }
        Commands::Address { public_key, net } => {
            let net = match net {
                Some(net) => net,
                None => load()?.node.overlay_net,
            };
            println!("{}", overlay::derive(&net, &public_key));
            Ok(())
        }
        Commands::Peers => run_peers(&load()?).await,
        Commands::Init {
            output,
            directory_key,
            directory_address,
        } => run_init(&output, &directory_key, directory_address),
        Commands::Validate => run_validate(load()?),
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Run the mesh client until SIGINT or SIGTERM
async fn run_client(config: WolfMeshConfig) -> anyhow::Result<()> {
    if !nix::unistd::geteuid().is_root() {
        tracing::warn!("Not running as root; interface setup will likely fail");
    }

    let node = Arc::new(config.local_node()?);
    tracing::info!(
        "Starting WolfMesh on {} (pubkey {}, overlay {})",
        node.interface,
        node.public_key,
        node.overlay_addr
    );

    let directory_address = config.directory_http_address();
    let directory = Arc::new(DirectoryClient::new(directory_address, config.fetch_timeout())?);
    tracing::info!("Peer list served at {}", directory.address());

    let tunnel = Arc::new(WgTool::new());
    let link = Arc::new(IpTool::new());
    let mut client = MeshClient::new(
        node,
        tunnel,
        link,
        directory,
        config.directory_peer(),
        config.directory.preshared_key,
    );

    client
        .bring_up()
        .await
        .context("Could not bring up interface")?;

    if let Err(e) = client.bootstrap().await {
        tracing::error!("Could not add directory peer: {}", e);
        if let Err(down) = client.tear_down().await {
            tracing::error!("Could not remove interface: {}", down);
        }
        return Err(e).context("Bootstrap failed");
    }

    client.run(shutdown_signal()).await?;

    // Shutdown completes either way
    match client.tear_down().await {
        Ok(()) => tracing::info!("Shutdown complete"),
        Err(e) => tracing::error!("Could not remove interface: {}", e),
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Generate a private key
fn run_genkey(output: Option<&Path>) -> anyhow::Result<()> {
    let key = PrivateKey::generate();
    match output {
        Some(path) => {
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            writeln!(file, "{}", key.to_base64())?;
            println!("Private key saved to: {}", path.display());
            println!("Public key: {}", key.public_key());
        }
        None => println!("{}", key.to_base64()),
    }
    Ok(())
}

/// Print the public key of the configured private key
fn run_pubkey(config: &WolfMeshConfig) -> anyhow::Result<()> {
    println!("{}", config.private_key()?.public_key());
    Ok(())
}

/// List the interface's peers as the device reports them
async fn run_peers(config: &WolfMeshConfig) -> anyhow::Result<()> {
    let iface = &config.node.interface;
    let peers = WgTool::new()
        .device_peers(iface)
        .await
        .with_context(|| format!("Could not read peers of {}", iface))?;

    if peers.is_empty() {
        println!("No peers configured on {}", iface);
        return Ok(());
    }

    println!("{:<46} {:<20} {:<24} {}", "PUBLIC KEY", "OVERLAY", "ENDPOINT", "HANDSHAKE");
    for peer in &peers {
        let endpoint = peer
            .endpoint
            .map(|e| e.to_string())
            .unwrap_or_else(|| "(none)".to_string());
        let handshake = peer
            .latest_handshake
            .map(|t| t.to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<46} {:<20} {:<24} {}",
            peer.public_key.to_string(),
            overlay::derive(&config.node.overlay_net, &peer.public_key).to_string(),
            endpoint,
            handshake
        );
    }
    Ok(())
}

/// Write a starter configuration with a freshly generated key
fn run_init(output: &Path, directory_key: &PublicKey, directory_address: IpAddr) -> anyhow::Result<()> {
    if output.exists() {
        bail!("{} already exists", output.display());
    }

    let key = PrivateKey::generate();
    let config_content = format!(
        r#"# WolfMesh Configuration
# Generated configuration file

[node]
interface = "wgmesh0"
private_key = "{private_key}"
# listen_port = 51820
overlay_net = "10.0.0.0/8"
mtu = 1280

[directory]
public_key = "{directory_key}"
address = "{directory_address}"
port = 51820
# http_port = 51820
# preshared_key = ""
timeout_secs = 11

[logging]
level = "info"
"#,
        private_key = key.to_base64(),
    );

    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(output)
        .and_then(|mut f| f.write_all(config_content.as_bytes()))
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Configuration file created: {}", output.display());
    println!("Public key: {}", key.public_key());
    println!("Then start with: wolfmesh --config {} run", output.display());
    Ok(())
}

/// Validate configuration
fn run_validate(config: WolfMeshConfig) -> anyhow::Result<()> {
    let node = config.local_node()?;
    println!("✓ Configuration is valid");
    println!("  Interface:      {}", node.interface);
    println!("  Public Key:     {}", node.public_key);
    println!("  Overlay:        {} in {}", node.overlay_addr, node.overlay_net);
    println!("  MTU:            {}", node.mtu);
    println!(
        "  Directory:      {}:{} ({})",
        config.directory.address, config.directory.port, config.directory.public_key
    );
    println!("  Peer List:      http://{}/", config.directory_http_address());
    println!(
        "  Preshared Key:  {}",
        if config.directory.preshared_key.is_some() { "set" } else { "none" }
    );
    Ok(())
}
