mod args;
mod bootstrap;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bmnode_network::{i2p::I2pController, listener, Manager, NetworkConfig, PeerAddr, State};

use args::Args;

fn default_data_dir() -> Result<PathBuf> {
    match std::env::var_os("HOME") {
        Some(home) => Ok(PathBuf::from(home).join(".bmnode")),
        None => bail!("cannot determine the home directory, pass --data-dir"),
    }
}

/// `HOST[:PORT]`, defaulting to the standard port.
fn parse_trusted_peer(value: &str) -> PeerAddr {
    // A bare IPv6 address is a host, not a host:port pair
    if value.parse::<std::net::IpAddr>().is_ok() {
        return PeerAddr::ip(value, bmnode_network::config::DEFAULT_PORT);
    }
    match value.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => match port.parse::<u16>() {
            Ok(port) => PeerAddr::ip(host, port),
            Err(_) => PeerAddr::ip(value, bmnode_network::config::DEFAULT_PORT),
        },
        _ => PeerAddr::ip(value, bmnode_network::config::DEFAULT_PORT),
    }
}

fn build_config(args: &Args) -> Result<NetworkConfig> {
    let data_dir = match &args.data_dir {
        Some(dir) => dir.clone(),
        None => default_data_dir()?,
    };
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("cannot create data directory {}", data_dir.display()))?;

    let mut config = NetworkConfig {
        data_dir,
        listen_port: args.port,
        listen: !args.no_incoming,
        ip_enabled: !args.no_ip,
        send_outgoing: !args.no_outgoing,
        connection_limit: args.connection_limit,
        trusted_peer: args.trusted_peer.as_deref().map(parse_trusted_peer),
        ..NetworkConfig::default()
    };
    config.i2p.enabled = args.i2p;
    config.i2p.sam_host = args.i2p_sam_host.clone();
    config.i2p.sam_port = args.i2p_sam_port;
    config.i2p.transient = args.i2p_transient;

    if !config.ip_enabled && !config.i2p.enabled {
        bail!("--no-ip without --i2p leaves no transport to use");
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;
    info!(
        "starting bmnode {} (stream {}, data in {})",
        env!("CARGO_PKG_VERSION"),
        config.stream,
        config.data_dir.display()
    );

    let ip_enabled = config.ip_enabled;
    let listen = config.listen && ip_enabled;
    let i2p_enabled = config.i2p.enabled;
    let state = State::new(config);

    state.pools.write().load_core_nodes(
        include_str!("../core_nodes.csv"),
        include_str!("../i2p_core_nodes.csv"),
    );

    if ip_enabled && state.config.trusted_peer.is_none() {
        bootstrap::bootstrap_from_dns(&state).await;
    }

    if listen {
        let _listener = listener::spawn(state.clone())
            .await
            .context("cannot bind the listening socket")?;
    }

    if i2p_enabled {
        match I2pController::new(state.clone()).start().await {
            Ok(_session_task) => {
                let _ = bmnode_network::i2p::listener::spawn(state.clone());
            }
            Err(e) => {
                // The IP overlay still works without the bridge
                warn!("i2p is enabled but the SAM session failed: {}", e);
                if !ip_enabled {
                    bail!("no transport available: {}", e);
                }
            }
        }
    }

    let manager = tokio::spawn(Manager::new(state.clone()).run());

    wait_for_shutdown().await;
    info!("shutting down");
    state.shutdown();

    // Give workers a grace window to notice the flag and drain; the
    // manager persists once more on its way out
    let _ = tokio::time::timeout(Duration::from_secs(3), manager).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!("cannot install the SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
