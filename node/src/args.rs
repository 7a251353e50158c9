use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments for the bmnode binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "bmnode",
    version = env!("CARGO_PKG_VERSION"),
    about = "A lightweight node for a Bitmessage-style anonymous messaging overlay"
)]
pub struct Args {
    /// Directory for persisted objects, peers and the I2P key
    #[arg(long = "data-dir", value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Hard cap on concurrent connections
    #[arg(long = "connection-limit", value_name = "N", default_value_t = 250)]
    pub connection_limit: usize,

    /// Connect only to this peer (HOST[:PORT])
    #[arg(long = "trusted-peer", value_name = "HOST[:PORT]")]
    pub trusted_peer: Option<String>,

    /// Do not listen for incoming connections
    #[arg(long = "no-incoming")]
    pub no_incoming: bool,

    /// Do not open outgoing connections
    #[arg(long = "no-outgoing")]
    pub no_outgoing: bool,

    /// Do not use the IP transport at all
    #[arg(long = "no-ip")]
    pub no_ip: bool,

    /// TCP listening port
    #[arg(short = 'p', long = "port", value_name = "PORT", default_value_t = 8444)]
    pub port: u16,

    /// Enable the I2P transport
    #[arg(long = "i2p")]
    pub i2p: bool,

    /// SAM bridge host
    #[arg(long = "i2p-sam-host", value_name = "HOST", default_value = "127.0.0.1")]
    pub i2p_sam_host: String,

    /// SAM bridge port
    #[arg(long = "i2p-sam-port", value_name = "PORT", default_value_t = 7656)]
    pub i2p_sam_port: u16,

    /// Use a throwaway I2P destination instead of the persisted key
    #[arg(long = "i2p-transient")]
    pub i2p_transient: bool,
}
