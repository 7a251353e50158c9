//! DNS bootstrap.

use std::sync::Arc;

use bmnode_network::{PeerAddr, State};
use tracing::{debug, warn};

/// Well-known seed names resolved once at startup
const DNS_SEEDS: [&str; 2] = [
    "bootstrap8444.bitmessage.org:8444",
    "bootstrap8080.bitmessage.org:8080",
];

/// Resolves the seed hostnames and feeds every `(host, port)` candidate
/// into the unchecked node pool. Resolution failures are tolerable: the
/// compiled-in seed list still covers the first connection.
pub async fn bootstrap_from_dns(state: &Arc<State>) {
    for seed in DNS_SEEDS {
        match tokio::net::lookup_host(seed).await {
            Ok(addrs) => {
                let mut pools = state.pools.write();
                for addr in addrs {
                    debug!("dns seed candidate {}", addr);
                    pools.add_unchecked(PeerAddr::ip(addr.ip().to_string(), addr.port()));
                }
            }
            Err(e) => warn!("error resolving {}: {}", seed, e),
        }
    }
}
