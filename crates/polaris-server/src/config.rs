//! Runtime configuration for the rendezvous service.

use polaris_core::constants;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tunables of the rendezvous daemon. All fields have sensible defaults;
/// a config file only needs to name what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolarisConfig {
    /// TCP address the discovery protocol listens on.
    pub listen_addr: String,
    /// TCP address of the administrative JSON-RPC endpoint. Empty disables it.
    pub rpc_addr: String,
    /// Directory holding the node key and the persisted deny list.
    pub auth_dir: Option<PathBuf>,
    /// Whether the deny list is enforced.
    pub enable_deny_list: bool,
    /// Register peers whose primary advertised address is a private IP.
    /// Off for public deployments; useful for closed test networks.
    pub allow_private: bool,
    /// Upper bound on addresses returned per query.
    pub max_response_peers: usize,
    /// Pause between writing a reply and closing the stream.
    pub msg_send_delay: Duration,
    /// How often the health-check loop wakes up.
    pub check_period: Duration,
    /// Records unchecked for longer than this get probed.
    pub stale_interval: Duration,
    /// TTL for outbound connections (connect-back probes).
    pub connection_ttl: Duration,
    /// TTL for a single ping exchange.
    pub ping_ttl: Duration,
    /// Concurrent health-check probes.
    pub health_workers: usize,
    /// Consecutive ping failures before eviction.
    pub fail_threshold: u32,
}

impl Default for PolarisConfig {
    fn default() -> Self {
        PolarisConfig {
            listen_addr: format!("0.0.0.0:{}", constants::DEFAULT_LISTEN_PORT),
            rpc_addr: format!("127.0.0.1:{}", constants::DEFAULT_RPC_PORT),
            auth_dir: None,
            enable_deny_list: false,
            allow_private: false,
            max_response_peers: constants::RESPONSE_MAX_PEER_LIMIT,
            msg_send_delay: constants::MSG_SEND_DELAY,
            check_period: constants::CHECK_PERIOD,
            stale_interval: constants::PEER_HEALTHCHECK_INTERVAL,
            connection_ttl: constants::POLARIS_CONNECTION_TTL,
            ping_ttl: constants::POLARIS_PING_TTL,
            health_workers: constants::CONCURRENT_HEALTH_CHECK_COUNT,
            fail_threshold: constants::FAIL_THRESHOLD,
        }
    }
}
