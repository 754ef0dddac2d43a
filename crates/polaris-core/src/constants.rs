//! Protocol-wide constants for Polaris.

use std::time::Duration;

/// Stream protocol tag for discovery queries.
pub const MAP_PROTOCOL: &str = "/polaris/0.2";

/// Stream protocol tag for liveness pings.
pub const PING_PROTOCOL: &str = "/ping/0.2";

/// Maximum number of peer addresses returned for a single query.
pub const RESPONSE_MAX_PEER_LIMIT: usize = 500;

/// TTL for outbound rendezvous connections.
pub const POLARIS_CONNECTION_TTL: Duration = Duration::from_secs(30);

/// TTL for a single ping exchange (half the connection TTL).
pub const POLARIS_PING_TTL: Duration = Duration::from_secs(15);

/// How often the health-check loop wakes up.
pub const CHECK_PERIOD: Duration = Duration::from_secs(60);

/// Registry records unchecked for longer than this get probed.
pub const PEER_HEALTHCHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound on concurrently running health-check probes.
pub const CONCURRENT_HEALTH_CHECK_COUNT: usize = 20;

/// Consecutive ping failures before a record is evicted.
pub const FAIL_THRESHOLD: u32 = 1;

/// Default TCP port of the rendezvous service. 89.15 is the floor of the
/// declination of the star Polaris.
pub const DEFAULT_LISTEN_PORT: u16 = 8915;

/// Default TCP port of the administrative JSON-RPC endpoint.
pub const DEFAULT_RPC_PORT: u16 = 8916;

/// Pause between writing the last response frame and closing the stream,
/// so a slow transport can drain its send buffer. May be zero when the
/// transport flushes on close.
pub const MSG_SEND_DELAY: Duration = Duration::from_secs(3);
