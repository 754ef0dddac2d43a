//! Wire payload types for the Polaris discovery protocol.
//!
//! Payloads are serialized with bincode; decoding ignores trailing bytes
//! so that newer senders can append fields without breaking older readers.

/// 4-byte message-kind tag carried in every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SubProtocol {
    /// Handshake / stream-hello status exchange.
    Status = 0x01,
    /// Liveness ping request.
    Ping = 0x02,
    /// Liveness ping reply.
    PingResponse = 0x03,
    /// Close notice sent before dropping a stream on protocol errors.
    GoAway = 0x04,
    /// Discovery query.
    MapQuery = 0x0100,
    /// Discovery reply.
    MapResponse = 0x0101,
}

impl SubProtocol {
    /// Decode a header tag; `None` for codes this build does not know.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0x01 => Some(SubProtocol::Status),
            0x02 => Some(SubProtocol::Ping),
            0x03 => Some(SubProtocol::PingResponse),
            0x04 => Some(SubProtocol::GoAway),
            0x0100 => Some(SubProtocol::MapQuery),
            0x0101 => Some(SubProtocol::MapResponse),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl std::fmt::Display for SubProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SubProtocol::Status => "Status",
            SubProtocol::Ping => "Ping",
            SubProtocol::PingResponse => "PingResponse",
            SubProtocol::GoAway => "GoAway",
            SubProtocol::MapQuery => "MapQuery",
            SubProtocol::MapResponse => "MapResponse",
        };
        f.write_str(name)
    }
}

/// Wire form of a peer's self-description.
///
/// `addresses` holds multiaddr strings, primary first. The top-level
/// `address`/`port` pair is the legacy single-address form; the server
/// accepts either and upgrades legacy senders.
#[derive(Debug, Clone, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct PeerAddress {
    /// Legacy single host (IP or DNS name). Empty when `addresses` is set.
    pub address: String,
    /// Legacy TCP port, paired with `address`.
    pub port: u32,
    /// Raw peer-id bytes as produced by the transport.
    pub peer_id: Vec<u8>,
    /// Multiaddr strings; index 0 is the primary advertised address.
    pub addresses: Vec<String>,
    /// Node software version string.
    pub version: String,
    /// Peer role, see [`crate::meta::PeerRole`].
    pub role: u32,
    /// Hidden peers are registered but never handed out in samples.
    pub hidden: bool,
    /// Producer ids this peer acts as agent for.
    pub producer_ids: Vec<Vec<u8>>,
}

/// Self-reported state sent along with a discovery query.
#[derive(Debug, Clone, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Status {
    pub sender: Option<PeerAddress>,
    /// Serialized chain identity, compared byte-semantically by the gate.
    pub chain_id: Vec<u8>,
    pub best_block_hash: Vec<u8>,
    pub best_height: u64,
    /// Set by callers that do not want to be exposed to other peers.
    pub no_expose: bool,
    pub version: String,
    pub genesis: Vec<u8>,
}

/// Discovery request payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct MapQuery {
    pub status: Option<Status>,
    /// Request registration of the sender in the live registry.
    pub add_me: bool,
    /// Upper bound on the number of addresses wanted in the reply.
    pub size: i32,
    /// Peer ids the caller already knows and does not want again.
    pub excludes: Vec<Vec<u8>>,
}

/// Outcome code of a discovery reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum ResultStatus {
    #[default]
    Ok,
    InvalidArgument,
    Unauthenticated,
    FailedPrecondition,
}

/// Discovery reply payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct MapResponse {
    pub status: ResultStatus,
    pub message: String,
    pub addresses: Vec<PeerAddress>,
}

/// Liveness probe payload. Empty; reserved for future fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Ping {}

/// Sent before closing a stream on protocol errors. The receiver must
/// close without further protocol action.
#[derive(Debug, Clone, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct GoAwayNotice {
    pub message: String,
}
