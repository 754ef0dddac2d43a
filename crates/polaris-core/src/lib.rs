//! # polaris-core — types for the Polaris peer-discovery protocol.
//!
//! Pure domain types with no I/O: peer metadata, chain identity, wire
//! payload structs, the peer-version gate, and deny-list entries. The
//! server side lives in `polaris-server`; this crate is shared between
//! the rendezvous daemon and any client tooling.

pub mod chainid;
pub mod constants;
pub mod error;
pub mod host;
pub mod listentry;
pub mod message;
pub mod meta;
pub mod net;
pub mod version;

pub use chainid::{ChainId, ChainIdProvider, ForkSchedule};
pub use error::{AdminError, ChainIdError, EntryError, MetaError, WireError};
pub use host::HostInfo;
pub use listentry::{CidrRange, ListEntry, RawEntry};
pub use message::{
    GoAwayNotice, MapQuery, MapResponse, PeerAddress, Ping, ResultStatus, Status, SubProtocol,
};
pub use meta::{PeerMeta, PeerRole, RemoteConn};
pub use version::{check_peer_version, PeerVersion, MAX_PEER_VERSION, MIN_PEER_VERSION};
