//! # polaris-server — chain-scoped peer rendezvous.
//!
//! The server side of the Polaris discovery protocol: frame codec,
//! transport seam, live peer registry, deny list, connect-back prober,
//! health-check loop, the query-handling service, and the administrative
//! JSON-RPC endpoint.
//!
//! Wiring order for embedders: build a [`transport::Transport`], a
//! [`listmanager::ListManager`], and a chain-id provider, hand them to
//! [`service::PolarisService::new`], then call `start`.

pub mod codec;
pub mod config;
pub mod healthcheck;
pub mod listmanager;
pub mod probe;
pub mod registry;
pub mod rpc;
pub mod service;
pub mod testing;
pub mod transport;

pub use config::PolarisConfig;
pub use listmanager::ListManager;
pub use registry::{PeerRegistry, PeerState};
pub use service::{PeerListPage, PolarisPeerInfo, PolarisService};
pub use transport::{BoxedStream, PeerStream, StreamHandler, TcpTransport, Transport};
