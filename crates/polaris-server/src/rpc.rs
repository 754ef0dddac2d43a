//! Administrative JSON-RPC endpoint.
//!
//! Exposes the registry listing and deny-list editing over jsonrpsee.
//! This endpoint is for operators; it binds to loopback by default and
//! carries no authentication of its own.

use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use polaris_core::{AdminError, RawEntry};

use crate::service::{PolarisPeerInfo, PolarisService};

/// JSON form of one registered peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerJson {
    /// Base58 peer id.
    pub peer_id: String,
    /// Advertised multiaddrs, primary first.
    pub addresses: Vec<String>,
    /// Node software version.
    pub version: String,
    pub hidden: bool,
    /// Unix milliseconds of first appearance.
    pub connected: u64,
    /// Unix milliseconds of the last liveness check.
    pub last_check: u64,
    /// Consecutive failed checks.
    pub cont_fail: u32,
}

/// JSON form of a registry page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerListJson {
    pub peers: Vec<PeerJson>,
    pub has_next: bool,
    pub total: usize,
}

/// JSON form of the deny list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenyListJson {
    pub enabled: bool,
    pub entries: Vec<String>,
}

fn unix_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn peer_json(info: &PolarisPeerInfo) -> PeerJson {
    PeerJson {
        peer_id: info.meta.id.to_base58(),
        addresses: info.meta.addresses.iter().map(|a| a.to_string()).collect(),
        version: info.meta.version.clone(),
        hidden: info.meta.hidden,
        connected: unix_millis(info.connected),
        last_check: unix_millis(info.last_check),
        cont_fail: info.cont_fail,
    }
}

fn rpc_error(code: i32, msg: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, msg.to_string(), None::<()>)
}

fn admin_error(e: AdminError) -> ErrorObjectOwned {
    match e {
        AdminError::InvalidArgument(_) | AdminError::OutOfRange(_) => {
            rpc_error(-32602, &e.to_string())
        }
        AdminError::Server(_) => rpc_error(-32000, &e.to_string()),
    }
}

/// Administrative JSON-RPC interface of the rendezvous daemon.
#[rpc(server)]
pub trait PolarisAdminApi {
    /// List currently registered peers, up to `size` entries.
    #[method(name = "currentList")]
    async fn current_list(&self, size: Option<usize>) -> Result<PeerListJson, ErrorObjectOwned>;

    /// Allow-list view. Reserved; always empty.
    #[method(name = "whiteList")]
    async fn white_list(&self) -> Result<PeerListJson, ErrorObjectOwned>;

    /// Banned-peer view. Reserved; always empty.
    #[method(name = "blackList")]
    async fn black_list(&self) -> Result<PeerListJson, ErrorObjectOwned>;

    /// The deny list: enforcement flag and entries in stored order.
    #[method(name = "listBLEntries")]
    async fn list_bl_entries(&self) -> Result<DenyListJson, ErrorObjectOwned>;

    /// Add a deny-list entry and evict matching registered peers.
    #[method(name = "addBLEntry")]
    async fn add_bl_entry(
        &self,
        peerid: Option<String>,
        address: Option<String>,
        cidr: Option<String>,
    ) -> Result<(), ErrorObjectOwned>;

    /// Remove the deny-list entry at `index` (as listed by listBLEntries).
    #[method(name = "removeBLEntry")]
    async fn remove_bl_entry(&self, index: usize) -> Result<(), ErrorObjectOwned>;
}

pub struct AdminRpcImpl {
    service: Arc<PolarisService>,
}

impl AdminRpcImpl {
    pub fn new(service: Arc<PolarisService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl PolarisAdminApiServer for AdminRpcImpl {
    async fn current_list(&self, size: Option<usize>) -> Result<PeerListJson, ErrorObjectOwned> {
        let page = self.service.current_list(size.unwrap_or(usize::MAX));
        Ok(PeerListJson {
            peers: page.peers.iter().map(peer_json).collect(),
            has_next: page.has_next,
            total: page.total,
        })
    }

    async fn white_list(&self) -> Result<PeerListJson, ErrorObjectOwned> {
        Ok(PeerListJson {
            peers: Vec::new(),
            has_next: false,
            total: 0,
        })
    }

    async fn black_list(&self) -> Result<PeerListJson, ErrorObjectOwned> {
        Ok(PeerListJson {
            peers: Vec::new(),
            has_next: false,
            total: 0,
        })
    }

    async fn list_bl_entries(&self) -> Result<DenyListJson, ErrorObjectOwned> {
        let (enabled, entries) = self.service.list_deny_entries();
        Ok(DenyListJson { enabled, entries })
    }

    async fn add_bl_entry(
        &self,
        peerid: Option<String>,
        address: Option<String>,
        cidr: Option<String>,
    ) -> Result<(), ErrorObjectOwned> {
        let raw = RawEntry {
            peerid: peerid.unwrap_or_default(),
            address: address.unwrap_or_default(),
            cidr: cidr.unwrap_or_default(),
        };
        self.service.add_deny_entry(&raw).map_err(admin_error)
    }

    async fn remove_bl_entry(&self, index: usize) -> Result<(), ErrorObjectOwned> {
        self.service.remove_deny_entry(index).map_err(admin_error)
    }
}

/// Start the admin RPC server on `addr`, returning its handle.
pub async fn start_admin_rpc(
    addr: &str,
    service: Arc<PolarisService>,
) -> Result<ServerHandle, AdminError> {
    let server = Server::builder()
        .build(addr)
        .await
        .map_err(|e| AdminError::Server(e.to_string()))?;
    let handle = server.start(AdminRpcImpl::new(service).into_rpc());
    Ok(handle)
}
