//! The rendezvous service: query handling, registration, administration.
//!
//! Each inbound discovery stream is handled to completion on its own task:
//! read one query, gate it (deny list, version, chain id), sample the
//! registry, optionally connect back to verify the caller is reachable,
//! write one response, close. Ping streams are answered in place. The
//! administrative operations mutate the deny list and read the registry.

use async_trait::async_trait;
use libp2p::PeerId;
use parking_lot::Mutex;
use polaris_core::constants::{MAP_PROTOCOL, PING_PROTOCOL};
use polaris_core::net::is_public_multiaddr;
use polaris_core::{
    check_peer_version, AdminError, ChainId, ChainIdProvider, GoAwayNotice, HostInfo, ListEntry,
    MapQuery, MapResponse, PeerMeta, Ping, RawEntry, RemoteConn, ResultStatus, Status, SubProtocol,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::codec::{self, Message, MsgId};
use crate::config::PolarisConfig;
use crate::healthcheck::{HealthCheckConfig, HealthCheckManager};
use crate::listmanager::ListManager;
use crate::probe::Prober;
use crate::registry::{PeerRegistry, PeerState};
use crate::transport::{BoxedStream, StreamHandler, Transport};

/// A registry record as exposed to operators.
#[derive(Debug, Clone)]
pub struct PolarisPeerInfo {
    pub meta: PeerMeta,
    pub connected: SystemTime,
    pub last_check: SystemTime,
    pub cont_fail: u32,
}

/// A page of registry records.
#[derive(Debug, Clone)]
pub struct PeerListPage {
    pub peers: Vec<PolarisPeerInfo>,
    pub has_next: bool,
    pub total: usize,
}

pub struct PolarisService {
    host: HostInfo,
    config: PolarisConfig,
    chain: Arc<dyn ChainIdProvider>,
    transport: Arc<dyn Transport>,
    registry: Arc<PeerRegistry>,
    deny_list: Arc<ListManager>,
    prober: Arc<Prober>,
    health: Mutex<Option<HealthCheckManager>>,
}

impl PolarisService {
    pub fn new(
        host: HostInfo,
        config: PolarisConfig,
        chain: Arc<dyn ChainIdProvider>,
        transport: Arc<dyn Transport>,
        deny_list: Arc<ListManager>,
    ) -> Arc<Self> {
        let prober = Arc::new(Prober::new(Arc::clone(&transport), config.ping_ttl));
        Arc::new(PolarisService {
            host,
            config,
            chain,
            transport,
            registry: Arc::new(PeerRegistry::new()),
            deny_list,
            prober,
            health: Mutex::new(None),
        })
    }

    /// Install the protocol handlers and start the health-check loop.
    pub fn start(self: Arc<Self>) {
        self.transport
            .register_handler(MAP_PROTOCOL, Arc::new(MapStreamHandler(Arc::clone(&self))));
        self.transport
            .register_handler(PING_PROTOCOL, Arc::new(PingStreamHandler(Arc::clone(&self))));

        let manager = HealthCheckManager::start(
            Arc::clone(&self.registry),
            Arc::clone(&self.prober),
            HealthCheckConfig {
                check_period: self.config.check_period,
                stale_interval: self.config.stale_interval,
                workers: self.config.health_workers,
                fail_threshold: self.config.fail_threshold,
                drain_deadline: self.config.ping_ttl,
            },
        );
        *self.health.lock() = Some(manager);
        info!(id = %self.host.id(), chain = %self.chain.genesis_id(), "rendezvous service started");
    }

    /// Stop taking new streams and drain the health-check loop.
    pub async fn stop(&self) {
        self.transport.deregister_handler(MAP_PROTOCOL);
        self.transport.deregister_handler(PING_PROTOCOL);
        let manager = self.health.lock().take();
        if let Some(manager) = manager {
            manager.stop().await;
        }
        info!("rendezvous service stopped");
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn deny_list(&self) -> &Arc<ListManager> {
        &self.deny_list
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    // ------------------------------------------------------------------
    // Discovery streams
    // ------------------------------------------------------------------

    async fn handle_map_stream(&self, mut stream: BoxedStream) {
        let remote_id = stream.remote_peer();
        let conn = stream.remote_conn();

        let frame = match codec::read_frame(&mut stream).await {
            Ok(frame) if frame.subprotocol == SubProtocol::MapQuery => frame,
            Ok(frame) => {
                debug!(peer = %remote_id, got = %frame.subprotocol, "expected a map query");
                self.send_go_away(&mut stream, "malformed message").await;
                return;
            }
            Err(e) => {
                debug!(peer = %remote_id, error = %e, "failed to read query");
                self.send_go_away(&mut stream, "malformed message").await;
                return;
            }
        };

        // Banned callers get silence, not a protocol answer.
        if self.deny_list.is_banned(conn.ip, &remote_id) {
            info!(peer = %remote_id, ip = %conn.ip, "closing stream from banned peer");
            return;
        }

        let query: MapQuery = match codec::decode_payload(&frame.payload) {
            Ok(query) => query,
            Err(e) => {
                debug!(peer = %remote_id, error = %e, "undecodable query payload");
                self.send_go_away(&mut stream, "malformed message").await;
                return;
            }
        };

        let response = match self.handle_query(conn, &query).await {
            Ok(response) => response,
            Err(reason) => {
                debug!(peer = %remote_id, reason, "rejecting query");
                self.send_go_away(&mut stream, reason).await;
                return;
            }
        };

        let status = response.status;
        let count = response.addresses.len();
        if let Err(e) = self.write_response(&mut stream, frame.id, &response).await {
            info!(peer = %remote_id, error = %e, "failed to write response");
            return;
        }
        debug!(peer = %remote_id, ?status, peer_cnt = count, "sent map response");

        // Give the transport a moment to drain before the drop closes it.
        tokio::time::sleep(self.config.msg_send_delay).await;
    }

    /// The query state machine proper. `Err` means a protocol-level
    /// failure answered with a go-away; `Ok` carries the response to send,
    /// which may itself report a rejection status.
    async fn handle_query(
        &self,
        conn: RemoteConn,
        query: &MapQuery,
    ) -> Result<MapResponse, &'static str> {
        let Some(status) = &query.status else {
            return Err("malformed status message");
        };
        if status.chain_id.is_empty() {
            return Err("malformed status message");
        }
        let meta = match PeerMeta::from_status(status) {
            Ok(meta) => meta,
            Err(e) => {
                debug!(error = %e, "unusable sender in status");
                return Err("malformed status message");
            }
        };
        if meta.version.is_empty() {
            return Err("malformed status message");
        }

        if !check_peer_version(&meta.version) {
            debug!(peer = %meta.id, version = %meta.version, "peer version out of range");
            return Ok(reject(ResultStatus::FailedPrecondition, "too old version"));
        }

        match ChainId::from_bytes(&status.chain_id) {
            Err(e) => {
                debug!(peer = %meta.id, error = %e, "unparseable chain id");
                return Ok(reject(ResultStatus::InvalidArgument, "invalid chain id"));
            }
            Ok(remote_chain) => {
                let local = self.chain.id_at(status.best_height);
                if remote_chain != local {
                    debug!(peer = %meta.id, remote = %remote_chain, local = %local, "chain mismatch");
                    return Ok(reject(ResultStatus::Unauthenticated, "different chain"));
                }
            }
        }

        if query.size <= 0 {
            return Ok(reject(ResultStatus::InvalidArgument, "invalid size"));
        }
        let limit = (query.size as usize).min(self.config.max_response_peers);

        let excludes: HashSet<PeerId> = query
            .excludes
            .iter()
            .filter_map(|raw| PeerId::from_bytes(raw).ok())
            .collect();
        let addresses = self.registry.sample(&meta.id, &excludes, limit);
        let mut response = MapResponse {
            status: ResultStatus::Ok,
            message: String::new(),
            addresses,
        };

        if query.add_me && !status.no_expose {
            if self.register_caller(&meta, conn, status).await {
                debug!(peer = %meta.id, "caller registered");
            } else {
                response.message = "can't connect back, so not registered".to_string();
            }
        }
        Ok(response)
    }

    /// Connect-back gate: a caller only enters the registry if its primary
    /// address is acceptable and it answers a fresh ping.
    async fn register_caller(&self, meta: &PeerMeta, conn: RemoteConn, status: &Status) -> bool {
        if !self.config.allow_private {
            let public = meta.primary_address().is_some_and(is_public_multiaddr);
            if !public {
                debug!(peer = %meta.id, addr = ?meta.primary_address(), "private address, not registering");
                return false;
            }
        }
        match self.prober.ping(meta).await {
            Ok(()) => {
                self.registry.register(
                    meta.clone(),
                    conn,
                    status.best_block_hash.clone(),
                    status.best_height,
                );
                true
            }
            Err(e) => {
                debug!(peer = %meta.id, error = %e, "connect-back failed");
                false
            }
        }
    }

    async fn handle_ping_stream(&self, mut stream: BoxedStream) {
        let remote_id = stream.remote_peer();
        let conn = stream.remote_conn();
        if self.deny_list.is_banned(conn.ip, &remote_id) {
            info!(peer = %remote_id, ip = %conn.ip, "closing ping stream from banned peer");
            return;
        }
        loop {
            let frame = match codec::read_frame(&mut stream).await {
                Ok(frame) => frame,
                Err(_) => return,
            };
            match frame.subprotocol {
                SubProtocol::Ping => {
                    let payload = match codec::encode_payload(&Ping {}) {
                        Ok(payload) => payload,
                        Err(_) => return,
                    };
                    let reply = Message::reply(SubProtocol::PingResponse, frame.id, payload);
                    if codec::write_frame(&mut stream, &reply).await.is_err() {
                        return;
                    }
                }
                SubProtocol::GoAway => return,
                other => {
                    debug!(peer = %remote_id, got = %other, "unexpected message on ping stream");
                    return;
                }
            }
        }
    }

    async fn write_response(
        &self,
        stream: &mut BoxedStream,
        original_id: MsgId,
        response: &MapResponse,
    ) -> Result<(), polaris_core::WireError> {
        let payload = codec::encode_payload(response)?;
        let frame = Message::reply(SubProtocol::MapResponse, original_id, payload);
        codec::write_frame(stream, &frame).await
    }

    async fn send_go_away(&self, stream: &mut BoxedStream, message: &str) {
        let notice = GoAwayNotice {
            message: message.to_string(),
        };
        let Ok(payload) = codec::encode_payload(&notice) else {
            return;
        };
        let frame = Message::new(SubProtocol::GoAway, payload);
        if let Err(e) = codec::write_frame(stream, &frame).await {
            debug!(error = %e, "failed to send go-away");
        }
    }

    // ------------------------------------------------------------------
    // Administrative surface
    // ------------------------------------------------------------------

    /// Up to `min(size, max)` registry records, newest facts included.
    pub fn current_list(&self, size: usize) -> PeerListPage {
        let snapshot = self.registry.snapshot();
        let total = snapshot.len();
        let page_size = size.min(total).min(self.config.max_response_peers);
        let peers = snapshot
            .iter()
            .take(page_size)
            .map(|s| peer_info(s))
            .collect();
        PeerListPage {
            peers,
            has_next: page_size < total,
            total,
        }
    }

    /// Deny-list enforcement flag and the textual form of every entry.
    pub fn list_deny_entries(&self) -> (bool, Vec<String>) {
        let entries = self
            .deny_list
            .entries()
            .iter()
            .map(|e| e.to_string())
            .collect();
        (self.deny_list.enabled(), entries)
    }

    /// Append a deny-list entry and immediately evict every registered
    /// peer it matches.
    pub fn add_deny_entry(&self, raw: &RawEntry) -> Result<(), AdminError> {
        let entry = self
            .deny_list
            .add(raw)
            .map_err(|e| AdminError::InvalidArgument(e.to_string()))?;
        self.apply_new_entry(&entry);
        Ok(())
    }

    pub fn remove_deny_entry(&self, index: usize) -> Result<(), AdminError> {
        self.deny_list.remove(index).map(|_| ())
    }

    fn apply_new_entry(&self, entry: &ListEntry) {
        for state in self.registry.snapshot() {
            if entry.contains(state.conn.ip, &state.meta.id) {
                warn!(peer = %state.meta.id, "evicting registered peer matching new deny-list entry");
                self.registry.unregister(&state.meta.id);
            }
        }
    }
}

fn reject(status: ResultStatus, message: &str) -> MapResponse {
    MapResponse {
        status,
        message: message.to_string(),
        addresses: Vec::new(),
    }
}

fn peer_info(state: &Arc<PeerState>) -> PolarisPeerInfo {
    PolarisPeerInfo {
        meta: state.meta.clone(),
        connected: state.connected,
        last_check: state.last_check_time(),
        cont_fail: state.cont_fail(),
    }
}

struct MapStreamHandler(Arc<PolarisService>);

#[async_trait]
impl StreamHandler for MapStreamHandler {
    async fn handle(&self, stream: BoxedStream) {
        self.0.handle_map_stream(stream).await;
    }
}

struct PingStreamHandler(Arc<PolarisService>);

#[async_trait]
impl StreamHandler for PingStreamHandler {
    async fn handle(&self, stream: BoxedStream) {
        self.0.handle_ping_stream(stream).await;
    }
}
