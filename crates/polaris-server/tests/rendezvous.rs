//! End-to-end exercises of the rendezvous service over an in-memory
//! transport: query handling, registration gating, deny-list behavior,
//! and the ping server.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use libp2p::identity::Keypair;
use libp2p::PeerId;

use polaris_core::constants::{MAP_PROTOCOL, PING_PROTOCOL};
use polaris_core::meta::PeerRole;
use polaris_core::{
    ChainId, HostInfo, MapQuery, MapResponse, PeerMeta, Ping, RemoteConn, ResultStatus, Status,
    SubProtocol, WireError,
};
use polaris_server::codec::{self, Message};
use polaris_server::testing::{DialBehavior, MemoryTransport};
use polaris_server::{ListManager, PolarisConfig, PolarisService};

fn test_chain() -> ChainId {
    ChainId {
        magic: "testchain".to_string(),
        public: true,
        mainnet: false,
        consensus: "sbp".to_string(),
        version: 1,
    }
}

fn test_config() -> PolarisConfig {
    PolarisConfig {
        msg_send_delay: Duration::ZERO,
        // keep the health checker quiet during these tests
        check_period: Duration::from_secs(3600),
        stale_interval: Duration::from_secs(3600),
        ping_ttl: Duration::from_millis(300),
        ..PolarisConfig::default()
    }
}

fn meta(id: PeerId) -> PeerMeta {
    PeerMeta {
        id,
        addresses: vec!["/ip4/211.4.5.6/tcp/7846".parse().unwrap()],
        version: "v2.0.0".to_string(),
        role: PeerRole::Watcher,
        hidden: false,
        producer_ids: vec![],
    }
}

fn conn_from(ip: &str) -> RemoteConn {
    RemoteConn {
        ip: ip.parse().unwrap(),
        port: 7846,
        outbound: false,
    }
}

fn status_for(meta: &PeerMeta, chain: &ChainId) -> Status {
    Status {
        sender: Some(meta.to_peer_address()),
        chain_id: chain.to_bytes().unwrap(),
        best_block_hash: vec![0xab; 32],
        best_height: 100,
        no_expose: false,
        version: meta.version.clone(),
        genesis: vec![],
    }
}

struct Harness {
    service: Arc<PolarisService>,
    transport: Arc<MemoryTransport>,
}

fn harness(config: PolarisConfig, deny_list: ListManager) -> Harness {
    let transport = MemoryTransport::new();
    let host = HostInfo::new(Keypair::generate_ed25519(), "v0.2.0");
    let service = PolarisService::new(
        host,
        config,
        Arc::new(test_chain()),
        transport.clone(),
        Arc::new(deny_list),
    );
    Arc::clone(&service).start();
    Harness { service, transport }
}

impl Harness {
    fn default() -> Self {
        harness(test_config(), ListManager::ephemeral(false))
    }

    /// Send one discovery query as `from` at `ip` and return the reply
    /// frame.
    async fn query(&self, from: PeerId, ip: IpAddr, query: &MapQuery) -> Result<Message, WireError> {
        let mut stream =
            self.transport
                .connect_inbound(from, ip, self.service.host().id(), MAP_PROTOCOL)?;
        let frame = Message::new(SubProtocol::MapQuery, codec::encode_payload(query)?);
        codec::write_frame(&mut stream, &frame).await?;
        tokio::time::timeout(Duration::from_secs(5), codec::read_frame(&mut stream))
            .await
            .map_err(|_| WireError::Timeout)?
    }

    async fn map_response(&self, from: PeerId, ip: &str, query: &MapQuery) -> MapResponse {
        let frame = self
            .query(from, ip.parse().unwrap(), query)
            .await
            .expect("expected a reply frame");
        assert_eq!(frame.subprotocol, SubProtocol::MapResponse);
        codec::decode_payload(&frame.payload).expect("undecodable response")
    }

    fn seed_peer(&self, id: PeerId) {
        self.service
            .registry()
            .register(meta(id), conn_from("211.4.5.6"), vec![], 1);
    }
}

fn query_for(meta: &PeerMeta, chain: &ChainId, add_me: bool, size: i32) -> MapQuery {
    MapQuery {
        status: Some(status_for(meta, chain)),
        add_me,
        size,
        excludes: vec![],
    }
}

fn response_ids(response: &MapResponse) -> HashSet<PeerId> {
    response
        .addresses
        .iter()
        .map(|a| PeerId::from_bytes(&a.peer_id).unwrap())
        .collect()
}

#[tokio::test]
async fn successful_registration_and_query() {
    let h = Harness::default();
    let a = PeerId::random();
    let b = PeerId::random();
    h.seed_peer(a);
    h.seed_peer(b);

    let caller = meta(PeerId::random());
    h.transport.set_behavior(caller.id, DialBehavior::AnswerPing);

    let response = h
        .map_response(caller.id, "211.4.5.6", &query_for(&caller, &test_chain(), true, 10))
        .await;

    assert_eq!(response.status, ResultStatus::Ok);
    assert!(response.message.is_empty(), "message: {}", response.message);
    assert_eq!(response_ids(&response), [a, b].into_iter().collect());
    assert!(h.service.registry().get(&caller.id).is_some());
    assert_eq!(h.service.registry().len(), 3);
}

#[tokio::test]
async fn too_old_version_rejected() {
    let h = Harness::default();
    let mut caller = meta(PeerId::random());
    caller.version = "v1.2.0".to_string();
    h.transport.set_behavior(caller.id, DialBehavior::AnswerPing);

    let response = h
        .map_response(caller.id, "211.4.5.6", &query_for(&caller, &test_chain(), true, 10))
        .await;

    assert_eq!(response.status, ResultStatus::FailedPrecondition);
    assert_eq!(response.message, "too old version");
    assert!(response.addresses.is_empty());
    assert!(h.service.registry().is_empty());
}

#[tokio::test]
async fn too_new_version_rejected() {
    let h = Harness::default();
    let mut caller = meta(PeerId::random());
    caller.version = "v3.0.1".to_string();

    let response = h
        .map_response(caller.id, "211.4.5.6", &query_for(&caller, &test_chain(), false, 10))
        .await;

    assert_eq!(response.status, ResultStatus::FailedPrecondition);
}

#[tokio::test]
async fn different_chain_rejected() {
    let h = Harness::default();
    let caller = meta(PeerId::random());
    let mut other_chain = test_chain();
    other_chain.magic = "otherchain".to_string();

    let response = h
        .map_response(caller.id, "211.4.5.6", &query_for(&caller, &other_chain, true, 10))
        .await;

    assert_eq!(response.status, ResultStatus::Unauthenticated);
    assert_eq!(response.message, "different chain");
    assert!(h.service.registry().is_empty());
}

#[tokio::test]
async fn garbage_chain_id_rejected() {
    let h = Harness::default();
    let caller = meta(PeerId::random());
    let mut query = query_for(&caller, &test_chain(), false, 10);
    if let Some(status) = &mut query.status {
        status.chain_id = b"not a chain id".to_vec();
    }

    let response = h.map_response(caller.id, "211.4.5.6", &query).await;
    assert_eq!(response.status, ResultStatus::InvalidArgument);
    assert_eq!(response.message, "invalid chain id");
}

#[tokio::test]
async fn banned_ip_closed_silently() {
    let deny = ListManager::ephemeral(true);
    deny.add(&polaris_core::RawEntry {
        cidr: "10.0.0.0/8".to_string(),
        ..Default::default()
    })
    .unwrap();
    let h = harness(test_config(), deny);
    h.seed_peer(PeerId::random());

    let caller = meta(PeerId::random());
    let result = h
        .query(
            caller.id,
            "10.1.2.3".parse().unwrap(),
            &query_for(&caller, &test_chain(), true, 10),
        )
        .await;

    // No response frame of any kind, just a closed stream.
    assert!(result.is_err());
    assert_eq!(h.service.registry().len(), 1);
}

#[tokio::test]
async fn connect_back_failure_still_answers() {
    let h = Harness::default();
    let a = PeerId::random();
    h.seed_peer(a);

    let caller = meta(PeerId::random());
    h.transport.set_behavior(caller.id, DialBehavior::Unreachable);

    let response = h
        .map_response(caller.id, "211.4.5.6", &query_for(&caller, &test_chain(), true, 10))
        .await;

    assert_eq!(response.status, ResultStatus::Ok);
    assert_eq!(response.message, "can't connect back, so not registered");
    assert_eq!(response_ids(&response), [a].into_iter().collect());
    assert!(h.service.registry().get(&caller.id).is_none());
}

#[tokio::test]
async fn silent_peer_not_registered() {
    let h = Harness::default();
    let caller = meta(PeerId::random());
    h.transport.set_behavior(caller.id, DialBehavior::NoResponse);

    let response = h
        .map_response(caller.id, "211.4.5.6", &query_for(&caller, &test_chain(), true, 10))
        .await;

    assert_eq!(response.status, ResultStatus::Ok);
    assert_eq!(response.message, "can't connect back, so not registered");
    assert!(h.service.registry().is_empty());
}

#[tokio::test]
async fn private_address_not_registered() {
    let h = Harness::default();
    let mut caller = meta(PeerId::random());
    caller.addresses = vec!["/ip4/192.168.1.5/tcp/7846".parse().unwrap()];
    h.transport.set_behavior(caller.id, DialBehavior::AnswerPing);

    let response = h
        .map_response(caller.id, "211.4.5.6", &query_for(&caller, &test_chain(), true, 10))
        .await;

    assert_eq!(response.status, ResultStatus::Ok);
    assert_eq!(response.message, "can't connect back, so not registered");
    assert!(h.service.registry().is_empty());
}

#[tokio::test]
async fn private_address_registered_when_allowed() {
    let config = PolarisConfig {
        allow_private: true,
        ..test_config()
    };
    let h = harness(config, ListManager::ephemeral(false));
    let mut caller = meta(PeerId::random());
    caller.addresses = vec!["/ip4/192.168.1.5/tcp/7846".parse().unwrap()];
    h.transport.set_behavior(caller.id, DialBehavior::AnswerPing);

    let response = h
        .map_response(caller.id, "192.168.1.5", &query_for(&caller, &test_chain(), true, 10))
        .await;

    assert_eq!(response.status, ResultStatus::Ok);
    assert!(h.service.registry().get(&caller.id).is_some());
}

#[tokio::test]
async fn no_expose_skips_registration() {
    let h = Harness::default();
    let caller = meta(PeerId::random());
    h.transport.set_behavior(caller.id, DialBehavior::AnswerPing);

    let mut query = query_for(&caller, &test_chain(), true, 10);
    if let Some(status) = &mut query.status {
        status.no_expose = true;
    }
    let response = h.map_response(caller.id, "211.4.5.6", &query).await;

    assert_eq!(response.status, ResultStatus::Ok);
    assert!(response.message.is_empty());
    assert!(h.service.registry().is_empty());
}

#[tokio::test]
async fn size_zero_is_invalid_argument() {
    let h = Harness::default();
    h.seed_peer(PeerId::random());
    let caller = meta(PeerId::random());

    let response = h
        .map_response(caller.id, "211.4.5.6", &query_for(&caller, &test_chain(), false, 0))
        .await;

    assert_eq!(response.status, ResultStatus::InvalidArgument);
    assert!(response.addresses.is_empty());
}

#[tokio::test]
async fn oversized_request_clamped_silently() {
    let h = Harness::default();
    for _ in 0..5 {
        h.seed_peer(PeerId::random());
    }
    let caller = meta(PeerId::random());

    let response = h
        .map_response(
            caller.id,
            "211.4.5.6",
            &query_for(&caller, &test_chain(), false, 1_000_000),
        )
        .await;

    assert_eq!(response.status, ResultStatus::Ok);
    assert_eq!(response.addresses.len(), 5);
}

#[tokio::test]
async fn caller_never_sees_itself() {
    let h = Harness::default();
    let caller = meta(PeerId::random());
    h.service
        .registry()
        .register(caller.clone(), conn_from("211.4.5.6"), vec![], 1);
    h.seed_peer(PeerId::random());

    let response = h
        .map_response(caller.id, "211.4.5.6", &query_for(&caller, &test_chain(), false, 10))
        .await;

    assert!(!response_ids(&response).contains(&caller.id));
    assert_eq!(response.addresses.len(), 1);
}

#[tokio::test]
async fn excluded_peers_filtered() {
    let h = Harness::default();
    let known = PeerId::random();
    let fresh = PeerId::random();
    h.seed_peer(known);
    h.seed_peer(fresh);

    let caller = meta(PeerId::random());
    let mut query = query_for(&caller, &test_chain(), false, 10);
    query.excludes = vec![known.to_bytes()];

    let response = h.map_response(caller.id, "211.4.5.6", &query).await;
    assert_eq!(response_ids(&response), [fresh].into_iter().collect());
}

#[tokio::test]
async fn missing_status_gets_go_away() {
    let h = Harness::default();
    let frame = h
        .query(
            PeerId::random(),
            "211.4.5.6".parse().unwrap(),
            &MapQuery {
                status: None,
                add_me: false,
                size: 10,
                excludes: vec![],
            },
        )
        .await
        .expect("expected a go-away frame");
    assert_eq!(frame.subprotocol, SubProtocol::GoAway);
}

#[tokio::test]
async fn wrong_subprotocol_gets_go_away() {
    let h = Harness::default();
    let mut stream = h
        .transport
        .connect_inbound(
            PeerId::random(),
            "211.4.5.6".parse().unwrap(),
            h.service.host().id(),
            MAP_PROTOCOL,
        )
        .unwrap();
    let frame = Message::new(SubProtocol::Ping, codec::encode_payload(&Ping {}).unwrap());
    codec::write_frame(&mut stream, &frame).await.unwrap();

    let reply = codec::read_frame(&mut stream).await.unwrap();
    assert_eq!(reply.subprotocol, SubProtocol::GoAway);
}

#[tokio::test]
async fn ping_server_answers_with_original_id() {
    let h = Harness::default();
    let mut stream = h
        .transport
        .connect_inbound(
            PeerId::random(),
            "211.4.5.6".parse().unwrap(),
            h.service.host().id(),
            PING_PROTOCOL,
        )
        .unwrap();

    let request = Message::new(SubProtocol::Ping, codec::encode_payload(&Ping {}).unwrap());
    codec::write_frame(&mut stream, &request).await.unwrap();
    let reply = codec::read_frame(&mut stream).await.unwrap();

    assert_eq!(reply.subprotocol, SubProtocol::PingResponse);
    assert_eq!(reply.original_id, request.id);
}

#[tokio::test]
async fn new_deny_entry_evicts_matching_peer() {
    let h = Harness::default();
    let target = PeerId::random();
    h.service
        .registry()
        .register(meta(target), conn_from("9.9.9.9"), vec![], 1);
    h.seed_peer(PeerId::random());

    h.service
        .add_deny_entry(&polaris_core::RawEntry {
            peerid: target.to_base58(),
            ..Default::default()
        })
        .unwrap();

    assert!(h.service.registry().get(&target).is_none());
    assert_eq!(h.service.registry().len(), 1);
}

#[tokio::test]
async fn reregistration_keeps_single_record() {
    let h = Harness::default();
    let caller = meta(PeerId::random());
    h.transport.set_behavior(caller.id, DialBehavior::AnswerPing);

    for _ in 0..3 {
        let response = h
            .map_response(caller.id, "211.4.5.6", &query_for(&caller, &test_chain(), true, 10))
            .await;
        assert_eq!(response.status, ResultStatus::Ok);
    }
    assert_eq!(h.service.registry().len(), 1);
}

#[tokio::test]
async fn forked_chain_version_admitted_at_height() {
    use polaris_core::ForkSchedule;

    let transport = MemoryTransport::new();
    let host = HostInfo::new(Keypair::generate_ed25519(), "v0.2.0");
    let schedule = ForkSchedule::new(test_chain(), vec![(50, 2)]);
    let service = PolarisService::new(
        host,
        test_config(),
        Arc::new(schedule),
        transport.clone(),
        Arc::new(ListManager::ephemeral(false)),
    );
    Arc::clone(&service).start();
    let h = Harness { service, transport };

    let caller = meta(PeerId::random());
    let mut forked_chain = test_chain();
    forked_chain.version = 2;
    // best_height in status_for is 100, past the fork at 50
    let response = h
        .map_response(caller.id, "211.4.5.6", &query_for(&caller, &forked_chain, false, 10))
        .await;
    assert_eq!(response.status, ResultStatus::Ok);

    // a peer still reporting the genesis version at that height is refused
    let response = h
        .map_response(caller.id, "211.4.5.6", &query_for(&caller, &test_chain(), false, 10))
        .await;
    assert_eq!(response.status, ResultStatus::Unauthenticated);
}

#[tokio::test]
async fn admin_current_list_reports_records() {
    let h = Harness::default();
    for _ in 0..4 {
        h.seed_peer(PeerId::random());
    }
    let page = h.service.current_list(2);
    assert_eq!(page.peers.len(), 2);
    assert_eq!(page.total, 4);
    assert!(page.has_next);

    let full = h.service.current_list(100);
    assert_eq!(full.peers.len(), 4);
    assert!(!full.has_next);
    assert!(full.peers.iter().all(|p| p.cont_fail == 0));
}
