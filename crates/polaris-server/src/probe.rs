//! Outbound liveness probing.
//!
//! A probe opens a fresh ping stream to the peer, sends one `Ping`, and
//! requires a `PingResponse` answering that exact message within the TTL.
//! The same probe doubles as the connect-back check at registration time:
//! if the peer cannot be dialed on its advertised addresses, it has no
//! business in the registry.

use polaris_core::constants::PING_PROTOCOL;
use polaris_core::{PeerMeta, Ping, SubProtocol, WireError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::codec::{self, Message};
use crate::transport::Transport;

pub struct Prober {
    transport: Arc<dyn Transport>,
    ping_ttl: Duration,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl Prober {
    pub fn new(transport: Arc<dyn Transport>, ping_ttl: Duration) -> Self {
        Prober {
            transport,
            ping_ttl,
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// One full ping exchange against `meta`. Ok only when the peer is
    /// dialable and answers our ping with a response to it.
    pub async fn ping(&self, meta: &PeerMeta) -> Result<(), WireError> {
        let outcome = self.ping_inner(meta).await;
        match &outcome {
            Ok(()) => self.successes.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failures.fetch_add(1, Ordering::Relaxed),
        };
        outcome
    }

    /// Lifetime (success, failure) probe counts.
    pub fn counts(&self) -> (u64, u64) {
        (
            self.successes.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
        )
    }

    async fn ping_inner(&self, meta: &PeerMeta) -> Result<(), WireError> {
        let mut stream = self
            .transport
            .open_stream(meta, self.ping_ttl, PING_PROTOCOL)
            .await?;

        let request = Message::new(SubProtocol::Ping, codec::encode_payload(&Ping {})?);
        codec::write_frame(&mut stream, &request).await?;

        let response = tokio::time::timeout(self.ping_ttl, codec::read_frame(&mut stream))
            .await
            .map_err(|_| WireError::Timeout)??;

        if response.subprotocol != SubProtocol::PingResponse {
            debug!(peer = %meta.id, got = %response.subprotocol, "probe got wrong message kind");
            return Err(WireError::UnexpectedSubprotocol {
                got: response.subprotocol.as_u32(),
            });
        }
        if response.original_id != request.id {
            debug!(peer = %meta.id, "probe response answers a different message");
            return Err(WireError::Decode(
                "ping response with mismatched original id".to_string(),
            ));
        }
        Ok(())
    }
}
