//! In-memory transport for exercising the service without sockets.
//!
//! Streams are tokio duplex pipes. Outbound dials are scripted per peer id
//! with a [`DialBehavior`]; inbound streams are injected straight into the
//! registered protocol handlers via [`MemoryTransport::connect_inbound`].

use async_trait::async_trait;
use libp2p::PeerId;
use parking_lot::RwLock;
use polaris_core::{PeerMeta, Ping, RemoteConn, SubProtocol, WireError};
use std::collections::HashMap;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, DuplexStream, ReadBuf};

use crate::codec::{self, Message};
use crate::transport::{BoxedStream, PeerStream, StreamHandler, Transport};

/// How a scripted peer reacts to being dialed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialBehavior {
    /// Accept the stream and answer every ping correctly.
    AnswerPing,
    /// Refuse the dial outright.
    Unreachable,
    /// Accept the stream but never write anything back.
    NoResponse,
}

/// A duplex pipe tagged with remote identity, mirroring what the TCP
/// transport attaches to its streams.
#[derive(Debug)]
pub struct MemoryStream {
    inner: DuplexStream,
    peer: PeerId,
    conn: RemoteConn,
}

impl MemoryStream {
    pub fn new(inner: DuplexStream, peer: PeerId, conn: RemoteConn) -> Self {
        MemoryStream { inner, peer, conn }
    }
}

impl PeerStream for MemoryStream {
    fn remote_peer(&self) -> PeerId {
        self.peer
    }

    fn remote_conn(&self) -> RemoteConn {
        self.conn
    }
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

const PIPE_CAPACITY: usize = 64 * 1024;

fn fake_conn(ip: IpAddr, outbound: bool) -> RemoteConn {
    RemoteConn {
        ip,
        port: 7846,
        outbound,
    }
}

/// Scriptable in-memory [`Transport`].
pub struct MemoryTransport {
    behaviors: RwLock<HashMap<PeerId, DialBehavior>>,
    handlers: RwLock<HashMap<String, Arc<dyn StreamHandler>>>,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryTransport {
            behaviors: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
        })
    }

    /// Script how dials to `peer` behave. Peers without a script are
    /// unreachable.
    pub fn set_behavior(&self, peer: PeerId, behavior: DialBehavior) {
        self.behaviors.write().insert(peer, behavior);
    }

    /// Open a stream *into* the service, as a remote peer at `ip` would.
    /// The registered handler runs on a background task; the returned end
    /// is the remote's side of the pipe.
    pub fn connect_inbound(
        &self,
        from: PeerId,
        ip: IpAddr,
        local_id: PeerId,
        protocol: &str,
    ) -> Result<MemoryStream, WireError> {
        let handler = self
            .handlers
            .read()
            .get(protocol)
            .cloned()
            .ok_or_else(|| WireError::DialFailure(format!("no handler for {protocol}")))?;
        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        let service_end = MemoryStream::new(local, from, fake_conn(ip, false));
        tokio::spawn(async move {
            handler.handle(Box::new(service_end)).await;
        });
        Ok(MemoryStream::new(
            remote,
            local_id,
            fake_conn(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), true),
        ))
    }

    async fn ping_responder(mut stream: DuplexStream) {
        loop {
            let frame = match codec::read_frame(&mut stream).await {
                Ok(frame) => frame,
                Err(_) => return,
            };
            if frame.subprotocol == SubProtocol::Ping {
                let payload = match codec::encode_payload(&Ping {}) {
                    Ok(p) => p,
                    Err(_) => return,
                };
                let reply = Message::reply(SubProtocol::PingResponse, frame.id, payload);
                if codec::write_frame(&mut stream, &reply).await.is_err() {
                    return;
                }
            }
        }
    }

    async fn black_hole(mut stream: DuplexStream) {
        let mut sink = [0u8; 1024];
        while let Ok(n) = stream.read(&mut sink).await {
            if n == 0 {
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open_stream(
        &self,
        meta: &PeerMeta,
        _ttl: Duration,
        _protocol: &str,
    ) -> Result<BoxedStream, WireError> {
        let behavior = self.behaviors.read().get(&meta.id).copied();
        let behavior = match behavior {
            Some(DialBehavior::Unreachable) | None => {
                return Err(WireError::DialFailure(format!(
                    "peer {} is not reachable",
                    meta.id
                )));
            }
            Some(b) => b,
        };
        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        match behavior {
            DialBehavior::AnswerPing => {
                tokio::spawn(Self::ping_responder(remote));
            }
            DialBehavior::NoResponse => {
                tokio::spawn(Self::black_hole(remote));
            }
            DialBehavior::Unreachable => unreachable!(),
        }
        let ip = "211.4.5.6".parse().map_err(|_| WireError::NoAddress)?;
        Ok(Box::new(MemoryStream::new(
            local,
            meta.id,
            fake_conn(ip, true),
        )))
    }

    fn register_handler(&self, protocol: &str, handler: Arc<dyn StreamHandler>) {
        self.handlers.write().insert(protocol.to_string(), handler);
    }

    fn deregister_handler(&self, protocol: &str) {
        self.handlers.write().remove(protocol);
    }
}
