//! Stream transport abstraction and its TCP implementation.
//!
//! The discovery service itself only needs two things from a transport:
//! open an outbound stream to a peer for a named protocol, and dispatch
//! inbound streams to per-protocol handlers. Keeping that behind the
//! [`Transport`] trait lets tests drive the full service over in-memory
//! duplex pipes.
//!
//! On TCP, the opener introduces the stream with a single hello frame
//! (a [`StreamHello`] payload under the `Status` subprotocol) naming its
//! peer id and the protocol it wants. The claimed id is not authenticated
//! here; the connect-back probe and the deny-list are the actual gates.

use async_trait::async_trait;
use libp2p::PeerId;
use parking_lot::RwLock;
use polaris_core::{HostInfo, PeerMeta, RemoteConn, SubProtocol, WireError};
use polaris_core::net::{self, Host};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::codec::{self, Message};

/// A bidirectional byte stream to a known remote peer.
pub trait PeerStream: AsyncRead + AsyncWrite + Send + Unpin + std::fmt::Debug {
    /// The remote's peer id: verified for outbound streams, claimed via
    /// the hello frame for inbound ones.
    fn remote_peer(&self) -> PeerId;

    /// Socket-level facts about the connection.
    fn remote_conn(&self) -> RemoteConn;
}

pub type BoxedStream = Box<dyn PeerStream>;

/// Per-protocol callback invoked with each inbound stream.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle(&self, stream: BoxedStream);
}

/// What the discovery service requires from a transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open an outbound stream to `meta` for `protocol`, trying the peer's
    /// advertised addresses in order. The whole attempt is bounded by `ttl`.
    async fn open_stream(
        &self,
        meta: &PeerMeta,
        ttl: Duration,
        protocol: &str,
    ) -> Result<BoxedStream, WireError>;

    /// Route inbound streams for `protocol` to `handler`. Replaces any
    /// previous handler for that protocol.
    fn register_handler(&self, protocol: &str, handler: Arc<dyn StreamHandler>);

    fn deregister_handler(&self, protocol: &str);
}

/// Hello frame payload: the opener's identity and the protocol it wants.
#[derive(Debug, Clone, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct StreamHello {
    pub peer_id: Vec<u8>,
    pub protocol: String,
}

/// How long an inbound connection gets to deliver its hello frame.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// A TCP stream tagged with the remote's identity.
#[derive(Debug)]
pub struct TcpPeerStream {
    inner: TcpStream,
    peer: PeerId,
    conn: RemoteConn,
}

impl PeerStream for TcpPeerStream {
    fn remote_peer(&self) -> PeerId {
        self.peer
    }

    fn remote_conn(&self) -> RemoteConn {
        self.conn
    }
}

impl AsyncRead for TcpPeerStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpPeerStream {
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

/// TCP transport: one listening socket, hello-frame dispatch to handlers.
pub struct TcpTransport {
    host: HostInfo,
    handlers: RwLock<HashMap<String, Arc<dyn StreamHandler>>>,
    shutdown_tx: watch::Sender<bool>,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind the listening socket and start the accept loop.
    pub async fn bind(host: HostInfo, listen: SocketAddr) -> Result<Arc<Self>, WireError> {
        let listener = TcpListener::bind(listen).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "transport listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let transport = Arc::new(TcpTransport {
            host,
            handlers: RwLock::new(HashMap::new()),
            shutdown_tx,
            local_addr,
        });

        let accept_self = Arc::clone(&transport);
        tokio::spawn(async move {
            accept_self.accept_loop(listener, shutdown_rx).await;
        });
        Ok(transport)
    }

    /// The bound listen address, useful when binding to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting new connections. Streams already handed to handlers
    /// keep running.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("transport accept loop stopping");
                    return;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, addr)) => {
                            let this = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(e) = this.dispatch_inbound(socket, addr).await {
                                    debug!(%addr, error = %e, "inbound stream rejected");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }
    }

    async fn dispatch_inbound(&self, mut socket: TcpStream, addr: SocketAddr) -> Result<(), WireError> {
        let frame = tokio::time::timeout(HELLO_TIMEOUT, codec::read_frame(&mut socket))
            .await
            .map_err(|_| WireError::Timeout)??;
        if frame.subprotocol != SubProtocol::Status {
            return Err(WireError::UnexpectedSubprotocol {
                got: frame.subprotocol.as_u32(),
            });
        }
        let hello: StreamHello = codec::decode_payload(&frame.payload)?;
        let peer = PeerId::from_bytes(&hello.peer_id)
            .map_err(|e| WireError::Decode(format!("hello peer id: {e}")))?;

        let handler = self
            .handlers
            .read()
            .get(&hello.protocol)
            .cloned()
            .ok_or_else(|| WireError::Decode(format!("no handler for {}", hello.protocol)))?;

        debug!(%peer, %addr, protocol = %hello.protocol, "inbound stream");
        let stream = TcpPeerStream {
            inner: socket,
            peer,
            conn: RemoteConn {
                ip: addr.ip(),
                port: addr.port(),
                outbound: false,
            },
        };
        handler.handle(Box::new(stream)).await;
        Ok(())
    }

    async fn dial_one(&self, host: &Host, port: u16) -> Result<TcpStream, WireError> {
        match host {
            Host::Ip(ip) => Ok(TcpStream::connect((*ip, port)).await?),
            Host::Name(name) => Ok(TcpStream::connect((name.as_str(), port)).await?),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open_stream(
        &self,
        meta: &PeerMeta,
        ttl: Duration,
        protocol: &str,
    ) -> Result<BoxedStream, WireError> {
        let attempt = async {
            let mut last_err = WireError::NoAddress;
            for ma in &meta.addresses {
                let Some((host, port)) = net::host_port(ma) else {
                    continue;
                };
                match self.dial_one(&host, port).await {
                    Ok(mut socket) => {
                        let hello = StreamHello {
                            peer_id: self.host.id().to_bytes(),
                            protocol: protocol.to_string(),
                        };
                        let frame =
                            Message::new(SubProtocol::Status, codec::encode_payload(&hello)?);
                        codec::write_frame(&mut socket, &frame).await?;
                        let remote = socket.peer_addr()?;
                        return Ok(Box::new(TcpPeerStream {
                            inner: socket,
                            peer: meta.id,
                            conn: RemoteConn {
                                ip: remote.ip(),
                                port: remote.port(),
                                outbound: true,
                            },
                        }) as BoxedStream);
                    }
                    Err(e) => {
                        debug!(peer = %meta.id, addr = %ma, error = %e, "dial failed");
                        last_err = WireError::DialFailure(e.to_string());
                    }
                }
            }
            Err(last_err)
        };
        tokio::time::timeout(ttl, attempt)
            .await
            .map_err(|_| WireError::Timeout)?
    }

    fn register_handler(&self, protocol: &str, handler: Arc<dyn StreamHandler>) {
        self.handlers.write().insert(protocol.to_string(), handler);
    }

    fn deregister_handler(&self, protocol: &str) {
        self.handlers.write().remove(protocol);
    }
}
