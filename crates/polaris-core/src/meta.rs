//! Peer metadata and its wire-form conversions.

use libp2p::{Multiaddr, PeerId};
use std::net::IpAddr;

use crate::error::MetaError;
use crate::message::{PeerAddress, Status};
use crate::net;

/// What a node does on the chain it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerRole {
    /// Block producer.
    Producer,
    /// Ordinary full node.
    #[default]
    Watcher,
    /// Proxy acting on behalf of one or more producers.
    Agent,
}

impl PeerRole {
    pub fn from_u32(v: u32) -> Self {
        match v {
            1 => PeerRole::Producer,
            3 => PeerRole::Agent,
            _ => PeerRole::Watcher,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            PeerRole::Producer => 1,
            PeerRole::Watcher => 2,
            PeerRole::Agent => 3,
        }
    }
}

/// The self-description a node advertises: identity, addresses, version,
/// role. Equality is field-wise and order-sensitive on `addresses` and
/// `producer_ids`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMeta {
    pub id: PeerId,
    /// Non-empty; index 0 is the primary advertised address.
    pub addresses: Vec<Multiaddr>,
    pub version: String,
    pub role: PeerRole,
    pub hidden: bool,
    pub producer_ids: Vec<PeerId>,
}

impl PeerMeta {
    /// The primary advertised address, if any.
    pub fn primary_address(&self) -> Option<&Multiaddr> {
        self.addresses.first()
    }

    /// Wire form of this meta.
    pub fn to_peer_address(&self) -> PeerAddress {
        // Fill the legacy single-address pair from the primary address so
        // old readers still get something dialable.
        let (address, port) = match self.primary_address().and_then(net::host_port) {
            Some((host, port)) => (host.to_string(), u32::from(port)),
            None => (String::new(), 0),
        };
        PeerAddress {
            address,
            port,
            peer_id: self.id.to_bytes(),
            addresses: self.addresses.iter().map(|a| a.to_string()).collect(),
            version: self.version.clone(),
            role: self.role.as_u32(),
            hidden: self.hidden,
            producer_ids: self.producer_ids.iter().map(|p| p.to_bytes()).collect(),
        }
    }

    /// Build metadata from a query's status payload.
    ///
    /// Legacy senders carry `address`/`port` at the top level of the sender
    /// record instead of multiaddrs; a single multiaddr is synthesized for
    /// them. The version falls back to the status-level string when the
    /// sender record has none.
    pub fn from_status(status: &Status) -> Result<Self, MetaError> {
        let sender = status.sender.as_ref().ok_or(MetaError::NoSender)?;
        let id = PeerId::from_bytes(&sender.peer_id).map_err(|_| MetaError::InvalidPeerId)?;

        let mut addresses = Vec::with_capacity(sender.addresses.len().max(1));
        for s in &sender.addresses {
            let ma = s
                .parse::<Multiaddr>()
                .map_err(|_| MetaError::InvalidAddress(s.clone()))?;
            addresses.push(ma);
        }
        if addresses.is_empty() {
            let port = u16::try_from(sender.port)
                .map_err(|_| MetaError::InvalidAddress(format!("port {}", sender.port)))?;
            addresses.push(net::to_multiaddr(&sender.address, port)?);
        }

        let mut version = sender.version.clone();
        if version.is_empty() || version == "(old)" {
            version = status.version.clone();
        }

        let mut producer_ids = Vec::with_capacity(sender.producer_ids.len());
        for raw in &sender.producer_ids {
            producer_ids.push(PeerId::from_bytes(raw).map_err(|_| MetaError::InvalidPeerId)?);
        }

        Ok(PeerMeta {
            id,
            addresses,
            version,
            role: PeerRole::from_u32(sender.role),
            hidden: sender.hidden,
            producer_ids,
        })
    }
}

/// The socket-level facts about a live connection, as observed by the
/// transport at handshake time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteConn {
    pub ip: IpAddr,
    pub port: u16,
    pub outbound: bool,
}

/// Abbreviated peer id for log lines.
pub fn short_peer_id(id: &PeerId) -> String {
    let full = id.to_base58();
    if full.len() > 10 {
        format!("{}*{}", &full[..2], &full[full.len() - 6..])
    } else {
        full
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> PeerMeta {
        PeerMeta {
            id: PeerId::random(),
            addresses: vec!["/ip4/211.4.5.6/tcp/7846".parse().unwrap()],
            version: "v2.0.0".to_string(),
            role: PeerRole::Watcher,
            hidden: false,
            producer_ids: vec![],
        }
    }

    #[test]
    fn wire_round_trip() {
        let meta = sample_meta();
        let addr = meta.to_peer_address();
        let status = Status {
            sender: Some(addr),
            version: "v2.0.0".to_string(),
            ..Status::default()
        };
        let parsed = PeerMeta::from_status(&status).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn legacy_address_upgraded() {
        let meta = sample_meta();
        let mut addr = meta.to_peer_address();
        addr.addresses.clear();
        addr.address = "211.4.5.6".to_string();
        addr.port = 7846;
        let status = Status {
            sender: Some(addr),
            ..Status::default()
        };
        let parsed = PeerMeta::from_status(&status).unwrap();
        assert_eq!(parsed.addresses, meta.addresses);
    }

    #[test]
    fn version_falls_back_to_status() {
        let meta = sample_meta();
        let mut addr = meta.to_peer_address();
        addr.version = String::new();
        let status = Status {
            sender: Some(addr),
            version: "v1.9.9".to_string(),
            ..Status::default()
        };
        let parsed = PeerMeta::from_status(&status).unwrap();
        assert_eq!(parsed.version, "v1.9.9");
    }

    #[test]
    fn missing_sender_rejected() {
        let status = Status::default();
        assert_eq!(PeerMeta::from_status(&status), Err(MetaError::NoSender));
    }

    #[test]
    fn no_address_rejected() {
        let meta = sample_meta();
        let mut addr = meta.to_peer_address();
        addr.addresses.clear();
        addr.address = String::new();
        let status = Status {
            sender: Some(addr),
            ..Status::default()
        };
        assert_eq!(PeerMeta::from_status(&status), Err(MetaError::NoAddress));
    }

    #[test]
    fn meta_equality_is_order_sensitive() {
        let mut a = sample_meta();
        a.addresses.push("/ip4/1.2.3.4/tcp/7846".parse().unwrap());
        let mut b = a.clone();
        b.addresses.reverse();
        assert_ne!(a, b);
    }

    #[test]
    fn short_form_keeps_ends() {
        let id = PeerId::random();
        let short = short_peer_id(&id);
        let full = id.to_base58();
        assert!(short.starts_with(&full[..2]));
        assert!(short.ends_with(&full[full.len() - 6..]));
    }
}
