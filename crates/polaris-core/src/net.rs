//! Address helpers: multiaddr extraction and public-range checks.

use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;
use std::net::IpAddr;

use crate::error::MetaError;

/// The host part of a dialable multiaddr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    Ip(IpAddr),
    /// DNS names are resolved lazily, at dial time.
    Name(String),
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Host::Ip(ip) => write!(f, "{ip}"),
            Host::Name(name) => f.write_str(name),
        }
    }
}

/// Extract the host and TCP port from a multiaddr, accepting exactly one of
/// {IPv4, IPv6, DNS name}. Returns `None` for addresses without both parts.
pub fn host_port(ma: &Multiaddr) -> Option<(Host, u16)> {
    let mut host = None;
    let mut port = None;
    for proto in ma.iter() {
        match proto {
            Protocol::Ip4(ip) => host = Some(Host::Ip(IpAddr::V4(ip))),
            Protocol::Ip6(ip) => host = Some(Host::Ip(IpAddr::V6(ip))),
            Protocol::Dns(name) | Protocol::Dns4(name) | Protocol::Dns6(name) => {
                host = Some(Host::Name(name.to_string()))
            }
            Protocol::Tcp(p) => port = Some(p),
            _ => {}
        }
    }
    match (host, port) {
        (Some(h), Some(p)) => Some((h, p)),
        _ => None,
    }
}

/// Build a TCP multiaddr from a textual host (IP literal or DNS name) and
/// port, the shape legacy `address`/`port` senders are upgraded to.
pub fn to_multiaddr(host: &str, port: u16) -> Result<Multiaddr, MetaError> {
    if host.is_empty() {
        return Err(MetaError::NoAddress);
    }
    let mut ma = Multiaddr::empty();
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => ma.push(Protocol::Ip4(ip)),
        Ok(IpAddr::V6(ip)) => ma.push(Protocol::Ip6(ip)),
        Err(_) => {
            // Reject things that are clearly not host names.
            if host.contains('/') || host.contains(' ') {
                return Err(MetaError::InvalidAddress(host.to_string()));
            }
            ma.push(Protocol::Dns(host.into()));
        }
    }
    ma.push(Protocol::Tcp(port));
    Ok(ma)
}

/// Whether an IP is publicly routable: not RFC1918, loopback, link-local,
/// unspecified, or (for v6) a unique-local address.
pub fn is_public_ip(ip: IpAddr) -> bool {
    match canonical_ip(ip) {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast())
        }
        IpAddr::V6(v6) => {
            let seg0 = v6.segments()[0];
            let unique_local = (seg0 & 0xfe00) == 0xfc00;
            let link_local = (seg0 & 0xffc0) == 0xfe80;
            !(v6.is_loopback() || v6.is_unspecified() || unique_local || link_local)
        }
    }
}

/// Whether a multiaddr points at a publicly reachable endpoint. DNS names
/// count as public; they resolve at dial time.
pub fn is_public_multiaddr(ma: &Multiaddr) -> bool {
    match host_port(ma) {
        Some((Host::Ip(ip), _)) => is_public_ip(ip),
        Some((Host::Name(_), _)) => true,
        None => false,
    }
}

/// Normalize IPv4-mapped IPv6 addresses so `::ffff:1.2.3.4` and `1.2.3.4`
/// compare equal everywhere in the deny-list.
pub fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => ip,
        },
        v4 => v4,
    }
}
