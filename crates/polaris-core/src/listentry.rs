//! Deny-list entries: predicates over `(ip, peer-id)` pairs.
//!
//! An entry carries a peer id, an exact IP, a CIDR range, or a
//! combination of the id with one address form. Entries with every field
//! empty are rejected, as are entries setting both an address and a range.

use libp2p::PeerId;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::EntryError;
use crate::net::canonical_ip;

/// An IP range in CIDR notation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix: u8,
}

impl CidrRange {
    /// Whether `ip` falls inside this range. Addresses of the other family
    /// never match.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, canonical_ip(ip)) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - u32::from(self.prefix))
                };
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(self.prefix))
                };
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }
}

impl FromStr for CidrRange {
    type Err = EntryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip_part, prefix_part) = s
            .split_once('/')
            .ok_or_else(|| EntryError::InvalidCidr(s.to_string()))?;
        let network: IpAddr = ip_part
            .parse()
            .map_err(|_| EntryError::InvalidCidr(s.to_string()))?;
        let prefix: u8 = prefix_part
            .parse()
            .map_err(|_| EntryError::InvalidCidr(s.to_string()))?;
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return Err(EntryError::InvalidCidr(s.to_string()));
        }
        Ok(CidrRange {
            network: canonical_ip(network),
            prefix,
        })
    }
}

impl std::fmt::Display for CidrRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// The persisted JSON shape of an entry: optional base58 peer id, textual
/// IP, and textual CIDR. Unknown fields in the file are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub peerid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cidr: String,
}

/// A validated deny-list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub peer_id: Option<PeerId>,
    pub address: Option<IpAddr>,
    pub cidr: Option<CidrRange>,
}

impl ListEntry {
    /// Validate and build an entry from its raw textual form.
    pub fn from_raw(raw: &RawEntry) -> Result<Self, EntryError> {
        if raw.peerid.is_empty() && raw.address.is_empty() && raw.cidr.is_empty() {
            return Err(EntryError::Empty);
        }
        if !raw.address.is_empty() && !raw.cidr.is_empty() {
            return Err(EntryError::AddressAndCidr);
        }
        let peer_id = if raw.peerid.is_empty() {
            None
        } else {
            Some(
                raw.peerid
                    .parse::<PeerId>()
                    .map_err(|_| EntryError::InvalidPeerId(raw.peerid.clone()))?,
            )
        };
        let address = if raw.address.is_empty() {
            None
        } else {
            Some(canonical_ip(
                raw.address
                    .parse::<IpAddr>()
                    .map_err(|_| EntryError::InvalidAddress(raw.address.clone()))?,
            ))
        };
        let cidr = if raw.cidr.is_empty() {
            None
        } else {
            Some(raw.cidr.parse::<CidrRange>()?)
        };
        Ok(ListEntry {
            peer_id,
            address,
            cidr,
        })
    }

    /// Parse an entry from its JSON text.
    pub fn parse(text: &str) -> Result<Self, EntryError> {
        let raw: RawEntry =
            serde_json::from_str(text).map_err(|e| EntryError::Malformed(e.to_string()))?;
        Self::from_raw(&raw)
    }

    /// Raw textual form, suitable for persisting or listing.
    pub fn to_raw(&self) -> RawEntry {
        RawEntry {
            peerid: self.peer_id.map(|p| p.to_base58()).unwrap_or_default(),
            address: self.address.map(|a| a.to_string()).unwrap_or_default(),
            cidr: self.cidr.as_ref().map(|c| c.to_string()).unwrap_or_default(),
        }
    }

    /// Whether a connection from `(ip, pid)` matches this entry. Every
    /// component present must match; absent components match anything.
    pub fn contains(&self, ip: IpAddr, pid: &PeerId) -> bool {
        if let Some(want) = &self.peer_id {
            if want != pid {
                return false;
            }
        }
        if let Some(want) = self.address {
            if want != canonical_ip(ip) {
                return false;
            }
        }
        if let Some(range) = &self.cidr {
            if !range.contains(ip) {
                return false;
            }
        }
        true
    }
}

impl std::fmt::Display for ListEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(&self.to_raw()) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("{}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_ID: &str = "16Uiu2HAmPZE7gT1hF2bjpg1UVH65xyNUbBVRf3mBFBJpz3tgLGGt";
    const OTHER_ID: &str = "16Uiu2HAkvvhjxVm2WE9yFBDdPQ9qx6pX9taF6TTwDNHs8VPi1EeR";

    fn id(s: &str) -> PeerId {
        s.parse().unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    // ---------------------------------------------------------------------
    // Parsing
    // ---------------------------------------------------------------------

    #[test]
    fn parse_id_and_address() {
        let e = ListEntry::parse(&format!(
            r#"{{"peerid":"{SAMPLE_ID}", "address":"172.21.3.35"}}"#
        ))
        .unwrap();
        assert_eq!(e.peer_id, Some(id(SAMPLE_ID)));
        assert_eq!(e.address, Some(ip("172.21.3.35")));
        assert_eq!(e.cidr, None);
    }

    #[test]
    fn parse_empty_strings_mean_absent() {
        let e = ListEntry::parse(&format!(
            r#"{{"peerid":"{SAMPLE_ID}", "address":"", "cidr":""}}"#
        ))
        .unwrap();
        assert!(e.address.is_none());
        assert!(e.cidr.is_none());
        assert!(e.peer_id.is_some());
    }

    #[test]
    fn parse_address_only_v6() {
        let e = ListEntry::parse(r#"{"address":"::0123:4567:89ab:cdef:1234:5678"}"#).unwrap();
        assert!(e.peer_id.is_none());
        assert!(e.address.is_some());
    }

    #[test]
    fn parse_id_with_range() {
        let e = ListEntry::parse(&format!(r#"{{"peerid":"{SAMPLE_ID}", "cidr":"172.21.3.35/24"}}"#))
            .unwrap();
        assert!(e.peer_id.is_some());
        assert!(e.cidr.is_some());
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(ListEntry::parse(":").is_err());
        assert!(ListEntry::parse(&format!(r#""{SAMPLE_ID}""#)).is_err());
        assert!(ListEntry::parse(r#""172.21.3.35/24""#).is_err());
    }

    #[test]
    fn parse_rejects_bad_components() {
        // broken base58 id
        assert!(ListEntry::parse(r#"{"peerid":"16Uiu2HAmPZ@@"}"#).is_err());
        // out-of-range octet
        assert!(ListEntry::parse(r#"{"address":"172.21.3.355"}"#).is_err());
        // cidr syntax in the address field
        assert!(ListEntry::parse(r#"{"address":"172.21.3.35/24"}"#).is_err());
        // address syntax in the cidr field
        assert!(ListEntry::parse(r#"{"cidr":":12001:0db8::1/96"}"#).is_err());
    }

    #[test]
    fn parse_rejects_empty_entry() {
        assert_eq!(ListEntry::parse("{}"), Err(EntryError::Empty));
    }

    #[test]
    fn parse_rejects_address_and_cidr_together() {
        let err = ListEntry::parse(&format!(
            r#"{{"peerid":"{SAMPLE_ID}", "address":"172.21.3.35", "cidr":"172.21.3.35/24"}}"#
        ))
        .unwrap_err();
        assert_eq!(err, EntryError::AddressAndCidr);
    }

    // ---------------------------------------------------------------------
    // Matching
    // ---------------------------------------------------------------------

    #[test]
    fn id_and_address_require_both() {
        let e = ListEntry::parse(&format!(
            r#"{{"peerid":"{SAMPLE_ID}", "address":"122.1.3.4"}}"#
        ))
        .unwrap();
        assert!(e.contains(ip("122.1.3.4"), &id(SAMPLE_ID)));
        assert!(!e.contains(ip("2001:db8::1"), &id(SAMPLE_ID)));
        assert!(!e.contains(ip("122.1.3.4"), &id(OTHER_ID)));
    }

    #[test]
    fn id_only_ignores_address() {
        let e = ListEntry::parse(&format!(r#"{{"peerid":"{SAMPLE_ID}"}}"#)).unwrap();
        assert!(e.contains(ip("122.1.3.4"), &id(SAMPLE_ID)));
        assert!(e.contains(ip("2001:db8::1"), &id(SAMPLE_ID)));
        assert!(!e.contains(ip("122.1.3.4"), &id(OTHER_ID)));
    }

    #[test]
    fn address_only_ignores_id() {
        let e = ListEntry::parse(r#"{"address":"122.1.3.4"}"#).unwrap();
        assert!(e.contains(ip("122.1.3.4"), &id(SAMPLE_ID)));
        assert!(e.contains(ip("122.1.3.4"), &id(OTHER_ID)));
        assert!(!e.contains(ip("2001:db8::1"), &id(OTHER_ID)));
    }

    #[test]
    fn cidr_only_matches_range() {
        let e = ListEntry::parse(r#"{"peerid":"", "cidr":"122.1.3.4/24"}"#).unwrap();
        assert!(e.contains(ip("122.1.3.251"), &id(OTHER_ID)));
        assert!(!e.contains(ip("122.1.4.251"), &id(OTHER_ID)));
    }

    #[test]
    fn id_with_range_requires_both() {
        let e24 = ListEntry::parse(&format!(r#"{{"peerid":"{SAMPLE_ID}", "cidr":"122.1.3.4/24"}}"#))
            .unwrap();
        assert!(e24.contains(ip("122.1.3.251"), &id(SAMPLE_ID)));
        assert!(!e24.contains(ip("122.1.3.251"), &id(OTHER_ID)));
        assert!(!e24.contains(ip("122.1.2.4"), &id(SAMPLE_ID)));
        assert!(!e24.contains(ip("122.1.4.4"), &id(SAMPLE_ID)));

        let e16 = ListEntry::parse(&format!(r#"{{"peerid":"{SAMPLE_ID}", "cidr":"122.1.3.4/16"}}"#))
            .unwrap();
        assert!(e16.contains(ip("122.1.4.251"), &id(SAMPLE_ID)));
        assert!(!e16.contains(ip("122.2.3.251"), &id(SAMPLE_ID)));

        let e8 = ListEntry::parse(&format!(r#"{{"peerid":"{SAMPLE_ID}", "cidr":"122.1.3.4/8"}}"#))
            .unwrap();
        assert!(e8.contains(ip("122.2.33.251"), &id(SAMPLE_ID)));
        assert!(!e8.contains(ip("121.1.3.251"), &id(SAMPLE_ID)));
        assert!(!e8.contains(ip("123.1.3.251"), &id(SAMPLE_ID)));
    }

    #[test]
    fn v6_range() {
        let e = ListEntry::parse(r#"{"cidr":"2001:0db8:0123:4567:89ab:cdef:1234:5678/96"}"#)
            .unwrap();
        assert!(e.contains(ip("2001:db8:123:4567:89ab:cdef:ffff:ffff"), &id(OTHER_ID)));
        assert!(!e.contains(ip("2001:db8:123:4567:89ab:cdee:1234:5678"), &id(OTHER_ID)));
        // v4 never matches a v6 range
        assert!(!e.contains(ip("122.1.3.4"), &id(OTHER_ID)));
    }

    #[test]
    fn mapped_v4_matches_v4_entry() {
        let e = ListEntry::parse(r#"{"address":"122.1.3.4"}"#).unwrap();
        assert!(e.contains(ip("::ffff:122.1.3.4"), &id(OTHER_ID)));
    }

    // ---------------------------------------------------------------------
    // Serialization
    // ---------------------------------------------------------------------

    #[test]
    fn display_round_trips() {
        for text in [
            format!(r#"{{"peerid":"{SAMPLE_ID}", "address":"172.21.3.35"}}"#),
            format!(r#"{{"peerid":"{SAMPLE_ID}", "cidr":"172.21.3.35/16"}}"#),
            format!(r#"{{"peerid":"{SAMPLE_ID}"}}"#),
            r#"{"cidr":"172.21.3.35/16"}"#.to_string(),
            r#"{"address":"2001:db8:123:4567:89ab:cdef:1234:5678"}"#.to_string(),
        ] {
            let entry = ListEntry::parse(&text).unwrap();
            let again = ListEntry::parse(&entry.to_string()).unwrap();
            assert_eq!(entry, again, "entry {text} did not round-trip");
        }
    }
}
