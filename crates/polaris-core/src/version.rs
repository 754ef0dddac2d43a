//! The peer-version gate.
//!
//! Versions are `vMAJOR.MINOR.PATCH[-TAG]`; ordering is lexicographic on
//! `(major, minor, patch)` and ignores the tag. The admission range is
//! inclusive on both ends.

use std::cmp::Ordering;
use std::str::FromStr;

/// Oldest node version the rendezvous admits.
pub const MIN_PEER_VERSION: PeerVersion = PeerVersion::new(1, 3, 0);

/// Newest node version the rendezvous admits.
pub const MAX_PEER_VERSION: PeerVersion = PeerVersion::new(3, 0, 0);

/// A parsed node version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Pre-release tag, e.g. `rc1`; never participates in ordering.
    pub tag: Option<String>,
}

impl PeerVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            tag: None,
        }
    }
}

impl PartialOrd for PeerVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeerVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl FromStr for PeerVersion {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix('v').unwrap_or(s);
        let (numbers, tag) = match s.split_once('-') {
            Some((n, t)) if !t.is_empty() => (n, Some(t.to_string())),
            Some(_) => return Err(()),
            None => (s, None),
        };
        let mut parts = numbers.split('.');
        let major = parts.next().ok_or(())?.parse().map_err(|_| ())?;
        let minor = parts.next().ok_or(())?.parse().map_err(|_| ())?;
        let patch = parts.next().ok_or(())?.parse().map_err(|_| ())?;
        if parts.next().is_some() {
            return Err(());
        }
        Ok(PeerVersion {
            major,
            minor,
            patch,
            tag,
        })
    }
}

impl std::fmt::Display for PeerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(tag) = &self.tag {
            write!(f, "-{tag}")?;
        }
        Ok(())
    }
}

/// Whether a reported version string parses and falls inside the admission
/// range. Unparseable strings are never admitted.
pub fn check_peer_version(version: &str) -> bool {
    match version.parse::<PeerVersion>() {
        Ok(v) => MIN_PEER_VERSION <= v && v <= MAX_PEER_VERSION,
        Err(()) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain() {
        let v: PeerVersion = "v2.0.0".parse().unwrap();
        assert_eq!((v.major, v.minor, v.patch), (2, 0, 0));
        assert_eq!(v.tag, None);
    }

    #[test]
    fn parse_without_prefix() {
        let v: PeerVersion = "1.3.4".parse().unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 3, 4));
    }

    #[test]
    fn parse_with_tag() {
        let v: PeerVersion = "v2.1.0-rc1".parse().unwrap();
        assert_eq!(v.tag.as_deref(), Some("rc1"));
        assert_eq!(v.to_string(), "v2.1.0-rc1");
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", "v2", "v2.0", "2.0.0.0", "va.b.c", "v2.0.0-", "(old)"] {
            assert!(bad.parse::<PeerVersion>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn ordering_ignores_tag() {
        let a: PeerVersion = "v2.0.0-rc1".parse().unwrap();
        let b: PeerVersion = "v2.0.0".parse().unwrap();
        assert_eq!(a.cmp(&b), Ordering::Equal);
        let c: PeerVersion = "v2.0.1".parse().unwrap();
        assert!(a < c);
    }

    #[test]
    fn range_is_inclusive() {
        assert!(check_peer_version(&MIN_PEER_VERSION.to_string()));
        assert!(check_peer_version(&MAX_PEER_VERSION.to_string()));
        assert!(check_peer_version("v2.0.0"));
    }

    #[test]
    fn too_old_rejected() {
        assert!(!check_peer_version("v1.2.0"));
        assert!(!check_peer_version("v0.9.9"));
    }

    #[test]
    fn too_new_rejected() {
        assert!(!check_peer_version("v3.0.1"));
        assert!(!check_peer_version("v99.0.0"));
    }

    #[test]
    fn unparseable_rejected() {
        assert!(!check_peer_version(""));
        assert!(!check_peer_version("banana"));
    }
}
