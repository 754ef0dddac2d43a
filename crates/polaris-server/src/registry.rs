//! The live peer registry: every peer currently believed reachable.

use libp2p::PeerId;
use parking_lot::{Mutex, RwLock};
use polaris_core::{PeerAddress, PeerMeta, RemoteConn};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info};

/// When a record was last verified. Monotonic time drives staleness; wall
/// time is reported to operators.
#[derive(Debug, Clone, Copy)]
struct CheckStamp {
    instant: Instant,
    wall: SystemTime,
}

impl CheckStamp {
    fn now() -> Self {
        CheckStamp {
            instant: Instant::now(),
            wall: SystemTime::now(),
        }
    }
}

/// One registered peer.
pub struct PeerState {
    pub meta: PeerMeta,
    /// The connection the registering query arrived over.
    pub conn: RemoteConn,
    pub best_hash: Vec<u8>,
    pub best_height: u64,
    /// When this peer first appeared with its current metadata.
    pub connected: SystemTime,
    cont_fail: AtomicU32,
    last_check: Mutex<CheckStamp>,
}

impl PeerState {
    fn new(
        meta: PeerMeta,
        conn: RemoteConn,
        best_hash: Vec<u8>,
        best_height: u64,
        connected: SystemTime,
    ) -> Self {
        PeerState {
            meta,
            conn,
            best_hash,
            best_height,
            connected,
            cont_fail: AtomicU32::new(0),
            last_check: Mutex::new(CheckStamp::now()),
        }
    }

    /// Record a successful liveness check.
    pub fn mark_alive(&self) {
        self.cont_fail.store(0, Ordering::Release);
        *self.last_check.lock() = CheckStamp::now();
    }

    /// Record a failed liveness check; returns the new consecutive-failure
    /// count.
    pub fn mark_failed(&self) -> u32 {
        *self.last_check.lock() = CheckStamp::now();
        self.cont_fail.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn cont_fail(&self) -> u32 {
        self.cont_fail.load(Ordering::Acquire)
    }

    /// How long ago the last check (of either outcome) happened.
    pub fn last_check_age(&self) -> Duration {
        self.last_check.lock().instant.elapsed()
    }

    /// Wall-clock time of the last check, for operator display.
    pub fn last_check_time(&self) -> SystemTime {
        self.last_check.lock().wall
    }

    /// Wire form of this record's metadata.
    pub fn to_peer_address(&self) -> PeerAddress {
        self.meta.to_peer_address()
    }
}

/// Registry of live peers, keyed by peer id.
#[derive(Default)]
pub struct PeerRegistry {
    inner: RwLock<HashMap<PeerId, Arc<PeerState>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a record after a successful registration.
    ///
    /// A reconnecting peer with unchanged metadata keeps its original
    /// `connected` time; changed metadata counts as a fresh appearance.
    /// Either way the record's check stamp resets and failures clear.
    pub fn register(
        &self,
        meta: PeerMeta,
        conn: RemoteConn,
        best_hash: Vec<u8>,
        best_height: u64,
    ) -> Arc<PeerState> {
        let mut map = self.inner.write();
        let connected = match map.get(&meta.id) {
            Some(prev) if prev.meta == meta => prev.connected,
            Some(_) => {
                debug!(peer = %meta.id, "peer re-registered with changed metadata");
                SystemTime::now()
            }
            None => {
                info!(peer = %meta.id, addr = ?meta.primary_address(), "new peer registered");
                SystemTime::now()
            }
        };
        let state = Arc::new(PeerState::new(
            meta.clone(),
            conn,
            best_hash,
            best_height,
            connected,
        ));
        map.insert(meta.id, Arc::clone(&state));
        state
    }

    /// Drop a record, returning it if present.
    pub fn unregister(&self, id: &PeerId) -> Option<Arc<PeerState>> {
        let removed = self.inner.write().remove(id);
        if let Some(state) = &removed {
            info!(peer = %id, cont_fail = state.cont_fail(), "peer unregistered");
        }
        removed
    }

    pub fn get(&self, id: &PeerId) -> Option<Arc<PeerState>> {
        self.inner.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Up to `limit` peer addresses for a query reply. Skips the requester
    /// itself, hidden peers, and everything in `excludes`; the result order
    /// is randomized so callers get differing samples.
    pub fn sample(
        &self,
        requester: &PeerId,
        excludes: &HashSet<PeerId>,
        limit: usize,
    ) -> Vec<PeerAddress> {
        let candidates: Vec<Arc<PeerState>> = {
            let map = self.inner.read();
            map.values()
                .filter(|s| {
                    !s.meta.hidden && s.meta.id != *requester && !excludes.contains(&s.meta.id)
                })
                .cloned()
                .collect()
        };
        let mut candidates = candidates;
        candidates.shuffle(&mut rand::thread_rng());
        candidates
            .iter()
            .take(limit)
            .map(|s| s.to_peer_address())
            .collect()
    }

    /// Records whose last check is older than `interval`.
    pub fn stale(&self, interval: Duration) -> Vec<Arc<PeerState>> {
        self.inner
            .read()
            .values()
            .filter(|s| s.last_check_age() > interval)
            .cloned()
            .collect()
    }

    /// All records, for administrative listing.
    pub fn snapshot(&self) -> Vec<Arc<PeerState>> {
        self.inner.read().values().cloned().collect()
    }
}
