//! Identity and static facts about the running rendezvous host.

use libp2p::identity::Keypair;
use libp2p::PeerId;
use std::time::SystemTime;

/// The rendezvous service's own identity, shared read-only across
/// components that need to introduce the host on the wire.
#[derive(Clone)]
pub struct HostInfo {
    keypair: Keypair,
    id: PeerId,
    version: String,
    start_time: SystemTime,
}

impl HostInfo {
    pub fn new(keypair: Keypair, version: impl Into<String>) -> Self {
        let id = PeerId::from(keypair.public());
        Self {
            keypair,
            id,
            version: version.into(),
            start_time: SystemTime::now(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }
}

impl std::fmt::Debug for HostInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostInfo")
            .field("id", &self.id)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
