//! Chain identity and the fork-aware accessor used by the admission gate.

use serde::{Deserialize, Serialize};

use crate::error::ChainIdError;

/// Structured tag uniquely identifying a blockchain network.
///
/// Two chain ids are equal for admission iff all fields match; the
/// `version` field tracks hard-fork schedules and is compared against the
/// version in force at the remote peer's reported best height, so peers on
/// a future fork of the same chain are not spuriously rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainId {
    pub magic: String,
    pub public: bool,
    pub mainnet: bool,
    pub consensus: String,
    pub version: i32,
}

impl ChainId {
    /// Serialized wire form. Comparison of two chain ids is byte-exact on
    /// this form apart from the fork-versioning rule above.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ChainIdError> {
        serde_json::to_vec(self).map_err(|e| ChainIdError::Malformed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChainIdError> {
        serde_json::from_slice(bytes).map_err(|e| ChainIdError::Malformed(e.to_string()))
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}(public={},mainnet={},v{})",
            self.magic, self.consensus, self.public, self.mainnet, self.version
        )
    }
}

/// Yields the chain id in force at a given block height.
///
/// Simple deployments return a fixed id; forked networks wire a schedule
/// through so admission remains stable across forks.
pub trait ChainIdProvider: Send + Sync + 'static {
    /// The chain id at genesis.
    fn genesis_id(&self) -> ChainId;

    /// The chain id in force at `height`. Defaults to the genesis id.
    fn id_at(&self, _height: u64) -> ChainId {
        self.genesis_id()
    }
}

impl ChainIdProvider for ChainId {
    fn genesis_id(&self) -> ChainId {
        self.clone()
    }
}

/// A block-height-indexed chain-id version schedule.
///
/// Each entry `(height, version)` means the chain id switches to `version`
/// from `height` onward. Entries must be sorted by ascending height.
#[derive(Debug, Clone)]
pub struct ForkSchedule {
    genesis: ChainId,
    forks: Vec<(u64, i32)>,
}

impl ForkSchedule {
    pub fn new(genesis: ChainId, forks: Vec<(u64, i32)>) -> Self {
        debug_assert!(forks.windows(2).all(|w| w[0].0 <= w[1].0));
        Self { genesis, forks }
    }
}

impl ChainIdProvider for ForkSchedule {
    fn genesis_id(&self) -> ChainId {
        self.genesis.clone()
    }

    fn id_at(&self, height: u64) -> ChainId {
        let mut id = self.genesis.clone();
        for &(fork_height, version) in &self.forks {
            if height >= fork_height {
                id.version = version;
            } else {
                break;
            }
        }
        id
    }
}
