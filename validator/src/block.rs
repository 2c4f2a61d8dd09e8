use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use ibft_core::{Proposal, ProposalHash, ValidatorId};

/// A demo block: just enough structure to be chained and agreed on. The
/// consensus engine only ever sees its number and hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub parent_hash: ProposalHash,
    pub timestamp: u64,
    pub proposer: ValidatorId,
    pub payload: Vec<u8>,
}

impl Block {
    pub fn genesis(proposer: ValidatorId) -> Self {
        Self {
            number: 0,
            parent_hash: ProposalHash::default(),
            timestamp: 0,
            proposer,
            payload: Vec::new(),
        }
    }

    /// Build the successor of `parent` with the given payload.
    pub fn build(parent: &Block, proposer: ValidatorId, payload: Vec<u8>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        Self {
            number: parent.number + 1,
            parent_hash: parent.hash(),
            timestamp,
            proposer,
            payload,
        }
    }
}

impl Proposal for Block {
    fn number(&self) -> u64 {
        self.number
    }

    fn hash(&self) -> ProposalHash {
        let encoded = bincode::serialize(self).expect("block serialization should never fail");
        let digest = Sha256::digest(&encoded);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        ProposalHash(hash)
    }
}
