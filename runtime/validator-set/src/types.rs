use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

/// Wrapper around an Ed25519 public key identifying a validator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatorId(pub VerifyingKey);

impl ValidatorId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form: first 4 bytes of the key, enough to tell validators apart in logs.
        write!(f, "{}", hex::encode(&self.as_bytes()[..4]))
    }
}

/// How the proposer for a view is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposerPolicy {
    /// The proposer index advances on every new round and every new sequence.
    RoundRobin,
    /// The proposer keeps its slot across round changes; only a commit moves
    /// it to the next validator.
    Sticky,
}

impl Default for ProposerPolicy {
    fn default() -> Self {
        ProposerPolicy::RoundRobin
    }
}
