use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use ibft_validator_set::{ProposerPolicy, ValidatorId, ValidatorSet};

/// Block height being agreed on (0-indexed; sequence n commits proposal n).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Sequence(pub u64);

/// Attempt number within a sequence, reset to 0 on commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Round(pub u64);

/// The pair identifying a consensus attempt. Ordering is lexicographic:
/// sequence first, then round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct View {
    pub sequence: Sequence,
    pub round: Round,
}

impl View {
    pub fn new(sequence: u64, round: u64) -> Self {
        Self {
            sequence: Sequence(sequence),
            round: Round(round),
        }
    }
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.sequence.0, self.round.0)
    }
}

/// Content digest of a proposal. The zero digest marks ROUND CHANGE subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ProposalHash(pub [u8; 32]);

impl ProposalHash {
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl std::fmt::Display for ProposalHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// What the engine needs to know about a proposal. The content stays opaque;
/// the backend validates it and the engine only tracks number and digest.
pub trait Proposal:
    Clone + std::fmt::Debug + Send + Serialize + DeserializeOwned + 'static
{
    /// Monotonic height of this proposal.
    fn number(&self) -> u64;
    /// Collision-resistant content digest.
    fn hash(&self) -> ProposalHash;
}

/// A proposal handed in by an external block builder, awaiting consensus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request<P> {
    pub proposal: P,
}

/// The common payload of PREPARE, COMMIT, and ROUND CHANGE messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub view: View,
    pub digest: ProposalHash,
}

/// The proposer's opening message for a view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preprepare<P> {
    pub view: View,
    pub proposal: P,
}

/// Phase of the current view. Ordered: a node in `Prepared` has passed
/// through `Preprepared`, and comparisons like `state < Prepared` gate
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    AcceptRequest,
    Preprepared,
    Prepared,
    Committed,
}
