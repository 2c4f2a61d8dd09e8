use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use parking_lot::Mutex;

use ibft_core::{
    commit_seal_bytes, Backend, BackendError, EventSender, Proposal, ProposalError, ProposalHash,
    Sequence, ValidatorId, ValidatorSet,
};
use ibft_validator_set::ProposerPolicy;

use crate::block::Block;

/// Backend for one in-process validator. Broadcast loops every payload into
/// each peer's event channel (the local engine included); the chain is a
/// plain vector behind a mutex.
pub struct LoopbackBackend {
    key: SigningKey,
    validators: Vec<ValidatorId>,
    policy: ProposerPolicy,
    chain: Mutex<Vec<Block>>,
    peers: Mutex<Vec<EventSender<Block>>>,
    own: Mutex<Option<EventSender<Block>>>,
}

impl LoopbackBackend {
    pub fn new(key: SigningKey, validators: Vec<ValidatorId>, policy: ProposerPolicy) -> Self {
        let genesis = Block::genesis(validators[0].clone());
        Self {
            key,
            validators,
            policy,
            chain: Mutex::new(vec![genesis]),
            peers: Mutex::new(Vec::new()),
            own: Mutex::new(None),
        }
    }

    /// Wire this backend to every engine in the cluster.
    pub fn set_peers(&self, peers: Vec<EventSender<Block>>) {
        *self.peers.lock() = peers;
    }

    /// Register the local engine for final-committed notifications.
    pub fn set_own(&self, own: EventSender<Block>) {
        *self.own.lock() = Some(own);
    }

    pub fn head(&self) -> Block {
        self.chain.lock().last().cloned().expect("chain has genesis")
    }

    pub fn height(&self) -> u64 {
        self.head().number
    }

    fn quorum(&self) -> usize {
        2 * (self.validators.len().saturating_sub(1) / 3) + 1
    }

    /// Count distinct validators behind a set of committed seals.
    fn distinct_sealers(&self, digest: &ProposalHash, seals: &[Signature]) -> usize {
        let seal_bytes = commit_seal_bytes(digest);
        let mut sealers: Vec<&ValidatorId> = Vec::new();
        for seal in seals {
            let signer = self
                .validators
                .iter()
                .find(|validator| validator.0.verify(&seal_bytes, seal).is_ok());
            if let Some(validator) = signer {
                if !sealers.contains(&validator) {
                    sealers.push(validator);
                }
            }
        }
        sealers.len()
    }
}

impl Backend for LoopbackBackend {
    type Proposal = Block;

    fn address(&self) -> ValidatorId {
        ValidatorId(self.key.verifying_key())
    }

    fn validators(&self, _sequence: Sequence) -> ValidatorSet {
        ValidatorSet::new(self.validators.clone(), self.policy)
    }

    fn sign(&self, data: &[u8]) -> Signature {
        self.key.sign(data)
    }

    fn broadcast(&self, _validators: &ValidatorSet, payload: Vec<u8>) -> Result<(), BackendError> {
        for peer in self.peers.lock().iter() {
            peer.message(payload.clone());
        }
        Ok(())
    }

    fn gossip(&self, _validators: &ValidatorSet, _payload: Vec<u8>) -> Result<(), BackendError> {
        // Fully connected loopback topology: broadcast already reached everyone.
        Ok(())
    }

    fn validate(&self, proposal: &Block) -> Result<(), ProposalError> {
        if proposal.payload.len() > 64 * 1024 {
            return Err(ProposalError::BadProposal);
        }
        Ok(())
    }

    fn verify(&self, proposal: &Block) -> Result<(), ProposalError> {
        let head = self.head();
        if proposal.number > head.number + 1 {
            return Err(ProposalError::FutureProposal {
                retry_in: std::time::Duration::from_millis(250),
            });
        }
        if proposal.number == head.number + 1 && proposal.parent_hash != head.hash() {
            return Err(ProposalError::BadProposal);
        }
        self.validate(proposal)
    }

    fn commit(&self, proposal: Block, seals: Vec<Signature>) -> Result<(), BackendError> {
        let digest = proposal.hash();
        {
            let mut chain = self.chain.lock();
            let head = chain.last().expect("chain has genesis");
            if proposal.number != head.number + 1 {
                return Err(BackendError::Commit(format!(
                    "block {} does not extend head {}",
                    proposal.number, head.number
                )));
            }
            let sealers = self.distinct_sealers(&digest, &seals);
            if sealers < self.quorum() {
                return Err(BackendError::Commit(format!(
                    "quorum certificate has {sealers} sealers, need {}",
                    self.quorum()
                )));
            }
            tracing::info!(
                validator = %self.address(),
                number = proposal.number,
                hash = %digest,
                sealers,
                "block committed"
            );
            chain.push(proposal);
        }
        if let Some(own) = self.own.lock().as_ref() {
            own.final_committed();
        }
        Ok(())
    }

    fn last_proposal(&self) -> (Block, ValidatorId) {
        let head = self.head();
        let proposer = head.proposer.clone();
        (head, proposer)
    }

    fn has_bad_proposal(&self, _hash: &ProposalHash) -> bool {
        false
    }
}
