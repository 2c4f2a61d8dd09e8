//! End-to-end consensus tests: several validators wired through in-process
//! channel loopback, each running its own engine task.

use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::{Signature, Signer, SigningKey};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use ibft_core::{
    Backend, BackendError, Config, Core, EventSender, Proposal, ProposalError, ProposalHash,
    ProposerPolicy, Request, Sequence, TimeoutConfig, ValidatorId, ValidatorSet,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SimBlock {
    number: u64,
    parent: ProposalHash,
    proposer: ValidatorId,
    payload: Vec<u8>,
}

impl SimBlock {
    fn genesis(proposer: ValidatorId) -> Self {
        Self {
            number: 0,
            parent: ProposalHash::default(),
            proposer,
            payload: Vec::new(),
        }
    }

    fn next(parent: &SimBlock, proposer: ValidatorId) -> Self {
        Self {
            number: parent.number + 1,
            parent: parent.hash(),
            proposer,
            payload: (parent.number + 1).to_le_bytes().to_vec(),
        }
    }
}

impl Proposal for SimBlock {
    fn number(&self) -> u64 {
        self.number
    }

    fn hash(&self) -> ProposalHash {
        let encoded = bincode::serialize(self).expect("block encodes");
        let digest = Sha256::digest(&encoded);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        ProposalHash(hash)
    }
}

/// Backend for one simulated validator. Broadcast loops every payload into
/// each live peer's event channel, the local node included.
struct SimBackend {
    key: SigningKey,
    all: Vec<ValidatorId>,
    chain: Mutex<Vec<SimBlock>>,
    peers: Mutex<Vec<EventSender<SimBlock>>>,
    own: Mutex<Option<EventSender<SimBlock>>>,
}

impl SimBackend {
    fn new(key: SigningKey, all: Vec<ValidatorId>) -> Self {
        let genesis = SimBlock::genesis(all[0].clone());
        Self {
            key,
            all,
            chain: Mutex::new(vec![genesis]),
            peers: Mutex::new(Vec::new()),
            own: Mutex::new(None),
        }
    }

    fn head(&self) -> SimBlock {
        self.chain.lock().last().cloned().expect("chain has genesis")
    }

    fn height(&self) -> u64 {
        self.head().number
    }

    fn block_at(&self, number: u64) -> Option<SimBlock> {
        self.chain.lock().get(number as usize).cloned()
    }
}

impl Backend for SimBackend {
    type Proposal = SimBlock;

    fn address(&self) -> ValidatorId {
        ValidatorId(self.key.verifying_key())
    }

    fn validators(&self, _sequence: Sequence) -> ValidatorSet {
        ValidatorSet::new(self.all.clone(), ProposerPolicy::RoundRobin)
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
        // Fully connected topology: broadcast already reached everyone.
        Ok(())
    }

    fn validate(&self, proposal: &SimBlock) -> Result<(), ProposalError> {
        if proposal.payload.len() > 1024 {
            return Err(ProposalError::BadProposal);
        }
        Ok(())
    }

    fn verify(&self, proposal: &SimBlock) -> Result<(), ProposalError> {
        let head = self.head();
        if proposal.number > head.number + 1 {
            return Err(ProposalError::FutureProposal {
                retry_in: Duration::from_millis(50),
            });
        }
        if proposal.number == head.number + 1 && proposal.parent != head.hash() {
            return Err(ProposalError::BadProposal);
        }
        Ok(())
    }

    fn commit(&self, proposal: SimBlock, seals: Vec<Signature>) -> Result<(), BackendError> {
        {
            let mut chain = self.chain.lock();
            let head = chain.last().expect("chain has genesis");
            if proposal.number != head.number + 1 {
                return Err(BackendError::Commit("block does not extend the head".into()));
            }
            let quorum = ValidatorSet::new(self.all.clone(), ProposerPolicy::RoundRobin).quorum();
            if seals.len() < quorum {
                return Err(BackendError::Commit("quorum certificate too small".into()));
            }
            chain.push(proposal);
        }
        if let Some(own) = self.own.lock().as_ref() {
            own.final_committed();
        }
        Ok(())
    }

    fn last_proposal(&self) -> (SimBlock, ValidatorId) {
        let head = self.head();
        let proposer = head.proposer.clone();
        (head, proposer)
    }

    fn has_bad_proposal(&self, _hash: &ProposalHash) -> bool {
        false
    }
}

struct SimNode {
    backend: Arc<SimBackend>,
    sender: EventSender<SimBlock>,
}

/// Build a cluster of `n` validators and start engines for the ones marked
/// online. Offline validators exist in the set but never speak.
fn spawn_cluster(n: usize, online: &[bool], base_timeout: Duration) -> Vec<SimNode> {
    let mut keys: Vec<SigningKey> = (0..n).map(|_| SigningKey::generate(&mut OsRng)).collect();
    keys.sort_by(|a, b| {
        a.verifying_key()
            .as_bytes()
            .cmp(b.verifying_key().as_bytes())
    });
    let all: Vec<ValidatorId> = keys.iter().map(|k| ValidatorId(k.verifying_key())).collect();

    let config = Config {
        timeouts: TimeoutConfig {
            base: base_timeout,
            backoff: Duration::from_millis(100),
            max_backoff_exponent: 4,
        },
        backlog_capacity: 64,
    };

    let backends: Vec<Arc<SimBackend>> = keys
        .iter()
        .map(|key| Arc::new(SimBackend::new(key.clone(), all.clone())))
        .collect();

    let mut nodes = Vec::new();
    let mut senders = Vec::new();
    let mut cores = Vec::new();
    for (backend, &is_online) in backends.iter().zip(online) {
        if !is_online {
            continue;
        }
        let (core, sender) = Core::new(backend.clone(), config.clone());
        *backend.own.lock() = Some(sender.clone());
        senders.push(sender.clone());
        cores.push(core);
        nodes.push(SimNode {
            backend: backend.clone(),
            sender,
        });
    }
    // Everyone broadcasts to every online engine.
    for node in &nodes {
        *node.backend.peers.lock() = senders.clone();
    }
    for core in cores {
        tokio::spawn(core.run());
    }
    // Block builders: keep offering the next block on top of the local head.
    for node in &nodes {
        let backend = node.backend.clone();
        let sender = node.sender.clone();
        tokio::spawn(async move {
            let proposer = backend.address();
            loop {
                let head = backend.head();
                let offered = SimBlock::next(&head, proposer.clone());
                if !sender.request(Request { proposal: offered }) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        });
    }
    nodes
}

async fn wait_until<F: Fn() -> bool>(deadline: Duration, check: F) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn four_validators_commit_a_chain() {
    let nodes = spawn_cluster(4, &[true; 4], Duration::from_secs(2));

    let reached = wait_until(Duration::from_secs(20), || {
        nodes.iter().all(|node| node.backend.height() >= 3)
    })
    .await;
    assert!(reached, "all validators should commit three blocks");

    // Every validator committed the same blocks.
    for number in 1..=3 {
        let reference = nodes[0]
            .backend
            .block_at(number)
            .expect("block committed")
            .hash();
        for node in &nodes[1..] {
            assert_eq!(
                node.backend.block_at(number).expect("block committed").hash(),
                reference,
                "chains must agree at height {number}"
            );
        }
    }

    for node in &nodes {
        node.sender.stop();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn round_change_recovers_from_silent_proposer() {
    // The proposer of sequence 1 is validator 1 (round robin after the
    // genesis proposer at index 0). Keep it silent; the other three are
    // exactly a 2f+1 quorum and must recover via round change.
    let nodes = spawn_cluster(4, &[true, false, true, true], Duration::from_millis(300));
    assert_eq!(nodes.len(), 3);

    let reached = wait_until(Duration::from_secs(20), || {
        nodes.iter().all(|node| node.backend.height() >= 2)
    })
    .await;
    assert!(reached, "the live quorum should keep committing without the proposer");

    for number in 1..=2 {
        let reference = nodes[0]
            .backend
            .block_at(number)
            .expect("block committed")
            .hash();
        for node in &nodes[1..] {
            assert_eq!(
                node.backend.block_at(number).expect("block committed").hash(),
                reference
            );
        }
    }

    for node in &nodes {
        node.sender.stop();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_validator_advances_alone() {
    let nodes = spawn_cluster(1, &[true], Duration::from_secs(1));

    let reached = wait_until(Duration::from_secs(10), || nodes[0].backend.height() >= 3).await;
    assert!(reached, "a single validator is its own quorum");

    nodes[0].sender.stop();
}
