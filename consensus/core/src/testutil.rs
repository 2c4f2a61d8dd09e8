//! Shared helpers for unit tests across the crate.

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::message::{encode_payload, Message, MessageCode};
use crate::types::{
    Proposal, ProposalHash, ProposerPolicy, Subject, ValidatorId, ValidatorSet, View,
};

/// Minimal proposal: a number plus opaque payload bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestProposal {
    pub number: u64,
    pub payload: Vec<u8>,
}

impl TestProposal {
    pub fn new(number: u64) -> Self {
        Self {
            number,
            payload: number.to_le_bytes().to_vec(),
        }
    }
}

impl Proposal for TestProposal {
    fn number(&self) -> u64 {
        self.number
    }

    fn hash(&self) -> ProposalHash {
        let encoded = bincode::serialize(self).expect("test proposal encodes");
        let digest = Sha256::digest(&encoded);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        ProposalHash(hash)
    }
}

pub fn make_keys(n: usize) -> Vec<SigningKey> {
    (0..n).map(|_| SigningKey::generate(&mut OsRng)).collect()
}

pub fn validator_id(key: &SigningKey) -> ValidatorId {
    ValidatorId(key.verifying_key())
}

pub fn make_validator_set(keys: &[SigningKey], policy: ProposerPolicy) -> ValidatorSet {
    ValidatorSet::new(keys.iter().map(validator_id).collect(), policy)
}

/// A signed PREPARE/COMMIT/ROUND CHANGE carrying the given subject.
pub fn signed_subject_message(
    key: &SigningKey,
    code: MessageCode,
    view: View,
    digest: ProposalHash,
) -> Message {
    let seal = (code == MessageCode::Commit)
        .then(|| key.sign(&crate::message::commit_seal_bytes(&digest)));
    Message::signed(
        code,
        encode_payload(&Subject { view, digest }),
        validator_id(key),
        seal,
        |bytes| key.sign(bytes),
    )
}
