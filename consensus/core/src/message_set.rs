use std::collections::HashMap;

use crate::error::ConsensusError;
use crate::message::Message;
use crate::types::{ValidatorId, ValidatorSet};

/// Validator-indexed set of signed messages.
///
/// Inserts from non-members are rejected; a second message from the same
/// author silently replaces the first, so `size()` always counts distinct
/// authors and quorum checks cannot be inflated by repeats.
#[derive(Debug, Clone)]
pub struct MessageSet {
    validators: ValidatorSet,
    messages: HashMap<[u8; 32], Message>,
}

impl MessageSet {
    pub fn new(validators: ValidatorSet) -> Self {
        Self {
            validators,
            messages: HashMap::new(),
        }
    }

    /// Insert a message, replacing any prior message from the same author.
    pub fn add(&mut self, message: Message) -> Result<(), ConsensusError> {
        if !self.validators.contains(&message.author) {
            return Err(ConsensusError::UnauthorizedAddress);
        }
        self.messages.insert(*message.author.as_bytes(), message);
        Ok(())
    }

    /// Number of distinct authors represented.
    pub fn size(&self) -> usize {
        self.messages.len()
    }

    pub fn values(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    pub fn get(&self, author: &ValidatorId) -> Option<&Message> {
        self.messages.get(author.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{encode_payload, MessageCode};
    use crate::types::{ProposalHash, ProposerPolicy, Subject, View};
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    fn make_keys(n: usize) -> Vec<SigningKey> {
        (0..n).map(|_| SigningKey::generate(&mut OsRng)).collect()
    }

    fn make_set(keys: &[SigningKey]) -> ValidatorSet {
        ValidatorSet::new(
            keys.iter()
                .map(|k| ValidatorId(k.verifying_key()))
                .collect(),
            ProposerPolicy::RoundRobin,
        )
    }

    fn make_prepare(key: &SigningKey, digest: ProposalHash) -> Message {
        let subject = Subject {
            view: View::new(1, 0),
            digest,
        };
        Message::signed(
            MessageCode::Prepare,
            encode_payload(&subject),
            ValidatorId(key.verifying_key()),
            None,
            |bytes| key.sign(bytes),
        )
    }

    #[test]
    fn test_add_and_size() {
        let keys = make_keys(4);
        let mut set = MessageSet::new(make_set(&keys));

        for key in &keys[..3] {
            set.add(make_prepare(key, ProposalHash([1; 32]))).unwrap();
        }
        assert_eq!(set.size(), 3);
    }

    #[test]
    fn test_duplicate_author_replaces() {
        let keys = make_keys(4);
        let mut set = MessageSet::new(make_set(&keys));
        let author = ValidatorId(keys[0].verifying_key());

        set.add(make_prepare(&keys[0], ProposalHash([1; 32]))).unwrap();
        set.add(make_prepare(&keys[0], ProposalHash([2; 32]))).unwrap();

        assert_eq!(set.size(), 1, "same author must not count twice");
        let stored: Subject = set.get(&author).unwrap().decode_payload().unwrap();
        assert_eq!(stored.digest, ProposalHash([2; 32]), "later message wins");
    }

    #[test]
    fn test_unknown_author_rejected() {
        let keys = make_keys(4);
        let outsider = SigningKey::generate(&mut OsRng);
        let mut set = MessageSet::new(make_set(&keys));

        assert_eq!(
            set.add(make_prepare(&outsider, ProposalHash([1; 32]))),
            Err(ConsensusError::UnauthorizedAddress)
        );
        assert_eq!(set.size(), 0);
    }

    #[test]
    fn test_get_missing_author() {
        let keys = make_keys(4);
        let set = MessageSet::new(make_set(&keys));
        assert!(set.get(&ValidatorId(keys[1].verifying_key())).is_none());
    }
}
