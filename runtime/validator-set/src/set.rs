use serde::{Deserialize, Serialize};

use crate::types::{ProposerPolicy, ValidatorId};

/// An ordered set of validators, frozen for the lifetime of a sequence.
///
/// Membership is fixed at construction; the only mutable piece is the
/// current proposer, recomputed at sequence and round boundaries via
/// [`ValidatorSet::calc_proposer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorSet {
    /// Validators sorted by key bytes so every node agrees on indices.
    validators: Vec<ValidatorId>,
    policy: ProposerPolicy,
    /// Index of the current proposer in `validators`.
    proposer: usize,
}

impl ValidatorSet {
    /// Build a set from the given validators. Duplicates are collapsed and
    /// the set is sorted by key bytes for a canonical ordering.
    pub fn new(mut validators: Vec<ValidatorId>, policy: ProposerPolicy) -> Self {
        validators.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
        validators.dedup();
        Self {
            validators,
            policy,
            proposer: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Maximum number of Byzantine validators the set tolerates: ⌊(N-1)/3⌋.
    pub fn f(&self) -> usize {
        self.validators.len().saturating_sub(1) / 3
    }

    /// The Byzantine quorum 2f+1.
    pub fn quorum(&self) -> usize {
        2 * self.f() + 1
    }

    pub fn validators(&self) -> &[ValidatorId] {
        &self.validators
    }

    pub fn get_by_index(&self, index: usize) -> Option<&ValidatorId> {
        self.validators.get(index)
    }

    pub fn index_of(&self, validator: &ValidatorId) -> Option<usize> {
        self.validators.iter().position(|v| v == validator)
    }

    pub fn contains(&self, validator: &ValidatorId) -> bool {
        self.index_of(validator).is_some()
    }

    /// The proposer for the current view, if the set is non-empty.
    pub fn proposer(&self) -> Option<&ValidatorId> {
        self.validators.get(self.proposer)
    }

    pub fn is_proposer(&self, validator: &ValidatorId) -> bool {
        self.proposer() == Some(validator)
    }

    /// Recompute the proposer from the previous sequence's proposer and the
    /// current round, according to the configured policy.
    pub fn calc_proposer(&mut self, last_proposer: Option<&ValidatorId>, round: u64) {
        if self.validators.is_empty() {
            return;
        }
        let offset = last_proposer.and_then(|v| self.index_of(v));
        let seed = match self.policy {
            ProposerPolicy::RoundRobin => match offset {
                Some(offset) => offset as u64 + round + 1,
                // Last proposer unknown (genesis, or it left the set): seed from the round alone.
                None => round,
            },
            // Sticky ignores the round: the slot moves only when a commit
            // installs a new last proposer.
            ProposerPolicy::Sticky => match offset {
                Some(offset) => offset as u64 + 1,
                None => 0,
            },
        };
        self.proposer = (seed % self.validators.len() as u64) as usize;
    }
}
