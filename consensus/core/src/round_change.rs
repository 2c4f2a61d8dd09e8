use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::error::ConsensusError;
use crate::message::Message;
use crate::message_set::MessageSet;
use crate::types::{Round, ValidatorSet};

/// ROUND CHANGE messages bucketed by target round.
///
/// `max_round(f+1)` finds weak certificates, `add` returning 2f+1 marks a
/// strong one. Reset each sequence; rounds below the current one are pruned
/// on round advance. Guarded by its own mutex: inbound fan-in inserts while
/// the event loop reads counts.
#[derive(Debug)]
pub struct RoundChangeSet {
    validators: ValidatorSet,
    sets: Mutex<BTreeMap<u64, MessageSet>>,
}

impl RoundChangeSet {
    pub fn new(validators: ValidatorSet) -> Self {
        Self {
            validators,
            sets: Mutex::new(BTreeMap::new()),
        }
    }

    /// Insert a ROUND CHANGE for the given target round and return the
    /// number of distinct authors now behind that round.
    pub fn add(&self, round: Round, message: Message) -> Result<usize, ConsensusError> {
        let mut sets = self.sets.lock();
        let set = sets
            .entry(round.0)
            .or_insert_with(|| MessageSet::new(self.validators.clone()));
        set.add(message)?;
        Ok(set.size())
    }

    /// Drop buckets for rounds below `round`, plus any empty ones.
    pub fn clear(&self, round: Round) {
        let mut sets = self.sets.lock();
        sets.retain(|&r, set| r >= round.0 && set.size() > 0);
    }

    /// The largest round backed by at least `threshold` distinct authors.
    pub fn max_round(&self, threshold: usize) -> Option<Round> {
        let sets = self.sets.lock();
        sets.iter()
            .rev()
            .find(|(_, set)| set.size() >= threshold)
            .map(|(&round, _)| Round(round))
    }
}
