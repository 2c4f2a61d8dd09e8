use crate::message_set::MessageSet;
use crate::types::{Preprepare, Proposal, ProposalHash, Request, Round, Sequence, Subject, View, ValidatorSet};

/// Per-view consensus bookkeeping: the accepted preprepare, the PREPARE and
/// COMMIT sets, the locked hash, and the pending request.
///
/// Reset on every view change. Within a sequence, a round change keeps the
/// pending request, and keeps the preprepare and locked hash when the node
/// is locked; a sequence change clears everything.
#[derive(Debug)]
pub struct RoundState<P> {
    view: View,
    preprepare: Option<Preprepare<P>>,
    pub prepares: MessageSet,
    pub commits: MessageSet,
    locked_hash: Option<ProposalHash>,
    pending_request: Option<Request<P>>,
}

impl<P: Proposal> RoundState<P> {
    pub fn new(view: View, validators: &ValidatorSet) -> Self {
        Self {
            view,
            preprepare: None,
            prepares: MessageSet::new(validators.clone()),
            commits: MessageSet::new(validators.clone()),
            locked_hash: None,
            pending_request: None,
        }
    }

    /// Move to a new round of the same sequence. `keep_lock` carries the
    /// locked proposal over so it can be re-proposed or re-committed.
    pub fn start_round(&mut self, view: View, validators: &ValidatorSet, keep_lock: bool) {
        debug_assert_eq!(view.sequence, self.view.sequence);
        self.view = view;
        self.prepares = MessageSet::new(validators.clone());
        self.commits = MessageSet::new(validators.clone());
        if !keep_lock {
            self.preprepare = None;
            self.locked_hash = None;
        }
    }

    /// Move to the first round of a new sequence, discarding all state.
    pub fn start_sequence(&mut self, view: View, validators: &ValidatorSet) {
        self.view = view;
        self.preprepare = None;
        self.prepares = MessageSet::new(validators.clone());
        self.commits = MessageSet::new(validators.clone());
        self.locked_hash = None;
        self.pending_request = None;
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn sequence(&self) -> Sequence {
        self.view.sequence
    }

    pub fn round(&self) -> Round {
        self.view.round
    }

    /// The subject PREPARE/COMMIT messages must carry for this view.
    pub fn subject(&self) -> Option<Subject> {
        self.preprepare.as_ref().map(|preprepare| Subject {
            view: self.view,
            digest: preprepare.proposal.hash(),
        })
    }

    pub fn proposal(&self) -> Option<&P> {
        self.preprepare.as_ref().map(|preprepare| &preprepare.proposal)
    }

    pub fn set_preprepare(&mut self, preprepare: Preprepare<P>) {
        self.preprepare = Some(preprepare);
    }

    /// Lock onto the accepted preprepare's digest.
    pub fn lock_hash(&mut self) {
        if let Some(preprepare) = &self.preprepare {
            self.locked_hash = Some(preprepare.proposal.hash());
        }
    }

    pub fn unlock_hash(&mut self) {
        self.locked_hash = None;
    }

    pub fn locked_hash(&self) -> Option<ProposalHash> {
        self.locked_hash
    }

    pub fn pending_request(&self) -> Option<&Request<P>> {
        self.pending_request.as_ref()
    }

    pub fn set_pending_request(&mut self, request: Request<P>) {
        self.pending_request = Some(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{make_keys, make_validator_set, TestProposal};
    use crate::types::ProposerPolicy;

    fn make_validators(n: usize) -> ValidatorSet {
        make_validator_set(&make_keys(n), ProposerPolicy::RoundRobin)
    }

    fn make_preprepare(view: View, number: u64) -> Preprepare<TestProposal> {
        Preprepare {
            view,
            proposal: TestProposal {
                number,
                payload: vec![1, 2, 3],
            },
        }
    }

    #[test]
    fn test_initial_state_is_empty() {
        let validators = make_validators(4);
        let state: RoundState<TestProposal> = RoundState::new(View::new(1, 0), &validators);

        assert!(state.subject().is_none());
        assert!(state.proposal().is_none());
        assert!(state.locked_hash().is_none());
        assert_eq!(state.prepares.size(), 0);
        assert_eq!(state.commits.size(), 0);
    }

    #[test]
    fn test_subject_follows_preprepare() {
        let validators = make_validators(4);
        let view = View::new(1, 0);
        let mut state = RoundState::new(view, &validators);
        let preprepare = make_preprepare(view, 1);
        let digest = preprepare.proposal.hash();
        state.set_preprepare(preprepare);

        let subject = state.subject().expect("subject after preprepare");
        assert_eq!(subject.view, view);
        assert_eq!(subject.digest, digest);
    }

    #[test]
    fn test_lock_requires_preprepare() {
        let validators = make_validators(4);
        let mut state: RoundState<TestProposal> = RoundState::new(View::new(1, 0), &validators);

        state.lock_hash();
        assert!(state.locked_hash().is_none(), "no preprepare, nothing to lock");

        state.set_preprepare(make_preprepare(View::new(1, 0), 1));
        state.lock_hash();
        assert!(state.locked_hash().is_some());
    }

    #[test]
    fn test_round_change_preserves_lock_and_request() {
        let validators = make_validators(4);
        let view = View::new(1, 0);
        let mut state = RoundState::new(view, &validators);
        let preprepare = make_preprepare(view, 1);
        let digest = preprepare.proposal.hash();
        state.set_preprepare(preprepare.clone());
        state.lock_hash();
        state.set_pending_request(Request {
            proposal: preprepare.proposal.clone(),
        });

        state.start_round(View::new(1, 1), &validators, true);

        assert_eq!(state.view(), View::new(1, 1));
        assert_eq!(state.locked_hash(), Some(digest));
        assert_eq!(state.proposal(), Some(&preprepare.proposal));
        assert!(state.pending_request().is_some());
        assert_eq!(state.prepares.size(), 0, "message sets reset each round");
    }

    #[test]
    fn test_round_change_without_lock_drops_preprepare() {
        let validators = make_validators(4);
        let view = View::new(1, 0);
        let mut state = RoundState::new(view, &validators);
        state.set_preprepare(make_preprepare(view, 1));
        state.set_pending_request(Request {
            proposal: TestProposal {
                number: 1,
                payload: vec![],
            },
        });

        state.start_round(View::new(1, 2), &validators, false);

        assert!(state.proposal().is_none());
        assert!(state.locked_hash().is_none());
        assert!(state.pending_request().is_some(), "request survives the round change");
    }

    #[test]
    fn test_new_sequence_discards_everything() {
        let validators = make_validators(4);
        let view = View::new(1, 3);
        let mut state = RoundState::new(view, &validators);
        state.set_preprepare(make_preprepare(view, 1));
        state.lock_hash();
        state.set_pending_request(Request {
            proposal: TestProposal {
                number: 1,
                payload: vec![],
            },
        });

        state.start_sequence(View::new(2, 0), &validators);

        assert_eq!(state.view(), View::new(2, 0));
        assert!(state.proposal().is_none());
        assert!(state.locked_hash().is_none());
        assert!(state.pending_request().is_none());
    }
}
