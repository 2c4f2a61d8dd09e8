use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::Signature;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::backend::{Backend, Event, EventSender};
use crate::backlog::Backlog;
use crate::config::Config;
use crate::error::{ConsensusError, ProposalError};
use crate::message::{commit_seal_bytes, encode_payload, Message, MessageCode};
use crate::request::PendingRequests;
use crate::round_change::RoundChangeSet;
use crate::round_state::RoundState;
use crate::types::{
    Preprepare, Proposal, ProposalHash, Request, Round, State, Subject, ValidatorId, ValidatorSet,
    View,
};

/// Generation-stamped round timer. Each (re)schedule bumps the generation;
/// expiries from cancelled or superseded timers carry a stale generation and
/// are ignored by the handler.
#[derive(Debug)]
struct RoundTimer {
    tx: mpsc::UnboundedSender<u64>,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl RoundTimer {
    fn new(tx: mpsc::UnboundedSender<u64>) -> Self {
        Self {
            tx,
            generation: 0,
            task: None,
        }
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn schedule(&mut self, after: Duration) {
        self.cancel();
        let generation = self.generation;
        let tx = self.tx.clone();
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(generation);
        }));
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation += 1;
    }
}

/// The consensus engine for one validator.
///
/// Owns the round state exclusively; all handlers run serially on the event
/// loop started by [`Core::run`]. The backend feeds events in through the
/// [`EventSender`] returned from [`Core::new`], and the engine calls back
/// out through the [`Backend`] for signing, broadcast, and commit.
pub struct Core<B: Backend> {
    config: Config,
    backend: Arc<B>,
    address: ValidatorId,
    state: State,
    current: RoundState<B::Proposal>,
    validators: ValidatorSet,
    wait_round_change: bool,
    round_changes: RoundChangeSet,
    backlog: Backlog,
    pending_requests: PendingRequests<B::Proposal>,
    event_tx: mpsc::UnboundedSender<Event<B::Proposal>>,
    event_rx: Option<mpsc::UnboundedReceiver<Event<B::Proposal>>>,
    timer: RoundTimer,
    timeout_rx: Option<mpsc::UnboundedReceiver<u64>>,
    preprepare_retry: Option<JoinHandle<()>>,
}

impl<B: Backend> Core<B> {
    /// Build an engine anchored at the backend's last committed proposal.
    /// The returned sender is the only way to feed the engine.
    pub fn new(backend: Arc<B>, config: Config) -> (Self, EventSender<B::Proposal>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (timeout_tx, timeout_rx) = mpsc::unbounded_channel();

        let address = backend.address();
        let (last_proposal, last_proposer) = backend.last_proposal();
        let view = View::new(last_proposal.number() + 1, 0);
        let mut validators = backend.validators(view.sequence);
        validators.calc_proposer(Some(&last_proposer), 0);

        let current = RoundState::new(view, &validators);
        let round_changes = RoundChangeSet::new(validators.clone());
        let backlog = Backlog::new(config.backlog_capacity);
        let sender = EventSender::new(event_tx.clone());

        let core = Self {
            config,
            backend,
            address,
            state: State::AcceptRequest,
            current,
            validators,
            wait_round_change: false,
            round_changes,
            backlog,
            pending_requests: PendingRequests::new(),
            event_tx,
            event_rx: Some(event_rx),
            timer: RoundTimer::new(timeout_tx),
            timeout_rx: Some(timeout_rx),
            preprepare_retry: None,
        };
        (core, sender)
    }

    /// Drive the engine until an [`Event::Stop`] arrives or every sender is
    /// dropped. Consumes the engine; a fresh one is built for a restart.
    pub async fn run(mut self) {
        let (Some(mut events), Some(mut timeouts)) = (self.event_rx.take(), self.timeout_rx.take())
        else {
            return;
        };

        info!(address = %self.address, view = %self.current.view(), "consensus engine started");
        self.set_state(State::AcceptRequest);
        self.arm_round_timer();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(Event::Request(request)) => {
                        if let Err(err) = self.handle_request(request) {
                            trace!(error = %err, "request not accepted");
                        }
                    }
                    Some(Event::Message(payload)) => match self.handle_inbound(&payload) {
                        Ok(()) => {
                            let _ = self.backend.gossip(&self.validators, payload);
                        }
                        Err(err) => trace!(error = %err, "message dropped"),
                    },
                    Some(Event::Backlog(message)) => {
                        let _ = self.handle_checked(message.as_ref());
                    }
                    Some(Event::FinalCommitted) => self.handle_final_committed(),
                    Some(Event::Stop) | None => break,
                },
                Some(generation) = timeouts.recv() => self.handle_timeout(generation),
            }
        }

        self.timer.cancel();
        if let Some(task) = self.preprepare_retry.take() {
            task.abort();
        }
        info!(address = %self.address, "consensus engine stopped");
    }

    fn is_proposer(&self) -> bool {
        self.validators.is_proposer(&self.address)
    }

    /// Locked, and the locked proposal has not been flagged bad since.
    fn is_hash_locked(&self) -> bool {
        match self.current.locked_hash() {
            Some(hash) => !self.backend.has_bad_proposal(&hash),
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Message intake
    // ------------------------------------------------------------------

    /// Decode, authenticate, and dispatch a wire message. Signatures are
    /// checked exactly once, here; everything downstream trusts the author.
    fn handle_inbound(&mut self, payload: &[u8]) -> Result<(), ConsensusError> {
        let message = Message::decode(payload)?;
        if !self.validators.contains(&message.author) {
            return Err(ConsensusError::UnauthorizedAddress);
        }
        if !message.verify_signature() {
            return Err(ConsensusError::InvalidMessage);
        }
        self.handle_checked(&message)
    }

    /// Dispatch an authenticated message; future messages land in the
    /// backlog.
    fn handle_checked(&mut self, message: &Message) -> Result<(), ConsensusError> {
        let result = match message.code {
            MessageCode::Preprepare => self.handle_preprepare(message),
            MessageCode::Prepare => self.handle_prepare(message),
            MessageCode::Commit => self.handle_commit(message),
            MessageCode::RoundChange => self.handle_round_change(message),
        };
        if result == Err(ConsensusError::FutureMessage) {
            self.store_backlog(message);
        }
        result
    }

    /// Acceptance verdict for a message view against the current view.
    fn check_message(&self, code: MessageCode, view: View) -> Result<(), ConsensusError> {
        Self::check_message_against(self.state, self.wait_round_change, self.current.view(), code, view)
    }

    fn check_message_against(
        state: State,
        wait_round_change: bool,
        current: View,
        code: MessageCode,
        view: View,
    ) -> Result<(), ConsensusError> {
        if code == MessageCode::RoundChange {
            // ROUND CHANGE for any round of the current sequence is live.
            if view.sequence > current.sequence {
                return Err(ConsensusError::FutureMessage);
            }
            if view < current {
                return Err(ConsensusError::OldMessage);
            }
            return Ok(());
        }
        if view > current {
            return Err(ConsensusError::FutureMessage);
        }
        if view < current {
            return Err(ConsensusError::OldMessage);
        }
        // While waiting for a round change, only ROUND CHANGE moves us.
        if wait_round_change {
            return Err(ConsensusError::FutureMessage);
        }
        // Before a preprepare is accepted, PREPARE/COMMIT are premature.
        if state == State::AcceptRequest && code != MessageCode::Preprepare {
            return Err(ConsensusError::FutureMessage);
        }
        Ok(())
    }

    fn message_view(&self, message: &Message) -> Result<View, ConsensusError> {
        match message.code {
            MessageCode::Preprepare => message
                .decode_payload::<Preprepare<B::Proposal>>()
                .map(|preprepare| preprepare.view),
            _ => message.decode_payload::<Subject>().map(|subject| subject.view),
        }
    }

    fn store_backlog(&mut self, message: &Message) {
        // Own loopback messages are never backlogged.
        if message.author == self.address {
            return;
        }
        let Ok(view) = self.message_view(message) else {
            return;
        };
        trace!(code = %message.code, view = %view, author = %message.author, "stashing future message");
        self.backlog.store(*message.author.as_bytes(), view, message.clone());
    }

    /// Re-check every author's queued messages and replay the ones whose
    /// view has become current. The scan snapshot is taken first so the
    /// backlog mutex is never held across re-injection.
    fn process_backlog(&mut self) {
        let state = self.state;
        let wait_round_change = self.wait_round_change;
        let current = self.current.view();
        let ready = self.backlog.drain_ready(|code, view| {
            Self::check_message_against(state, wait_round_change, current, code, view)
        });
        for message in ready {
            trace!(code = %message.code, "replaying backlogged message");
            let _ = self.handle_checked(&message);
        }
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    fn handle_request(&mut self, request: Request<B::Proposal>) -> Result<(), ConsensusError> {
        match self.check_request(&request) {
            Err(ConsensusError::FutureMessage) => {
                trace!(number = request.proposal.number(), "storing future request");
                self.pending_requests.push(request);
                return Err(ConsensusError::FutureMessage);
            }
            Err(err) => return Err(err),
            Ok(()) => {}
        }
        if self.backend.validate(&request.proposal).is_err() {
            return Err(ConsensusError::InvalidMessage);
        }
        self.current.set_pending_request(request.clone());
        if self.state == State::AcceptRequest {
            self.send_preprepare(&request);
        }
        Ok(())
    }

    fn check_request(&self, request: &Request<B::Proposal>) -> Result<(), ConsensusError> {
        let number = request.proposal.number();
        let sequence = self.current.sequence().0;
        if number < sequence {
            Err(ConsensusError::OldMessage)
        } else if number > sequence {
            Err(ConsensusError::FutureMessage)
        } else {
            Ok(())
        }
    }

    /// Release stored requests whose number has become current.
    fn process_pending_requests(&mut self) {
        let ready = self.pending_requests.drain_ready(self.current.sequence());
        for request in ready {
            if let Err(err) = self.handle_request(request) {
                trace!(error = %err, "released request not accepted");
            }
        }
    }

    // ------------------------------------------------------------------
    // Preprepare
    // ------------------------------------------------------------------

    fn send_preprepare(&mut self, request: &Request<B::Proposal>) {
        if self.current.sequence().0 == request.proposal.number() && self.is_proposer() {
            let view = self.current.view();
            info!(view = %view, hash = %request.proposal.hash(), "proposing");
            let payload = encode_payload(&Preprepare {
                view,
                proposal: request.proposal.clone(),
            });
            self.broadcast(MessageCode::Preprepare, payload);
        }
    }

    fn handle_preprepare(&mut self, message: &Message) -> Result<(), ConsensusError> {
        let preprepare: Preprepare<B::Proposal> = message.decode_payload()?;
        self.check_message(MessageCode::Preprepare, preprepare.view)?;

        if !self.validators.is_proposer(&message.author) {
            warn!(author = %message.author, "preprepare from non-proposer");
            return Err(ConsensusError::NotFromProposer);
        }

        if self.backend.validate(&preprepare.proposal).is_err() {
            self.send_next_round_change();
            return Err(ConsensusError::BadProposal);
        }
        match self.backend.verify(&preprepare.proposal) {
            Ok(()) => {}
            Err(ProposalError::FutureProposal { retry_in }) => {
                debug!(retry_in = ?retry_in, "proposal ahead of the chain, retrying later");
                self.schedule_preprepare_retry(message.clone(), retry_in);
                return Err(ConsensusError::FutureProposal);
            }
            Err(ProposalError::BadProposal) => {
                self.send_next_round_change();
                return Err(ConsensusError::BadProposal);
            }
        }

        if self.state == State::AcceptRequest {
            if self.is_hash_locked() {
                if Some(preprepare.proposal.hash()) == self.current.locked_hash() {
                    // The locked proposal came back: skip PREPARE and commit it.
                    self.current.set_preprepare(preprepare);
                    self.set_state(State::Prepared);
                    self.send_commit();
                } else {
                    // Locked on a different proposal: refuse and move the round on.
                    self.send_next_round_change();
                }
            } else {
                self.current.set_preprepare(preprepare);
                self.set_state(State::Preprepared);
                self.send_prepare();
            }
        }
        Ok(())
    }

    /// Re-inject a too-far-ahead preprepare once the backend's hinted delay
    /// has passed.
    fn schedule_preprepare_retry(&mut self, message: Message, retry_in: Duration) {
        if let Some(task) = self.preprepare_retry.take() {
            task.abort();
        }
        let tx = self.event_tx.clone();
        self.preprepare_retry = Some(tokio::spawn(async move {
            tokio::time::sleep(retry_in).await;
            let _ = tx.send(Event::Backlog(Box::new(message)));
        }));
    }

    // ------------------------------------------------------------------
    // Prepare
    // ------------------------------------------------------------------

    fn send_prepare(&mut self) {
        if let Some(subject) = self.current.subject() {
            self.broadcast(MessageCode::Prepare, encode_payload(&subject));
        }
    }

    fn handle_prepare(&mut self, message: &Message) -> Result<(), ConsensusError> {
        let subject: Subject = message.decode_payload()?;
        self.check_message(MessageCode::Prepare, subject.view)?;
        self.verify_subject(&subject)?;
        self.current.prepares.add(message.clone())?;

        let locked_match =
            self.is_hash_locked() && Some(subject.digest) == self.current.locked_hash();
        if (locked_match || self.current.prepares.size() >= self.validators.quorum())
            && self.state < State::Prepared
        {
            self.current.lock_hash();
            self.set_state(State::Prepared);
            self.send_commit();
        }
        Ok(())
    }

    fn verify_subject(&self, subject: &Subject) -> Result<(), ConsensusError> {
        match self.current.subject() {
            Some(current) if current == *subject => Ok(()),
            _ => Err(ConsensusError::InconsistentSubject),
        }
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    fn send_commit(&mut self) {
        if let Some(subject) = self.current.subject() {
            self.broadcast(MessageCode::Commit, encode_payload(&subject));
        }
    }

    fn handle_commit(&mut self, message: &Message) -> Result<(), ConsensusError> {
        let subject: Subject = message.decode_payload()?;
        self.check_message(MessageCode::Commit, subject.view)?;
        self.verify_subject(&subject)?;
        if !message.verify_committed_seal(&subject.digest) {
            return Err(ConsensusError::InvalidMessage);
        }
        self.current.commits.add(message.clone())?;

        if self.current.commits.size() >= self.validators.quorum() && self.state < State::Committed
        {
            self.current.lock_hash();
            self.commit();
        }
        Ok(())
    }

    /// Assemble the quorum certificate and hand the proposal to the chain.
    /// A backend failure unlocks and escalates to the next round.
    fn commit(&mut self) {
        self.set_state(State::Committed);
        let Some(proposal) = self.current.proposal().cloned() else {
            return;
        };
        let seals: Vec<Signature> = self
            .current
            .commits
            .values()
            .filter_map(|message| message.committed_seal)
            .collect();
        info!(
            sequence = self.current.sequence().0,
            hash = %proposal.hash(),
            seals = seals.len(),
            "committing proposal"
        );
        if let Err(err) = self.backend.commit(proposal, seals) {
            warn!(error = %err, "chain refused the committed proposal");
            self.current.unlock_hash();
            self.send_next_round_change();
        }
    }

    // ------------------------------------------------------------------
    // Round change
    // ------------------------------------------------------------------

    fn send_next_round_change(&mut self) {
        let round = self.current.round();
        self.send_round_change(Round(round.0 + 1));
    }

    /// Catch up to `round` and announce it. The target must be ahead of the
    /// current round; the view advance happens before the broadcast so the
    /// announced subject carries the new view.
    fn send_round_change(&mut self, round: Round) {
        let current_view = self.current.view();
        if current_view.round >= round {
            warn!(current = %current_view, target = round.0, "refusing round change into the past");
            return;
        }
        self.catch_up_round(View {
            sequence: current_view.sequence,
            round,
        });
        let subject = Subject {
            view: self.current.view(),
            digest: ProposalHash::default(),
        };
        self.broadcast(MessageCode::RoundChange, encode_payload(&subject));
    }

    fn handle_round_change(&mut self, message: &Message) -> Result<(), ConsensusError> {
        let subject: Subject = message.decode_payload()?;
        self.check_message(MessageCode::RoundChange, subject.view)?;

        let current_view = self.current.view();
        let target = subject.view.round;
        let count = self.round_changes.add(target, message.clone())?;

        if self.wait_round_change && count == self.validators.f() + 1 {
            // Weak certificate: f+1 validators are ahead, catch up to them.
            if current_view.round < target {
                self.send_round_change(target);
            }
            Ok(())
        } else if count == self.validators.quorum()
            && (self.wait_round_change || current_view.round < target)
        {
            // Strong certificate: enter the new round now.
            self.start_new_round(target);
            Ok(())
        } else if current_view.round < target {
            // Ahead of us without a certificate yet; suppress further gossip.
            Err(ConsensusError::Ignored)
        } else {
            Ok(())
        }
    }

    /// Move to `view` and wait there for a round-change certificate.
    fn catch_up_round(&mut self, view: View) {
        debug!(current = %self.current.view(), target = %view, "catching up round");
        self.wait_round_change = true;
        let keep_lock = self.is_hash_locked();
        self.current.start_round(view, &self.validators, keep_lock);
        self.round_changes.clear(view.round);
        // The prepare/commit sets were just reset; the phase drops with them.
        self.set_state(State::AcceptRequest);
        self.arm_round_timer();
    }

    // ------------------------------------------------------------------
    // Round lifecycle
    // ------------------------------------------------------------------

    /// Enter a new round: round 0 of the next sequence if the chain has
    /// advanced, otherwise `round` of the current sequence on a round-change
    /// certificate. The proposer of the new view re-proposes the locked
    /// proposal or the pending request.
    fn start_new_round(&mut self, round: Round) {
        let (last_proposal, last_proposer) = self.backend.last_proposal();
        let current_view = self.current.view();

        let (new_view, round_change) = if last_proposal.number() >= current_view.sequence.0 {
            (View::new(last_proposal.number() + 1, 0), false)
        } else if last_proposal.number() + 1 == current_view.sequence.0 {
            if round.0 == 0 {
                // Same sequence, same round: nothing to do.
                return;
            }
            if round < current_view.round {
                warn!(current = %current_view, target = round.0, "new round must not go backwards");
                return;
            }
            (
                View {
                    sequence: current_view.sequence,
                    round,
                },
                true,
            )
        } else {
            warn!(
                chain_height = last_proposal.number(),
                sequence = current_view.sequence.0,
                "chain is behind the current sequence"
            );
            return;
        };

        if round_change {
            let keep_lock = self.is_hash_locked();
            self.validators.calc_proposer(Some(&last_proposer), new_view.round.0);
            self.current.start_round(new_view, &self.validators, keep_lock);
            self.round_changes.clear(new_view.round);
        } else {
            // New sequence: snapshot the validator set and reset everything.
            self.validators = self.backend.validators(new_view.sequence);
            self.validators.calc_proposer(Some(&last_proposer), 0);
            self.current.start_sequence(new_view, &self.validators);
            self.round_changes = RoundChangeSet::new(self.validators.clone());
        }
        self.wait_round_change = false;
        self.set_state(State::AcceptRequest);

        info!(
            view = %new_view,
            proposer = self.validators.proposer().map(|p| p.to_string()).unwrap_or_default(),
            round_change,
            "entering new round"
        );

        if round_change && self.is_proposer() {
            if self.is_hash_locked() {
                // Re-propose the locked proposal.
                if let Some(proposal) = self.current.proposal().cloned() {
                    self.send_preprepare(&Request { proposal });
                }
            } else if let Some(request) = self.current.pending_request().cloned() {
                self.send_preprepare(&request);
            }
        }
        self.arm_round_timer();
    }

    fn handle_final_committed(&mut self) {
        debug!("chain appended a block, moving to the next sequence");
        self.start_new_round(Round(0));
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            trace!(from = ?self.state, to = ?state, "state transition");
            self.state = state;
        }
        if state == State::AcceptRequest {
            self.process_pending_requests();
        }
        self.process_backlog();
    }

    // ------------------------------------------------------------------
    // Timer
    // ------------------------------------------------------------------

    fn arm_round_timer(&mut self) {
        let timeout = self.config.timeouts.round_timeout(self.current.round());
        self.timer.schedule(timeout);
    }

    fn handle_timeout(&mut self, generation: u64) {
        if generation != self.timer.generation() {
            return;
        }
        debug!(view = %self.current.view(), "round timer expired");
        if !self.wait_round_change {
            // A weak certificate may already point past us; jump to it.
            if let Some(max_round) = self.round_changes.max_round(self.validators.f() + 1) {
                if max_round > self.current.round() {
                    self.send_round_change(max_round);
                    return;
                }
            }
        }
        let (last_proposal, _) = self.backend.last_proposal();
        if last_proposal.number() >= self.current.sequence().0 {
            // The chain moved on without us; re-anchor instead of escalating.
            self.start_new_round(Round(0));
        } else {
            self.send_next_round_change();
        }
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Sign and broadcast a message for the current view. COMMIT messages
    /// pick up a committed seal over the accepted proposal's digest.
    fn broadcast(&mut self, code: MessageCode, payload: Vec<u8>) {
        let committed_seal = match code {
            MessageCode::Commit => self
                .current
                .subject()
                .map(|subject| self.backend.sign(&commit_seal_bytes(&subject.digest))),
            _ => None,
        };
        let message = Message::signed(code, payload, self.address.clone(), committed_seal, |bytes| {
            self.backend.sign(bytes)
        });
        if let Err(err) = self.backend.broadcast(&self.validators, message.encode()) {
            warn!(error = %err, code = %code, "broadcast failed");
        }
    }
}
