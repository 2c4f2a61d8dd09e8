use ed25519_dalek::Signature;

use crate::error::{BackendError, ProposalError};
use crate::message::Message;
use crate::types::{Proposal, ProposalHash, Request, Sequence, ValidatorId, ValidatorSet};

/// Everything the engine asks of the outside world.
///
/// The engine holds the backend; the backend holds the engine's event
/// sender. The two narrow interfaces break what would otherwise be mutual
/// ownership.
pub trait Backend: Send + Sync + 'static {
    type Proposal: Proposal;

    /// The local validator identity.
    fn address(&self) -> ValidatorId;

    /// Snapshot of the validator set for the given sequence. Taken once on
    /// entering the sequence and frozen until the next one.
    fn validators(&self, sequence: Sequence) -> ValidatorSet;

    /// Sign with the local validator key.
    fn sign(&self, data: &[u8]) -> Signature;

    /// Send an encoded message to every validator, including the local node
    /// via loopback into the event channel.
    fn broadcast(&self, validators: &ValidatorSet, payload: Vec<u8>) -> Result<(), BackendError>;

    /// Forward an encoded message to peers. Used to relay messages accepted
    /// from others, ROUND CHANGE in particular.
    fn gossip(&self, validators: &ValidatorSet, payload: Vec<u8>) -> Result<(), BackendError>;

    /// Structural check of a proposal's content.
    fn validate(&self, proposal: &Self::Proposal) -> Result<(), ProposalError>;

    /// Chain-placement check. A proposal too far ahead yields
    /// [`ProposalError::FutureProposal`] with a retry delay.
    fn verify(&self, proposal: &Self::Proposal) -> Result<(), ProposalError>;

    /// Hand a decided proposal and its 2f+1 committed seals to the chain.
    fn commit(&self, proposal: Self::Proposal, seals: Vec<Signature>) -> Result<(), BackendError>;

    /// The latest committed proposal and its proposer, used to initialize
    /// and re-anchor the sequence.
    fn last_proposal(&self) -> (Self::Proposal, ValidatorId);

    /// Whether a proposal previously seen under this digest turned out to be
    /// bad. Consulted by the locking predicate.
    fn has_bad_proposal(&self, hash: &ProposalHash) -> bool;
}

/// Inputs multiplexed by the engine's event loop.
#[derive(Debug)]
pub enum Event<P> {
    /// A proposal from the external block builder.
    Request(Request<P>),
    /// An encoded protocol message from the wire (or loopback).
    Message(Vec<u8>),
    /// A message re-injected after its view became current, or a preprepare
    /// retried after a future-proposal delay. Already signature-checked.
    Backlog(Box<Message>),
    /// The chain appended a block; consensus moves to the next sequence.
    FinalCommitted,
    /// Terminate the event loop after the in-flight handler.
    Stop,
}

/// Handle for feeding events into a running engine.
#[derive(Debug)]
pub struct EventSender<P> {
    tx: tokio::sync::mpsc::UnboundedSender<Event<P>>,
}

impl<P> Clone for EventSender<P> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<P> EventSender<P> {
    pub(crate) fn new(tx: tokio::sync::mpsc::UnboundedSender<Event<P>>) -> Self {
        Self { tx }
    }

    /// Enqueue an event. Returns false if the engine has shut down.
    pub fn send(&self, event: Event<P>) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn request(&self, request: Request<P>) -> bool {
        self.send(Event::Request(request))
    }

    pub fn message(&self, payload: Vec<u8>) -> bool {
        self.send(Event::Message(payload))
    }

    pub fn final_committed(&self) -> bool {
        self.send(Event::FinalCommitted)
    }

    pub fn stop(&self) -> bool {
        self.send(Event::Stop)
    }
}

