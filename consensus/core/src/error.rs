use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by message and request handlers.
///
/// None of these unwind the state machine; a handler that returns an error
/// leaves the round state consistent and the caller decides whether the
/// message is stashed (`FutureMessage`), dropped, or suppressed from gossip
/// (`Ignored`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConsensusError {
    /// Malformed envelope, unparseable payload, or bad signature.
    #[error("invalid message")]
    InvalidMessage,
    /// The message's view is ahead of ours; it goes to the backlog.
    #[error("message is for a future view")]
    FutureMessage,
    /// The message's view is behind ours.
    #[error("message is for an old view")]
    OldMessage,
    /// PREPREPARE from someone other than the expected proposer.
    #[error("preprepare is not from the proposer")]
    NotFromProposer,
    /// PREPARE/COMMIT subject does not match the accepted PREPREPARE.
    #[error("subject does not match the current preprepare")]
    InconsistentSubject,
    /// Author is not a member of the validator set.
    #[error("author is not an authorized validator")]
    UnauthorizedAddress,
    #[error("failed to decode preprepare payload")]
    FailedDecodePreprepare,
    #[error("failed to decode prepare payload")]
    FailedDecodePrepare,
    #[error("failed to decode commit payload")]
    FailedDecodeCommit,
    #[error("failed to decode round change payload")]
    FailedDecodeRoundChange,
    /// ROUND CHANGE ahead of our round with no certificate yet; the caller
    /// should not gossip it further.
    #[error("round change ignored")]
    Ignored,
    /// The backend rejected the proposal; a round change has been initiated.
    #[error("backend rejected the proposal")]
    BadProposal,
    /// The proposal is ahead of the chain; the preprepare is re-injected
    /// after the backend's hinted delay.
    #[error("proposal is ahead of the chain")]
    FutureProposal,
}

/// Errors the backend reports when asked to validate or verify a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProposalError {
    #[error("proposal failed validation")]
    BadProposal,
    /// The proposal is too far in the future; retry after the given delay.
    #[error("proposal is ahead of the chain, retry in {retry_in:?}")]
    FutureProposal { retry_in: Duration },
}

/// Errors from backend side effects (broadcast, commit). Fatal for the
/// current round only: the engine reacts with a round change, never a panic.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("broadcast failed: {0}")]
    Broadcast(String),
    #[error("commit failed: {0}")]
    Commit(String),
}
