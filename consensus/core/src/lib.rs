pub mod backend;
pub mod backlog;
pub mod config;
pub mod core;
pub mod error;
pub mod message;
pub mod message_set;
pub mod request;
pub mod round_change;
pub mod round_state;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use backend::{Backend, Event, EventSender};
pub use config::{Config, TimeoutConfig};
pub use crate::core::Core;
pub use error::{BackendError, ConsensusError, ProposalError};
pub use message::{commit_seal_bytes, encode_payload, Message, MessageCode};
pub use types::{
    Preprepare, Proposal, ProposalHash, ProposerPolicy, Request, Round, Sequence, State, Subject,
    ValidatorId, ValidatorSet, View,
};
