use ed25519_dalek::{Signature, Verifier};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConsensusError;
use crate::types::{ProposalHash, ValidatorId};

/// Protocol message codes. The wire values are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageCode {
    Preprepare = 0,
    Prepare = 1,
    Commit = 2,
    RoundChange = 3,
}

impl MessageCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Backlog rank: later phases drain first when views tie.
    pub fn rank(self) -> u8 {
        self.as_u8()
    }
}

impl std::fmt::Display for MessageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageCode::Preprepare => "preprepare",
            MessageCode::Prepare => "prepare",
            MessageCode::Commit => "commit",
            MessageCode::RoundChange => "round-change",
        };
        write!(f, "{name}")
    }
}

/// The bytes a committed seal signs: proposal digest followed by the COMMIT
/// code. The seals collected from COMMIT messages form the quorum
/// certificate attached to the sealed block.
pub fn commit_seal_bytes(digest: &ProposalHash) -> Vec<u8> {
    let mut buf = Vec::with_capacity(33);
    buf.extend_from_slice(&digest.0);
    buf.push(MessageCode::Commit.as_u8());
    buf
}

/// The signed envelope every protocol message travels in.
///
/// `payload` is the bincode encoding of a [`Preprepare`](crate::Preprepare)
/// or [`Subject`](crate::Subject) depending on `code`. The author signature
/// covers code, payload, and author; `committed_seal` is only present on
/// COMMIT messages and is excluded from the signed bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub code: MessageCode,
    pub payload: Vec<u8>,
    pub author: ValidatorId,
    pub signature: Signature,
    pub committed_seal: Option<Signature>,
}

impl Message {
    /// Build and sign a message with the given signer.
    pub fn signed<F>(
        code: MessageCode,
        payload: Vec<u8>,
        author: ValidatorId,
        committed_seal: Option<Signature>,
        sign: F,
    ) -> Self
    where
        F: FnOnce(&[u8]) -> Signature,
    {
        let signature = sign(&Self::sign_bytes(code, &payload, &author));
        Self {
            code,
            payload,
            author,
            signature,
            committed_seal,
        }
    }

    /// Canonical bytes covered by the author signature.
    fn sign_bytes(code: MessageCode, payload: &[u8], author: &ValidatorId) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 32 + payload.len());
        buf.push(code.as_u8());
        buf.extend_from_slice(author.as_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    /// Check the author signature against the stated author key. Called once
    /// on inbound; handlers downstream trust the result.
    pub fn verify_signature(&self) -> bool {
        let bytes = Self::sign_bytes(self.code, &self.payload, &self.author);
        self.author.0.verify(&bytes, &self.signature).is_ok()
    }

    /// Check the committed seal against the given proposal digest.
    pub fn verify_committed_seal(&self, digest: &ProposalHash) -> bool {
        match &self.committed_seal {
            Some(seal) => self.author.0.verify(&commit_seal_bytes(digest), seal).is_ok(),
            None => false,
        }
    }

    /// Serialize the full envelope for broadcast.
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("message serialization should never fail")
    }

    /// Deserialize an envelope received from the wire.
    pub fn decode(data: &[u8]) -> Result<Self, ConsensusError> {
        bincode::deserialize(data).map_err(|_| ConsensusError::InvalidMessage)
    }

    /// Decode the inner payload as the type implied by `code`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, ConsensusError> {
        bincode::deserialize(&self.payload).map_err(|_| match self.code {
            MessageCode::Preprepare => ConsensusError::FailedDecodePreprepare,
            MessageCode::Prepare => ConsensusError::FailedDecodePrepare,
            MessageCode::Commit => ConsensusError::FailedDecodeCommit,
            MessageCode::RoundChange => ConsensusError::FailedDecodeRoundChange,
        })
    }
}

/// Encode a message payload (subject or preprepare) for the envelope.
pub fn encode_payload<T: Serialize>(payload: &T) -> Vec<u8> {
    bincode::serialize(payload).expect("payload serialization should never fail")
}
