//! Error types shared across the workspace.

use crate::verifier::ProofStage;
use thiserror::Error;

/// Errors from building or checking Merkle commitments.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MerkleError {
    /// No leaves to build a tree from
    #[error("cannot build a Merkle tree from zero leaves")]
    EmptyTree,

    /// Proof requested for a leaf that does not exist
    #[error("leaf index {index} out of bounds ({leaves} leaves)")]
    LeafOutOfBounds { index: usize, leaves: usize },

    /// Two files in a bundle share a path
    #[error("duplicate file path in bundle: {0}")]
    DuplicatePath(String),

    /// Verification failed at the named stage
    #[error("invalid proof at {stage}: {reason}")]
    InvalidProof { stage: ProofStage, reason: String },
}

/// Errors from encoding or decoding packet envelopes and acknowledgements.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Envelope carries a variant this build does not know
    #[error("unrecognized packet type: {0}")]
    UnknownPacketType(String),

    /// Bytes are not a well-formed envelope
    #[error("malformed packet: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for PacketError {
    fn from(err: serde_json::Error) -> Self {
        PacketError::Malformed(err.to_string())
    }
}

/// Errors from the key-value persistence layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store failed
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored value could not be encoded or decoded
    #[error("storage codec error: {0}")]
    Codec(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}
