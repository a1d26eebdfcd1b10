//! Error types for the gateway ledger.

use common::{MerkleError, PacketError, StoreError};
use thiserror::Error;

/// Result type alias using CsuError
pub type Result<T> = std::result::Result<T, CsuError>;

/// Rejection classes. Every class except `Internal` leaves ledger state untouched and
/// tells the caller what has to change before a retry can succeed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input; retry with corrected input
    Validation,
    /// Wrong signer or missing grant; retry needs a new grant or signer
    Authorization,
    /// Session in the wrong state; inspect the session first
    State,
    /// Duplicate fragment, bad proof or manifest mismatch; whole call rejected
    Integrity,
    /// Storage or encoding failure
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authorization => "authorization",
            ErrorKind::State => "state",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Errors returned by gateway handlers.
#[derive(Error, Debug)]
pub enum CsuError {
    // ----- validation -----
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("required field {0} is empty")]
    EmptyField(&'static str),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("deadline {deadline_unix} is not after the current time {now_unix}")]
    InvalidDeadline { deadline_unix: u64, now_unix: u64 },

    #[error("fragment {path}#{index} is {size} bytes, limit is {max}")]
    FragmentTooLarge {
        path: String,
        index: u64,
        size: u64,
        max: u64,
    },

    #[error("batch would bring session to {total} fragments, limit is {max}")]
    TooManyFragments { total: u64, max: u64 },

    // ----- authorization -----
    #[error("local_admin is not configured; CSU handlers are disabled")]
    LocalAdminNotSet,

    #[error("{role} mismatch: expected {expected}, got {actual}")]
    Unauthorized {
        role: &'static str,
        expected: String,
        actual: String,
    },

    #[error("no grant from {granter} to {grantee} for {msg_type}")]
    GrantNotFound {
        granter: String,
        grantee: String,
        msg_type: String,
    },

    #[error("grant rejected: {0}")]
    GrantMismatch(String),

    // ----- state -----
    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("session {0} already exists")]
    SessionExists(String),

    #[error("session {0} is closed")]
    SessionClosed(String),

    #[error("session {session_id} is {state}, expected {expected}")]
    InvalidState {
        session_id: String,
        state: String,
        expected: &'static str,
    },

    #[error("session {0} has no committed root proof")]
    RootProofNotCommitted(String),

    #[error("no storage channels registered")]
    NoStorageChannels,

    #[error("no metadata channel registered")]
    NoMetadataChannel,

    #[error("unknown channel {0}")]
    UnknownChannel(String),

    // ----- integrity -----
    #[error("duplicate fragment {path}#{index} in session {session_id}")]
    DuplicateFragment {
        session_id: String,
        path: String,
        index: u64,
    },

    #[error(transparent)]
    InvalidProof(#[from] MerkleError),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    // ----- internal -----
    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CsuError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CsuError::InvalidAddress { .. }
            | CsuError::EmptyField(_)
            | CsuError::InvalidField { .. }
            | CsuError::InvalidDeadline { .. }
            | CsuError::FragmentTooLarge { .. }
            | CsuError::TooManyFragments { .. } => ErrorKind::Validation,
            CsuError::LocalAdminNotSet
            | CsuError::Unauthorized { .. }
            | CsuError::GrantNotFound { .. }
            | CsuError::GrantMismatch(_) => ErrorKind::Authorization,
            CsuError::SessionNotFound(_)
            | CsuError::SessionExists(_)
            | CsuError::SessionClosed(_)
            | CsuError::InvalidState { .. }
            | CsuError::RootProofNotCommitted(_)
            | CsuError::NoStorageChannels
            | CsuError::NoMetadataChannel
            | CsuError::UnknownChannel(_) => ErrorKind::State,
            CsuError::DuplicateFragment { .. }
            | CsuError::InvalidProof(_)
            | CsuError::InvalidManifest(_) => ErrorKind::Integrity,
            CsuError::Packet(_) | CsuError::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Reject `address` unless it is a well-formed account address.
pub fn check_address(address: &str) -> Result<()> {
    common::validate_address(address).map_err(|reason| CsuError::InvalidAddress {
        address: address.to_string(),
        reason,
    })
}

/// Reject empty or control-character-bearing values that end up inside encoded keys.
pub fn check_key_field(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CsuError::EmptyField(field));
    }
    if !common::keys::is_legal_key_field(value) {
        return Err(CsuError::InvalidField {
            field,
            reason: "contains control characters".to_string(),
        });
    }
    Ok(())
}
