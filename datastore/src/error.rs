use common::{PacketError, StoreError};
use thiserror::Error;

/// Result type alias using DatastoreError
pub type Result<T> = std::result::Result<T, DatastoreError>;

/// Reasons a receiving ledger refuses a packet. Each becomes the text of an error
/// acknowledgement.
#[derive(Error, Debug)]
pub enum DatastoreError {
    #[error("fragment {path}#{index} is empty")]
    EmptyFragment { path: String, index: u64 },

    #[error("fragment {path}#{index} is {size} bytes, limit is {max}")]
    FragmentTooLarge {
        path: String,
        index: u64,
        size: u64,
        max: u64,
    },

    #[error("fragment {0} already stored with different content")]
    ConflictingFragment(String),

    #[error("manifest {project_name}@{version} already published by session {existing_session}")]
    ManifestConflict {
        project_name: String,
        version: String,
        existing_session: String,
    },

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("packet type {kind} is not served by the {role} ledger")]
    UnsupportedPacket { kind: &'static str, role: &'static str },

    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
