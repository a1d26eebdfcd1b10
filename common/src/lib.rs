//! Common types and algorithms for the CSU content-distribution protocol.
//!
//! This crate provides functionality shared by the gateway ledger, the storage and
//! metadata ledgers, and off-chain clients:
//! - **Key encoding**: canonical fragment keys, sequence keys, fragment ids, upload tokens
//! - **Merkle commitments**: two-tier fragment/file trees, proofs and fragment verification
//! - **Packet envelopes**: the tagged union carried over packet channels plus acknowledgements
//! - **Key-value storage**: the ordered-map abstraction every ledger persists through
//! - **Manifests**: the record published to the metadata ledger on finalize
//!
//! # Key Design Principles
//!
//! - **One implementation**: every party derives keys, leaves and roots through this crate,
//!   so gateway, storage nodes and clients can never drift apart
//! - **Raw-byte node hashing**: internal Merkle nodes hash raw digests, never hex text
//! - **Deterministic ordering**: anything iterated for placement is sorted first

pub mod error;
pub mod keys;
pub mod kv;
pub mod merkle;
pub mod packet;
pub mod verifier;

pub use error::{MerkleError, PacketError, StoreError};
pub use kv::{CacheStore, KvStore, KvStoreExt, MemoryStore, SledStore};
pub use merkle::{BundleCommitment, Digest, FileFragments, MerkleProof, MerkleTree, ProofStep};
pub use packet::{Acknowledgement, FragmentPacket, NoDataPacket, PacketData};
pub use verifier::{DistributeItem, ProofStage, verify_fragment};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ============================================================================
// Manifest Types
// ============================================================================

/// Where one fragment of a file was sent.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FragmentLocation {
    /// Fragment index within the file
    pub index: u64,
    /// Content key on the storage ledger (see `keys::fragment_id`)
    pub fragment_id: String,
    /// Storage channel the fragment was sent over
    pub channel_id: String,
}

/// One file of a published bundle.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ManifestFile {
    pub path: String,
    /// File size in bytes
    pub size: u64,
    /// Root of the file's fragment tree (64 hex characters)
    pub file_root: String,
    pub fragments: Vec<FragmentLocation>,
}

/// Record published to the metadata ledger when a session is finalized.
///
/// The gateway refuses to send a manifest whose `session_id`, `owner`, `root_proof` or
/// `fragment_size` differ from the session it is finalizing.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    pub project_name: String,
    pub version: String,
    /// Bundle root proof (64 hex characters)
    pub root_proof: String,
    pub fragment_size: u64,
    pub owner: String,
    pub session_id: String,
    pub files: Vec<ManifestFile>,
}

impl Manifest {
    /// Serializes the manifest to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes a manifest from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Structural checks that do not depend on any ledger state.
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("project_name", &self.project_name),
            ("version", &self.version),
            ("owner", &self.owner),
            ("session_id", &self.session_id),
        ] {
            if !keys::is_legal_key_field(value) {
                return Err(format!("manifest {field} is empty or contains control characters"));
            }
        }
        validate_digest_hex(&self.root_proof).map_err(|e| format!("manifest root_proof: {e}"))?;

        let mut paths = HashSet::new();
        for file in &self.files {
            if !keys::is_legal_key_field(&file.path) {
                return Err(format!("manifest file path {:?} is not a legal path", file.path));
            }
            if !paths.insert(file.path.as_str()) {
                return Err(format!("manifest lists {} twice", file.path));
            }
            validate_digest_hex(&file.file_root)
                .map_err(|e| format!("manifest file {}: {e}", file.path))?;
        }
        Ok(())
    }
}

// ============================================================================
// Shared Utility Functions
// ============================================================================

/// Safe timestamp helper - returns current Unix timestamp in seconds.
/// Returns 0 on clock skew or system time errors.
#[inline]
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current Unix timestamp in nanoseconds, 0 on clock errors.
#[inline]
pub fn now_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Validates that a string is a 64-character hex digest.
///
/// # Example
/// ```
/// use common::validate_digest_hex;
/// assert!(validate_digest_hex("abc123").is_err()); // too short
/// assert!(validate_digest_hex(&"ab".repeat(32)).is_ok());
/// ```
pub fn validate_digest_hex(value: &str) -> Result<(), String> {
    match value.len() {
        64 if value.chars().all(|c| c.is_ascii_hexdigit()) => Ok(()),
        64 => Err("must contain only hex characters (0-9, a-f, A-F)".to_string()),
        len => Err(format!("expected 64 hex characters, got {len}")),
    }
}

/// Validates an account address: 3 to 128 ASCII alphanumeric characters.
pub fn validate_address(address: &str) -> Result<(), String> {
    if !(3..=128).contains(&address.len()) {
        return Err(format!(
            "address must be 3-128 characters, got {}",
            address.len()
        ));
    }
    if !address.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(format!("address {address:?} must be ASCII alphanumeric"));
    }
    Ok(())
}
