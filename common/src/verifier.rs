//! Fragment verification against a committed root proof.
//!
//! A fragment is accepted only if the chain
//! `bytes → fragment leaf → (fragment proof) → file root → file leaf → (file proof) → root`
//! lands byte-exactly on the committed root.

use crate::error::MerkleError;
use crate::merkle::{Digest, MerkleProof, compute_root, file_leaf, fragment_leaf};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Proofs deeper than this cannot come from a real bundle.
pub const MAX_PROOF_DEPTH: usize = 64;

/// One fragment submitted for distribution, with the proofs tying it to the root.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DistributeItem {
    /// File path inside the bundle
    pub path: String,
    /// Fragment index within the file
    pub index: u64,
    /// Fragment bytes
    #[serde(with = "hex::serde")]
    pub data: Vec<u8>,
    /// Proof from the fragment leaf to the file root
    pub fragment_proof: MerkleProof,
    /// Total file size, part of the file leaf
    pub file_size: u64,
    /// Proof from the file leaf to the bundle root
    pub file_proof: MerkleProof,
}

/// Verification stage at which a fragment was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProofStage {
    RootProof,
    FragmentProof,
    FileProof,
    RootComparison,
}

impl fmt::Display for ProofStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProofStage::RootProof => "root_proof",
            ProofStage::FragmentProof => "fragment_proof",
            ProofStage::FileProof => "file_proof",
            ProofStage::RootComparison => "root_comparison",
        };
        f.write_str(name)
    }
}

fn invalid(stage: ProofStage, reason: impl Into<String>) -> MerkleError {
    MerkleError::InvalidProof {
        stage,
        reason: reason.into(),
    }
}

/// Decode a committed root proof (64 hex characters).
pub fn decode_root_proof(root_proof: &str) -> Result<Digest, MerkleError> {
    let mut root = [0u8; 32];
    hex::decode_to_slice(root_proof, &mut root)
        .map_err(|e| invalid(ProofStage::RootProof, e.to_string()))?;
    Ok(root)
}

fn check_depth(stage: ProofStage, proof: &MerkleProof) -> Result<(), MerkleError> {
    if proof.depth() > MAX_PROOF_DEPTH {
        return Err(invalid(
            stage,
            format!("depth {} exceeds {MAX_PROOF_DEPTH}", proof.depth()),
        ));
    }
    Ok(())
}

/// Verify `item` against a hex-encoded root proof.
pub fn verify_fragment(root_proof: &str, item: &DistributeItem) -> Result<(), MerkleError> {
    let root = decode_root_proof(root_proof)?;
    verify_fragment_against(&root, item)
}

/// Verify `item` against a decoded root.
pub fn verify_fragment_against(root: &Digest, item: &DistributeItem) -> Result<(), MerkleError> {
    check_depth(ProofStage::FragmentProof, &item.fragment_proof)?;
    check_depth(ProofStage::FileProof, &item.file_proof)?;

    let leaf = fragment_leaf(&item.path, item.index, &item.data);
    let file_root = compute_root(&leaf, &item.fragment_proof);
    let file_node = file_leaf(&item.path, item.file_size, &file_root);
    let candidate = compute_root(&file_node, &item.file_proof);

    if candidate != *root {
        return Err(invalid(
            ProofStage::RootComparison,
            format!(
                "derived root {} does not match committed root {}",
                hex::encode(candidate),
                hex::encode(root)
            ),
        ));
    }
    Ok(())
}
