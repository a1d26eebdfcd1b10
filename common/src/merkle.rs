//! SHA-256 two-tier Merkle commitments for file bundles.
//!
//! Each file's fragments form a *fragment tree*; the roots of those trees, bound to the
//! file path and size, form the *file tree* whose root is the session's root proof.
//!
//! # Design
//!
//! - `fragment_leaf = H("FRAG:" path ":" index ":" hex(H(bytes)))`
//! - `file_leaf     = H("FILE:" path ":" size ":" hex(file_root))`
//! - Internal node  = `H(left || right)` over the raw 32-byte digests, never their hex text
//! - Leaves are paired left to right; an odd trailing node is paired with itself
//! - A single leaf is its own root and has an empty proof
//!
//! # Example
//!
//! ```rust
//! use common::merkle::{MerkleTree, fragment_leaf, verify_proof};
//!
//! let leaves: Vec<_> = (0..5u64).map(|i| fragment_leaf("a.txt", i, &[i as u8])).collect();
//! let tree = MerkleTree::from_leaves(leaves.clone()).unwrap();
//!
//! for (i, leaf) in leaves.iter().enumerate() {
//!     let proof = tree.proof(i).unwrap();
//!     assert!(verify_proof(leaf, &proof, &tree.root()));
//! }
//! ```

use crate::error::MerkleError;
use crate::verifier::DistributeItem;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::collections::HashSet;

/// A 256-bit digest.
pub type Digest = [u8; 32];

/// SHA-256 of raw bytes.
pub fn sha256(data: &[u8]) -> Digest {
    Sha256::digest(data).into()
}

/// Hash an internal node: `H(left || right)`.
pub fn hash_node(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Leaf committing to one fragment of a file.
pub fn fragment_leaf(path: &str, index: u64, data: &[u8]) -> Digest {
    let preimage = format!("FRAG:{path}:{index}:{}", hex::encode(sha256(data)));
    sha256(preimage.as_bytes())
}

/// Leaf committing to one file of a bundle.
pub fn file_leaf(path: &str, file_size: u64, file_root: &Digest) -> Digest {
    let preimage = format!("FILE:{path}:{file_size}:{}", hex::encode(file_root));
    sha256(preimage.as_bytes())
}

/// One level of an inclusion proof.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProofStep {
    /// Digest of the sibling node at this level
    #[serde(with = "hex::serde")]
    pub sibling: Digest,
    /// True when the sibling sits to the left of the running hash
    pub sibling_is_left: bool,
}

/// Inclusion proof from a leaf up to (not including) the root.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct MerkleProof {
    pub steps: Vec<ProofStep>,
}

impl MerkleProof {
    /// Proof for a single-leaf tree.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of levels walked by this proof.
    pub fn depth(&self) -> usize {
        self.steps.len()
    }
}

/// Binary Merkle tree kept level by level so proofs can be generated for any leaf.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    /// `levels[0]` holds the leaves, the last level holds the root
    levels: Vec<Vec<Digest>>,
}

impl MerkleTree {
    /// Build a tree from leaf digests.
    pub fn from_leaves(leaves: Vec<Digest>) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyTree);
        }

        let mut levels = vec![leaves];
        while let Some(current) = levels.last().filter(|level| level.len() > 1) {
            let next: Vec<Digest> = current
                .chunks(2)
                .map(|pair| {
                    let left = &pair[0];
                    let right = pair.get(1).unwrap_or(left);
                    hash_node(left, right)
                })
                .collect();
            levels.push(next);
        }

        Ok(Self { levels })
    }

    /// The root digest.
    pub fn root(&self) -> Digest {
        // from_leaves guarantees a non-empty top level
        self.levels[self.levels.len() - 1][0]
    }

    /// Number of leaves the tree was built from.
    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Number of proof steps between a leaf and the root.
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    /// Inclusion proof for the leaf at `index`.
    pub fn proof(&self, index: usize) -> Result<MerkleProof, MerkleError> {
        if index >= self.leaf_count() {
            return Err(MerkleError::LeafOutOfBounds {
                index,
                leaves: self.leaf_count(),
            });
        }

        let mut steps = Vec::with_capacity(self.depth());
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_is_left = idx % 2 == 1;
            let sibling_idx = if sibling_is_left { idx - 1 } else { idx + 1 };
            // Odd trailing node is paired with itself
            let sibling = level.get(sibling_idx).copied().unwrap_or(level[idx]);
            steps.push(ProofStep {
                sibling,
                sibling_is_left,
            });
            idx /= 2;
        }

        Ok(MerkleProof { steps })
    }
}

/// Re-derive the root reached from `leaf` by walking `proof`.
pub fn compute_root(leaf: &Digest, proof: &MerkleProof) -> Digest {
    proof.steps.iter().fold(*leaf, |current, step| {
        if step.sibling_is_left {
            hash_node(&step.sibling, &current)
        } else {
            hash_node(&current, &step.sibling)
        }
    })
}

/// Whether `proof` links `leaf` to `root`.
pub fn verify_proof(leaf: &Digest, proof: &MerkleProof, root: &Digest) -> bool {
    compute_root(leaf, proof) == *root
}

// ============================================================================
// Off-chain bundle builder
// ============================================================================

/// Input to the bundle builder: one file already split into fragments.
#[derive(Clone, Debug)]
pub struct FileFragments {
    pub path: String,
    pub fragments: Vec<Vec<u8>>,
}

impl FileFragments {
    /// Split `data` into `fragment_size` chunks. An empty file yields a single empty fragment.
    pub fn chunked(path: impl Into<String>, data: &[u8], fragment_size: usize) -> Self {
        let fragments = if data.is_empty() {
            vec![Vec::new()]
        } else {
            data.chunks(fragment_size.max(1))
                .map(<[u8]>::to_vec)
                .collect()
        };
        Self {
            path: path.into(),
            fragments,
        }
    }

    /// Total size of the file in bytes.
    pub fn size(&self) -> u64 {
        self.fragments.iter().map(|f| f.len() as u64).sum()
    }
}

/// Commitment to one file inside a bundle.
#[derive(Clone, Debug)]
pub struct FileCommitment {
    pub path: String,
    pub size: u64,
    pub fragments: Vec<Vec<u8>>,
    fragment_tree: MerkleTree,
    file_proof: MerkleProof,
}

impl FileCommitment {
    /// Root of this file's fragment tree.
    pub fn file_root(&self) -> Digest {
        self.fragment_tree.root()
    }

    /// Proof from this file's leaf to the bundle root.
    pub fn file_proof(&self) -> &MerkleProof {
        &self.file_proof
    }

    /// Proof from fragment `index` to this file's root.
    pub fn fragment_proof(&self, index: usize) -> Result<MerkleProof, MerkleError> {
        self.fragment_tree.proof(index)
    }
}

/// Full two-tier commitment for a bundle, as computed by the uploading client before
/// the root proof is committed.
#[derive(Clone, Debug)]
pub struct BundleCommitment {
    root: Digest,
    files: Vec<FileCommitment>,
}

impl BundleCommitment {
    /// Build the fragment trees, the file tree and all proofs. File order is significant.
    pub fn build(files: Vec<FileFragments>) -> Result<Self, MerkleError> {
        let mut seen = HashSet::new();
        let mut partial = Vec::with_capacity(files.len());
        for file in files {
            if !seen.insert(file.path.clone()) {
                return Err(MerkleError::DuplicatePath(file.path));
            }
            let size = file.size();
            let leaves = file
                .fragments
                .iter()
                .enumerate()
                .map(|(i, data)| fragment_leaf(&file.path, i as u64, data))
                .collect();
            let fragment_tree = MerkleTree::from_leaves(leaves)?;
            partial.push((file, size, fragment_tree));
        }

        let file_leaves = partial
            .iter()
            .map(|(file, size, tree)| file_leaf(&file.path, *size, &tree.root()))
            .collect();
        let file_tree = MerkleTree::from_leaves(file_leaves)?;

        let files = partial
            .into_iter()
            .enumerate()
            .map(|(i, (file, size, fragment_tree))| {
                Ok(FileCommitment {
                    path: file.path,
                    size,
                    fragments: file.fragments,
                    fragment_tree,
                    file_proof: file_tree.proof(i)?,
                })
            })
            .collect::<Result<Vec<_>, MerkleError>>()?;

        Ok(Self {
            root: file_tree.root(),
            files,
        })
    }

    /// The bundle root.
    pub fn root(&self) -> Digest {
        self.root
    }

    /// The bundle root as committed on the gateway (lowercase hex).
    pub fn root_hex(&self) -> String {
        hex::encode(self.root)
    }

    pub fn files(&self) -> &[FileCommitment] {
        &self.files
    }

    /// Distribution item for fragment `index` of the file at `path`.
    pub fn item(&self, path: &str, index: u64) -> Option<DistributeItem> {
        let file = self.files.iter().find(|f| f.path == path)?;
        let data = file.fragments.get(usize::try_from(index).ok()?)?;
        Some(DistributeItem {
            path: file.path.clone(),
            index,
            data: data.clone(),
            fragment_proof: file.fragment_proof(index as usize).ok()?,
            file_size: file.size,
            file_proof: file.file_proof.clone(),
        })
    }

    /// Every distribution item of the bundle, file by file in fragment order.
    pub fn items(&self) -> Vec<DistributeItem> {
        self.files
            .iter()
            .flat_map(|file| {
                (0..file.fragments.len() as u64).filter_map(|i| self.item(&file.path, i))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u64) -> Vec<Digest> {
        (0..n).map(|i| fragment_leaf("f", i, &i.to_le_bytes())).collect()
    }

    #[test]
    fn test_single_leaf() {
        let l = leaves(1);
        let tree = MerkleTree::from_leaves(l.clone()).unwrap();
        let proof = tree.proof(0).unwrap();

        assert_eq!(tree.root(), l[0]);
        assert!(proof.steps.is_empty());
        assert!(verify_proof(&l[0], &proof, &tree.root()));
    }

    #[test]
    fn test_two_leaves() {
        let l = leaves(2);
        let tree = MerkleTree::from_leaves(l.clone()).unwrap();

        assert_eq!(tree.root(), hash_node(&l[0], &l[1]));
        let p0 = tree.proof(0).unwrap();
        let p1 = tree.proof(1).unwrap();
        assert!(!p0.steps[0].sibling_is_left);
        assert!(p1.steps[0].sibling_is_left);
        assert!(verify_proof(&l[0], &p0, &tree.root()));
        assert!(verify_proof(&l[1], &p1, &tree.root()));
        assert!(!verify_proof(&l[1], &p0, &tree.root()));
    }

    #[test]
    fn test_odd_leaf_is_paired_with_itself() {
        let l = leaves(3);
        let tree = MerkleTree::from_leaves(l.clone()).unwrap();

        let left = hash_node(&l[0], &l[1]);
        let right = hash_node(&l[2], &l[2]);
        assert_eq!(tree.root(), hash_node(&left, &right));

        let proof = tree.proof(2).unwrap();
        assert_eq!(proof.steps[0].sibling, l[2]);
        assert!(verify_proof(&l[2], &proof, &tree.root()));
    }

    #[test]
    fn test_every_index_reaches_root() {
        for n in 1..=17 {
            let l = leaves(n);
            let tree = MerkleTree::from_leaves(l.clone()).unwrap();
            for (i, leaf) in l.iter().enumerate() {
                let proof = tree.proof(i).unwrap();
                assert_eq!(proof.depth(), tree.depth());
                assert_eq!(compute_root(leaf, &proof), tree.root(), "n={n} i={i}");
            }
        }
    }

    #[test]
    fn test_empty_tree_rejected() {
        assert_eq!(
            MerkleTree::from_leaves(Vec::new()).unwrap_err(),
            MerkleError::EmptyTree
        );
    }

    #[test]
    fn test_proof_out_of_bounds() {
        let tree = MerkleTree::from_leaves(leaves(4)).unwrap();
        assert!(matches!(
            tree.proof(4),
            Err(MerkleError::LeafOutOfBounds { index: 4, leaves: 4 })
        ));
    }

    #[test]
    fn test_deterministic() {
        let a = MerkleTree::from_leaves(leaves(9)).unwrap();
        let b = MerkleTree::from_leaves(leaves(9)).unwrap();
        assert_eq!(a.root(), b.root());
    }

    #[test]
    fn test_tampered_proof() {
        let l = leaves(4);
        let tree = MerkleTree::from_leaves(l.clone()).unwrap();
        let mut proof = tree.proof(1).unwrap();
        proof.steps[0].sibling[0] ^= 0xFF;
        assert!(!verify_proof(&l[1], &proof, &tree.root()));

        let mut flipped = tree.proof(1).unwrap();
        flipped.steps[1].sibling_is_left = !flipped.steps[1].sibling_is_left;
        assert!(!verify_proof(&l[1], &flipped, &tree.root()));
    }

    #[test]
    fn test_leaf_domains_differ() {
        let frag = fragment_leaf("a.txt", 0, b"x");
        assert_ne!(frag, fragment_leaf("a.txt", 1, b"x"));
        assert_ne!(frag, fragment_leaf("b.txt", 0, b"x"));
        assert_ne!(frag, fragment_leaf("a.txt", 0, b"y"));

        let root = sha256(b"root");
        assert_ne!(file_leaf("a.txt", 1, &root), file_leaf("a.txt", 2, &root));
    }

    #[test]
    fn test_fragment_leaf_preimage() {
        let expected = sha256(format!("FRAG:a.txt:0:{}", hex::encode(sha256(b"hello"))).as_bytes());
        assert_eq!(fragment_leaf("a.txt", 0, b"hello"), expected);
    }

    /// Node hashing is pinned to raw digest bytes. A builder hashing the hex text of the
    /// children would disagree on every tree with more than one leaf.
    #[test]
    fn test_internal_nodes_hash_raw_bytes_not_hex_text() {
        let l = leaves(2);
        let tree = MerkleTree::from_leaves(l.clone()).unwrap();

        let mut raw = Vec::new();
        raw.extend_from_slice(&l[0]);
        raw.extend_from_slice(&l[1]);
        assert_eq!(tree.root(), sha256(&raw));

        let hex_text = format!("{}{}", hex::encode(l[0]), hex::encode(l[1]));
        assert_ne!(tree.root(), sha256(hex_text.as_bytes()));
    }

    #[test]
    fn test_bundle_build_and_items() {
        let files = vec![
            FileFragments::chunked("a.txt", b"hello world, this is file a", 8),
            FileFragments::chunked("dir/b.bin", &[7u8; 20], 8),
        ];
        let bundle = BundleCommitment::build(files).unwrap();

        assert_eq!(bundle.files().len(), 2);
        assert_eq!(bundle.files()[0].fragments.len(), 4);
        assert_eq!(bundle.files()[1].size, 20);
        assert_eq!(bundle.items().len(), 7);
        assert_eq!(bundle.root_hex().len(), 64);

        let item = bundle.item("dir/b.bin", 2).unwrap();
        assert_eq!(item.data, vec![7u8; 4]);
        assert!(bundle.item("dir/b.bin", 3).is_none());
        assert!(bundle.item("missing", 0).is_none());
    }

    #[test]
    fn test_bundle_rejects_duplicate_paths() {
        let files = vec![
            FileFragments::chunked("a.txt", b"1", 8),
            FileFragments::chunked("a.txt", b"2", 8),
        ];
        assert_eq!(
            BundleCommitment::build(files).unwrap_err(),
            MerkleError::DuplicatePath("a.txt".to_string())
        );
    }

    #[test]
    fn test_empty_file_has_one_fragment() {
        let file = FileFragments::chunked("empty", b"", 8);
        assert_eq!(file.fragments.len(), 1);
        assert_eq!(file.size(), 0);
    }

    #[test]
    fn test_proof_json_uses_hex() {
        let tree = MerkleTree::from_leaves(leaves(2)).unwrap();
        let proof = tree.proof(0).unwrap();
        let json = serde_json::to_string(&proof).unwrap();
        assert!(json.contains(&hex::encode(proof.steps[0].sibling)));
        let decoded: MerkleProof = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, proof);
    }
}
