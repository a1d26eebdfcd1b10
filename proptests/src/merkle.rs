//! Property-based tests for the two-tier Merkle commitment.
//!
//! Tests the following invariants:
//! - Every proof of an N-leaf tree re-derives the same root
//! - Building the same bundle twice yields the same root
//! - Every item of a bundle verifies against the bundle root
//! - Flipping any single bit of an item's data breaks verification
//! - An item claimed at another index or path does not verify

use crate::strategies::*;
use common::merkle::{MerkleTree, compute_root, fragment_leaf, sha256, verify_proof};
use common::verifier::verify_fragment;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Proving every index of a tree re-derives its root.
    #[test]
    fn prop_every_proof_rederives_root(
        leaves in prop::collection::vec(any::<[u8; 8]>(), 1..=64),
    ) {
        let leaves: Vec<_> = leaves.iter().map(|l| sha256(l)).collect();
        let tree = MerkleTree::from_leaves(leaves.clone()).unwrap();
        let root = tree.root();

        for (i, leaf) in leaves.iter().enumerate() {
            let proof = tree.proof(i).unwrap();
            prop_assert_eq!(compute_root(leaf, &proof), root, "leaf {} of {}", i, leaves.len());
            prop_assert!(verify_proof(leaf, &proof, &root));
        }
    }

    /// Tree construction is a pure function of its input.
    #[test]
    fn prop_bundle_root_is_deterministic(
        files in files_strategy(),
        fragment_size in fragment_size_strategy(),
    ) {
        let a = build_bundle(&files, fragment_size);
        let b = build_bundle(&files, fragment_size);
        prop_assert_eq!(a.root(), b.root());
        prop_assert_eq!(a.items(), b.items());
    }

    /// The builder's own items all verify against the root it reports.
    #[test]
    fn prop_every_item_verifies((bundle, _) in bundle_strategy()) {
        let root = bundle.root_hex();
        for item in bundle.items() {
            prop_assert!(
                verify_fragment(&root, &item).is_ok(),
                "{}#{} failed to verify", item.path, item.index
            );
        }
    }

    /// Any single-bit change to fragment data is detected.
    #[test]
    fn prop_bit_flip_fails(
        (bundle, _) in bundle_strategy(),
        pick in any::<prop::sample::Index>(),
        bit in any::<prop::sample::Index>(),
    ) {
        let items = bundle.items();
        let mut item = pick.get(&items).clone();
        let bit = bit.index(item.data.len() * 8);
        item.data[bit / 8] ^= 1 << (bit % 8);

        prop_assert!(verify_fragment(&bundle.root_hex(), &item).is_err());
    }

    /// The leaf binds path and index, so the same bytes cannot be replayed elsewhere.
    #[test]
    fn prop_relocated_item_fails(
        (bundle, _) in bundle_strategy(),
        pick in any::<prop::sample::Index>(),
        shift in 1u64..1000,
    ) {
        let items = bundle.items();
        let original = pick.get(&items);
        let root = bundle.root_hex();

        let mut moved = original.clone();
        moved.index += shift;
        prop_assert!(verify_fragment(&root, &moved).is_err());

        let mut renamed = original.clone();
        renamed.path.push('~');
        prop_assert!(verify_fragment(&root, &renamed).is_err());
    }

    /// Leaves hash path, index and data; changing any one changes the leaf.
    #[test]
    fn prop_fragment_leaf_binds_fields(
        path in key_field_strategy(),
        index in 0u64..1_000_000,
        data in prop::collection::vec(any::<u8>(), 1..32),
    ) {
        let leaf = fragment_leaf(&path, index, &data);
        prop_assert_ne!(leaf, fragment_leaf(&path, index + 1, &data));
        prop_assert_ne!(leaf, fragment_leaf(&format!("{path}x"), index, &data));
        let mut other = data.clone();
        other.push(0);
        prop_assert_ne!(leaf, fragment_leaf(&path, index, &other));
    }
}
