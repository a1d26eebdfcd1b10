//! Property-based tests for the key encoders.
//!
//! Tests the following invariants:
//! - `parse_frag_key` inverts `frag_key` for legal fields
//! - Fragment keys of one file sort by numeric index
//! - Sequence keys sort by numeric sequence
//! - Fragment ids are distinct for distinct fragments

use crate::strategies::*;
use common::keys::{frag_key, fragment_id, parse_frag_key, seq_key, session_id_from_frag_key};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn prop_frag_key_parses_back(
        session_id in key_field_strategy(),
        path in key_field_strategy(),
        index in any::<u64>(),
    ) {
        let key = frag_key(&session_id, &path, index);
        prop_assert_eq!(parse_frag_key(&key), Some((session_id.as_str(), path.as_str(), index)));
        prop_assert_eq!(session_id_from_frag_key(&key), Some(session_id.as_str()));
    }

    #[test]
    fn prop_frag_key_orders_by_index(
        session_id in key_field_strategy(),
        path in key_field_strategy(),
        a in any::<u64>(),
        b in any::<u64>(),
    ) {
        let (ka, kb) = (frag_key(&session_id, &path, a), frag_key(&session_id, &path, b));
        prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
    }

    #[test]
    fn prop_seq_key_orders_by_sequence(a in any::<u64>(), b in any::<u64>()) {
        prop_assert_eq!(a.cmp(&b), seq_key(a).cmp(&seq_key(b)));
    }

    #[test]
    fn prop_fragment_id_distinct(
        session_id in key_field_strategy(),
        path in key_field_strategy(),
        index in 0u64..u64::MAX,
    ) {
        let id = fragment_id(&session_id, &path, index);
        prop_assert_eq!(id.len(), 64);
        prop_assert_ne!(&id, &fragment_id(&session_id, &path, index + 1));
        prop_assert_ne!(&id, &fragment_id(&format!("{session_id}0"), &path, index));
    }
}
