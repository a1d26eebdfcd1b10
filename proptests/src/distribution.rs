//! Property-based tests for distribution idempotence.
//!
//! Tests the following invariants:
//! - A batch containing a fragment already distributed, or one fragment twice, is
//!   rejected whole and leaves the session untouched
//! - `distributed_count` always equals the number of distinct fragments accepted
//! - Every accepted fragment produces exactly one packet

use crate::strategies::*;
use gateway::{CsuError, MsgDistributeBatch};
use proptest::prelude::*;
use std::collections::HashSet;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_duplicates_never_double_count(
        (bundle, fragment_size) in bundle_strategy(),
        batches in prop::collection::vec(
            prop::collection::vec(any::<prop::sample::Index>(), 1..=4),
            1..=8,
        ),
    ) {
        let mut node = test_node();
        let sid = committed_session(&mut node, OWNER, &bundle, fragment_size, None);
        let items = bundle.items();

        let mut accepted: HashSet<(String, u64)> = HashSet::new();
        for batch in batches {
            let picked: Vec<_> = batch.iter().map(|i| i.get(&items).clone()).collect();
            let keys: Vec<_> = picked.iter().map(|i| (i.path.clone(), i.index)).collect();
            let unique: HashSet<_> = keys.iter().cloned().collect();
            let expect_ok = unique.len() == keys.len() && unique.is_disjoint(&accepted);

            let before = node.session(&sid).unwrap().unwrap();
            let sent_before = node.transport().sent().len();
            let result = node.distribute_batch(&MsgDistributeBatch {
                executor: ADMIN.to_string(),
                session_id: sid.clone(),
                items: picked,
            });

            if expect_ok {
                let response = result.unwrap();
                prop_assert_eq!(response.assignments.len(), keys.len());
                accepted.extend(unique);
            } else {
                let is_duplicate = matches!(result, Err(CsuError::DuplicateFragment { .. }));
                prop_assert!(is_duplicate);
                prop_assert_eq!(node.session(&sid).unwrap().unwrap(), before);
                prop_assert_eq!(node.transport().sent().len(), sent_before);
            }

            let session = node.session(&sid).unwrap().unwrap();
            prop_assert_eq!(session.distributed_count, accepted.len() as u64);
            prop_assert_eq!(node.transport().sent().len(), accepted.len());
        }
    }
}
