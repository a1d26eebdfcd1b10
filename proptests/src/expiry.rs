//! Property-based tests for the expiry sweep.
//!
//! Tests the following invariants:
//! - A session is closed by the sweep in the first round where `now > deadline`, never earlier
//! - No session is reported closed twice
//! - Every expired session ends `CLOSED_FAILED` with reason `EXPIRED`

use crate::strategies::*;
use gateway::SessionState;
use gateway::expiry::EXPIRED_REASON;
use proptest::prelude::*;
use std::collections::HashMap;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_sweep_closes_exactly_once(
        lifetimes in prop::collection::vec(1u64..500, 1..=6),
        steps in prop::collection::vec(0u64..200, 1..=12),
        (bundle, fragment_size) in bundle_strategy(),
    ) {
        let mut node = test_node();
        let mut deadlines = HashMap::new();
        for (i, lifetime) in lifetimes.iter().enumerate() {
            let owner = format!("csu1owner{i}");
            let sid = committed_session(&mut node, &owner, &bundle, fragment_size, Some(T0 + lifetime));
            deadlines.insert(sid, T0 + lifetime);
        }

        let mut closed_at: HashMap<String, u64> = HashMap::new();
        for step in steps {
            advance(&mut node, step);
            let now = node.block().time_unix();
            for sid in node.end_round().unwrap() {
                prop_assert!(closed_at.insert(sid.clone(), now).is_none(), "{} closed twice", sid);
                prop_assert!(now > deadlines[&sid]);
            }
            // A second sweep in the same block finds nothing.
            prop_assert!(node.end_round().unwrap().is_empty());

            for (sid, deadline) in &deadlines {
                let session = node.session(sid).unwrap().unwrap();
                if now > *deadline {
                    prop_assert_eq!(session.state, SessionState::ClosedFailed);
                    prop_assert_eq!(session.close_reason.as_deref(), Some(EXPIRED_REASON));
                } else {
                    prop_assert_eq!(session.state, SessionState::RootCommitted);
                    prop_assert!(!closed_at.contains_key(sid));
                }
            }
        }
    }
}
