//! Property-based tests for packet outcome correlation.
//!
//! Tests the following invariants:
//! - Only the first report for a packet changes the session; later ones are no-ops
//! - Success and error counters together equal the number of distinct packets reported
//! - Outcomes for sequences that were never sent resolve to nothing

use crate::strategies::*;
use common::Acknowledgement;
use gateway::{MsgDistributeBatch, Resolution};
use proptest::prelude::*;
use std::collections::HashSet;

#[derive(Clone, Copy, Debug)]
enum Report {
    Ack,
    ErrorAck,
    Timeout,
}

fn report_strategy() -> impl Strategy<Value = Report> {
    prop_oneof![Just(Report::Ack), Just(Report::ErrorAck), Just(Report::Timeout)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_repeated_reports_are_noops(
        (bundle, fragment_size) in bundle_strategy(),
        reports in prop::collection::vec(
            (any::<prop::sample::Index>(), report_strategy()),
            1..=32,
        ),
        stray_sequence in 1_000_000u64..2_000_000,
    ) {
        let mut node = test_node();
        let sid = committed_session(&mut node, OWNER, &bundle, fragment_size, None);
        node.distribute_batch(&MsgDistributeBatch {
            executor: ADMIN.to_string(),
            session_id: sid.clone(),
            items: bundle.items(),
        })
        .unwrap();
        let packets = node.transport_mut().drain();

        let mut resolved = HashSet::new();
        let (mut successes, mut errors) = (0u64, 0u64);
        for (pick, report) in reports {
            let packet = pick.get(&packets);
            let before = node.session(&sid).unwrap().unwrap();
            let resolution = match report {
                Report::Ack => node.on_acknowledgement(
                    &packet.source_channel,
                    packet.sequence,
                    &Acknowledgement::success("stored").encode().unwrap(),
                ),
                Report::ErrorAck => node.on_acknowledgement(
                    &packet.source_channel,
                    packet.sequence,
                    &Acknowledgement::error("disk full").encode().unwrap(),
                ),
                Report::Timeout => node.on_timeout(&packet.source_channel, packet.sequence),
            }
            .unwrap();

            if resolved.insert((packet.source_channel.clone(), packet.sequence)) {
                let expected_success = matches!(report, Report::Ack);
                if expected_success {
                    successes += 1;
                } else {
                    errors += 1;
                }
                prop_assert_eq!(
                    resolution,
                    Resolution::Fragment { session_id: sid.clone(), success: expected_success }
                );
            } else {
                prop_assert_eq!(resolution, Resolution::Unbound);
                prop_assert_eq!(node.session(&sid).unwrap().unwrap(), before);
            }
        }

        let session = node.session(&sid).unwrap().unwrap();
        prop_assert_eq!(session.ack_success_count, successes);
        prop_assert_eq!(session.ack_error_count, errors);
        prop_assert_eq!(node.pending_packets().unwrap().len(), packets.len() - resolved.len());

        let stray = node.on_timeout("channel-storage-a", stray_sequence).unwrap();
        prop_assert_eq!(stray, Resolution::Unbound);
        prop_assert_eq!(node.session(&sid).unwrap().unwrap(), session);
    }
}
