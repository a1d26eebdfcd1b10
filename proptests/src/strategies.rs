//! Shared proptest strategies for property-based testing.
//!
//! This module provides reusable strategies for generating:
//! - Bundles of files with distinct paths and non-empty content
//! - Fragment sizes and key fields
//! - A gateway node with storage and metadata channels opened

use common::{BundleCommitment, FileFragments, MemoryStore};
use gateway::{
    BlockContext, ChannelRole, CsuParams, GatewayNode, MsgCommitRootProof, MsgInitSession,
    RecordingTransport,
};
use proptest::prelude::*;

pub const ADMIN: &str = "csu1admin";
pub const OWNER: &str = "csu1alice";
/// Block time the test nodes start at (Unix seconds).
pub const T0: u64 = 1_700_000_000;

pub type TestNode = GatewayNode<MemoryStore, RecordingTransport>;

/// Generate a fragment size small enough to split test files into several fragments.
pub fn fragment_size_strategy() -> impl Strategy<Value = usize> {
    1usize..=16
}

/// Generate 1-4 files with distinct paths and 1-64 bytes each.
pub fn files_strategy() -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    prop::collection::btree_map(
        "[a-z]{1,6}(/[a-z]{1,6})?\\.(txt|html|css)",
        prop::collection::vec(any::<u8>(), 1..=64),
        1..=4,
    )
    .prop_map(|files| files.into_iter().collect())
}

/// Generate a bundle commitment together with the fragment size it was built with.
pub fn bundle_strategy() -> impl Strategy<Value = (BundleCommitment, usize)> {
    (files_strategy(), fragment_size_strategy()).prop_map(|(files, fragment_size)| {
        (build_bundle(&files, fragment_size), fragment_size)
    })
}

/// Generate a key field: non-empty, no control characters.
pub fn key_field_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9._/-]{1,24}"
}

pub fn build_bundle(files: &[(String, Vec<u8>)], fragment_size: usize) -> BundleCommitment {
    BundleCommitment::build(
        files
            .iter()
            .map(|(path, data)| FileFragments::chunked(path.as_str(), data, fragment_size))
            .collect(),
    )
    .unwrap()
}

fn params() -> CsuParams {
    CsuParams {
        local_admin: Some(ADMIN.to_string()),
        ..CsuParams::default()
    }
}

/// A node at `T0` with two storage channels and one metadata channel.
pub fn test_node() -> TestNode {
    let mut node = GatewayNode::new(MemoryStore::new(), RecordingTransport::new(), params());
    node.begin_block(BlockContext::new(1, T0 * 1_000_000_000));
    node.open_channel("channel-storage-a", ChannelRole::Storage)
        .unwrap();
    node.open_channel("channel-storage-b", ChannelRole::Storage)
        .unwrap();
    node.open_channel("channel-meta", ChannelRole::Metadata)
        .unwrap();
    node
}

/// Move the node `secs` seconds and one block forward.
pub fn advance(node: &mut TestNode, secs: u64) {
    let block = node.block();
    node.begin_block(BlockContext::new(
        block.height + 1,
        block.time_unix_nanos + secs * 1_000_000_000,
    ));
}

/// Open a session for `owner` with the given deadline and commit `bundle`'s root.
pub fn committed_session(
    node: &mut TestNode,
    owner: &str,
    bundle: &BundleCommitment,
    fragment_size: usize,
    deadline_unix: Option<u64>,
) -> String {
    let session_id = node
        .init_session(&MsgInitSession {
            executor: ADMIN.to_string(),
            owner: owner.to_string(),
            fragment_size: fragment_size as u64,
            deadline_unix,
        })
        .unwrap()
        .session_id;
    node.commit_root_proof(&MsgCommitRootProof {
        owner: owner.to_string(),
        session_id: session_id.clone(),
        root_proof: bundle.root_hex(),
    })
    .unwrap();
    session_id
}
