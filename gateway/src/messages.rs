//! Request and response types for the gateway's mutating operations.

use common::{DistributeItem, Manifest};
use serde::{Deserialize, Serialize};

/// Message type a finalize grant must name.
pub const MSG_FINALIZE_AND_CLOSE_SESSION: &str = "/csu.v1.MsgFinalizeAndCloseSession";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MsgInitSession {
    pub executor: String,
    pub owner: String,
    pub fragment_size: u64,
    /// Absolute deadline; `default_deadline_seconds` from now when absent
    #[serde(default)]
    pub deadline_unix: Option<u64>,
}

/// Returned once by InitSession. The plaintext token is never retrievable again.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct InitSessionResponse {
    pub session_id: String,
    pub upload_token: String,
    pub deadline_unix: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MsgCommitRootProof {
    pub owner: String,
    pub session_id: String,
    pub root_proof: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MsgDistributeBatch {
    pub executor: String,
    pub session_id: String,
    pub items: Vec<DistributeItem>,
}

/// Where one distributed item went.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FragmentAssignment {
    pub path: String,
    pub index: u64,
    pub channel_id: String,
    pub sequence: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DistributeBatchResponse {
    pub assignments: Vec<FragmentAssignment>,
    pub distributed_count: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MsgFinalizeAndCloseSession {
    pub executor: String,
    pub session_id: String,
    pub manifest: Manifest,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FinalizeResponse {
    pub channel_id: String,
    pub sequence: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MsgAbortAndCloseSession {
    pub executor: String,
    pub session_id: String,
    pub reason: String,
}
