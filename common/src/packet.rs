//! Packet envelopes exchanged between the gateway and the receiving ledgers.
//!
//! # Wire format
//!
//! Envelopes are JSON, adjacently tagged:
//!
//! ```text
//! {"type": "fragment", "value": {"session_id": ..., "root_proof": ..., "path": ..., "index": 0, "data": "<hex>"}}
//! {"type": "manifest", "value": {"project_name": ..., "version": ..., ..., "files": [...]}}
//! {"type": "no_data",  "value": {}}
//! ```
//!
//! Acknowledgements are `{"result": "<text>"}` or `{"error": "<text>"}`.
//!
//! A receiver that meets a `type` it does not know must answer with an error
//! acknowledgement naming that type; `PacketData::decode` surfaces the name through
//! `PacketError::UnknownPacketType` for exactly that purpose.

use crate::Manifest;
use crate::error::PacketError;
use serde::{Deserialize, Serialize};

/// Names of every envelope variant this build understands.
pub const PACKET_TYPES: [&str; 3] = ["fragment", "manifest", "no_data"];

/// One fragment on its way to a storage ledger.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FragmentPacket {
    pub session_id: String,
    /// Root proof the fragment was verified against on the gateway
    pub root_proof: String,
    pub path: String,
    pub index: u64,
    #[serde(with = "hex::serde")]
    pub data: Vec<u8>,
}

/// Empty payload, used for channel liveness.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct NoDataPacket {}

/// Transport envelope.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PacketData {
    Fragment(FragmentPacket),
    Manifest(Manifest),
    NoData(NoDataPacket),
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
}

impl PacketData {
    /// Wire name of this variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            PacketData::Fragment(_) => "fragment",
            PacketData::Manifest(_) => "manifest",
            PacketData::NoData(_) => "no_data",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode an envelope, naming the variant if it is not one we know.
    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        let raw: RawEnvelope = serde_json::from_slice(bytes)?;
        if !PACKET_TYPES.contains(&raw.kind.as_str()) {
            return Err(PacketError::UnknownPacketType(raw.kind));
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Outcome reported by the receiving ledger.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Acknowledgement {
    Result(String),
    Error(String),
}

impl Acknowledgement {
    pub fn success(result: impl Into<String>) -> Self {
        Acknowledgement::Result(result.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Acknowledgement::Error(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Acknowledgement::Result(_))
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
