//! Outbound packet hand-off.
//!
//! Handlers never talk to the network. They queue `OutboundPacket`s in an outbox which
//! the node hands to a `PacketTransport` only after the handler's writes are committed.
//! Delivery failures are logged; the packet stays in the commitment table so a relayer
//! can pick it up from `pending_packets`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A packet committed on a source channel, waiting for its outcome.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OutboundPacket {
    pub source_channel: String,
    pub sequence: u64,
    /// Encoded `PacketData` envelope
    pub data: Vec<u8>,
    /// Unix time after which the relayer reports a timeout
    pub timeout_unix: u64,
}

#[derive(Error, Debug)]
#[error("packet delivery failed: {0}")]
pub struct TransportError(pub String);

/// Something that can carry packets to the counterparty ledgers.
pub trait PacketTransport {
    fn send(&mut self, packet: &OutboundPacket) -> Result<(), TransportError>;
}

/// Keeps every packet it is given. Used by tests and by embedders that relay themselves.
#[derive(Default, Debug)]
pub struct RecordingTransport {
    sent: Vec<OutboundPacket>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> &[OutboundPacket] {
        &self.sent
    }

    /// Take everything sent so far.
    pub fn drain(&mut self) -> Vec<OutboundPacket> {
        std::mem::take(&mut self.sent)
    }
}

impl PacketTransport for RecordingTransport {
    fn send(&mut self, packet: &OutboundPacket) -> Result<(), TransportError> {
        self.sent.push(packet.clone());
        Ok(())
    }
}

/// Logs each packet and leaves delivery to an external relayer polling the
/// commitment table.
#[derive(Default, Debug, Clone, Copy)]
pub struct LogTransport;

impl PacketTransport for LogTransport {
    fn send(&mut self, packet: &OutboundPacket) -> Result<(), TransportError> {
        tracing::info!(
            channel = %packet.source_channel,
            sequence = packet.sequence,
            bytes = packet.data.len(),
            timeout_unix = packet.timeout_unix,
            "Packet committed for relay"
        );
        Ok(())
    }
}
