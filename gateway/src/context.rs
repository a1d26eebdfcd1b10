//! Per-call execution context handed to handlers, the correlator and the expiry sweep.

use common::PacketData;
use common::{KvStore, now_nanos};
use tracing::debug;

use crate::authz::AuthzStore;
use crate::config::CsuParams;
use crate::error::Result;
use crate::state::{SessionState, SessionStore};
use crate::transport::OutboundPacket;

/// Height and time of the block being executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockContext {
    pub height: u64,
    pub time_unix_nanos: u64,
}

impl BlockContext {
    pub fn new(height: u64, time_unix_nanos: u64) -> Self {
        Self {
            height,
            time_unix_nanos,
        }
    }

    /// Block at `height` stamped with the wall clock.
    pub fn now(height: u64) -> Self {
        Self::new(height, now_nanos())
    }

    pub fn time_unix(&self) -> u64 {
        self.time_unix_nanos / 1_000_000_000
    }
}

/// Something worth counting once the call that produced it has committed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerEvent {
    SessionOpened,
    SessionClosed(SessionState),
    FragmentsDistributed(u64),
    ManifestSent,
    PacketResolved {
        kind: &'static str,
        outcome: &'static str,
    },
}

/// Everything a handler may touch. Writes go to the buffered store underneath; packets and
/// events are held back until the caller decides to commit.
pub struct ExecCtx<'a> {
    pub state: SessionStore<'a>,
    pub authz: AuthzStore<'a>,
    pub params: &'a CsuParams,
    pub block: BlockContext,
    outbox: Vec<OutboundPacket>,
    events: Vec<LedgerEvent>,
}

impl<'a> ExecCtx<'a> {
    pub fn new(kv: &'a dyn KvStore, params: &'a CsuParams, block: BlockContext) -> Self {
        Self {
            state: SessionStore::new(kv),
            authz: AuthzStore::new(kv),
            params,
            block,
            outbox: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn now_unix(&self) -> u64 {
        self.block.time_unix()
    }

    /// Commit `data` on `channel` and queue it for delivery. Returns the sequence.
    pub fn send_packet(&mut self, channel: &str, data: &PacketData) -> Result<u64> {
        let sequence = self.state.next_sequence(channel)?;
        let packet = OutboundPacket {
            source_channel: channel.to_string(),
            sequence,
            data: data.encode()?,
            timeout_unix: self
                .now_unix()
                .saturating_add(self.params.packet_timeout_seconds),
        };
        self.state.put_packet(&packet)?;
        debug!(
            channel,
            sequence,
            kind = data.type_name(),
            "Packet committed"
        );
        self.outbox.push(packet);
        Ok(sequence)
    }

    pub fn emit(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }

    /// Hand back the queued packets and events.
    pub fn into_effects(self) -> (Vec<OutboundPacket>, Vec<LedgerEvent>) {
        (self.outbox, self.events)
    }
}
