//! The gateway ledger node.
//!
//! `GatewayNode` owns the store, the packet transport and the parameters. Every mutating
//! entry point runs through `execute`, which gives the operation a write buffer over the
//! store, commits it only if the operation succeeds, and only then releases queued
//! packets to the transport and counts the operation's events.

use common::keys::token_hash;
use common::{CacheStore, KvStore};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::authz::{AuthzStore, FeeAllowance, Grant};
use crate::config::CsuParams;
use crate::context::{BlockContext, ExecCtx};
use crate::correlator::{PacketOutcome, Resolution, on_packet_outcome};
use crate::error::{CsuError, Result, check_address};
use crate::expiry::sweep_expired;
use crate::handlers;
use crate::messages::{
    DistributeBatchResponse, FinalizeResponse, InitSessionResponse, MsgAbortAndCloseSession,
    MsgCommitRootProof, MsgDistributeBatch, MsgFinalizeAndCloseSession, MsgInitSession,
};
use crate::metrics::Metrics;
use crate::state::{Session, SessionStore};
use crate::transport::{OutboundPacket, PacketTransport};

/// What a channel carries.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRole {
    Storage,
    Metadata,
}

/// Channel ids end up inside store keys: 1-64 characters of `[A-Za-z0-9._-]`.
pub fn validate_channel_id(channel_id: &str) -> Result<()> {
    let legal = !channel_id.is_empty()
        && channel_id.len() <= 64
        && channel_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !legal {
        return Err(CsuError::InvalidField {
            field: "channel_id",
            reason: format!("{channel_id:?} must be 1-64 characters of [A-Za-z0-9._-]"),
        });
    }
    Ok(())
}

pub struct GatewayNode<S: KvStore, T: PacketTransport> {
    store: S,
    transport: T,
    params: CsuParams,
    metrics: Metrics,
    block: BlockContext,
}

impl<S: KvStore, T: PacketTransport> GatewayNode<S, T> {
    pub fn new(store: S, transport: T, params: CsuParams) -> Self {
        Self {
            store,
            transport,
            params,
            metrics: Metrics::new(),
            block: BlockContext::now(0),
        }
    }

    pub fn params(&self) -> &CsuParams {
        &self.params
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn block(&self) -> BlockContext {
        self.block
    }

    /// Set the block subsequent operations execute in.
    pub fn begin_block(&mut self, block: BlockContext) {
        self.block = block;
    }

    /// Run `op` against a write buffer and commit it only if `op` succeeds.
    fn execute<R>(
        &mut self,
        operation: &'static str,
        op: impl FnOnce(&mut ExecCtx<'_>) -> Result<R>,
    ) -> Result<R> {
        let cache = CacheStore::new(&self.store);
        let (result, outbox, events) = {
            let mut ctx = ExecCtx::new(&cache, &self.params, self.block);
            let result = op(&mut ctx);
            let (outbox, events) = ctx.into_effects();
            (result, outbox, events)
        };

        let value = match result {
            Ok(value) => value,
            Err(e) => {
                self.metrics.record_rejection(operation, e.kind());
                debug!(operation, kind = e.kind().as_str(), error = %e, "Operation rejected");
                return Err(e);
            }
        };
        cache.commit()?;

        for packet in &outbox {
            if let Err(e) = self.transport.send(packet) {
                warn!(
                    operation,
                    channel = %packet.source_channel,
                    sequence = packet.sequence,
                    error = %e,
                    "Packet hand-off failed; left pending for relay"
                );
            }
        }
        for event in &events {
            self.metrics.record(event);
        }
        Ok(value)
    }

    // ----- session handlers -----

    pub fn init_session(&mut self, msg: &MsgInitSession) -> Result<InitSessionResponse> {
        self.execute("init_session", |ctx| handlers::init_session(ctx, msg))
    }

    pub fn commit_root_proof(&mut self, msg: &MsgCommitRootProof) -> Result<()> {
        self.execute("commit_root_proof", |ctx| {
            handlers::commit_root_proof(ctx, msg)
        })
    }

    pub fn distribute_batch(&mut self, msg: &MsgDistributeBatch) -> Result<DistributeBatchResponse> {
        self.execute("distribute_batch", |ctx| handlers::distribute_batch(ctx, msg))
    }

    pub fn finalize_and_close_session(
        &mut self,
        msg: &MsgFinalizeAndCloseSession,
    ) -> Result<FinalizeResponse> {
        self.execute("finalize_and_close_session", |ctx| {
            handlers::finalize_and_close_session(ctx, msg)
        })
    }

    pub fn abort_and_close_session(&mut self, msg: &MsgAbortAndCloseSession) -> Result<()> {
        self.execute("abort_and_close_session", |ctx| {
            handlers::abort_and_close_session(ctx, msg)
        })
    }

    // ----- packet outcomes -----

    /// Relayer callback: acknowledgement bytes for `(channel, sequence)`.
    pub fn on_acknowledgement(
        &mut self,
        channel: &str,
        sequence: u64,
        ack: &[u8],
    ) -> Result<Resolution> {
        let outcome = PacketOutcome::from_ack_bytes(ack);
        self.execute("on_acknowledgement", |ctx| {
            on_packet_outcome(ctx, channel, sequence, &outcome)
        })
    }

    /// Relayer callback: `(channel, sequence)` timed out.
    pub fn on_timeout(&mut self, channel: &str, sequence: u64) -> Result<Resolution> {
        self.execute("on_timeout", |ctx| {
            on_packet_outcome(ctx, channel, sequence, &PacketOutcome::Timeout)
        })
    }

    // ----- rounds -----

    /// End-of-round processing: the expiry sweep. Returns the sessions it closed.
    pub fn end_round(&mut self) -> Result<Vec<String>> {
        let closed = self.execute("end_round", sweep_expired)?;
        if !closed.is_empty() {
            info!(
                height = self.block.height,
                expired = closed.len(),
                "Expired sessions closed"
            );
        }
        Ok(closed)
    }

    // ----- channels -----

    pub fn open_channel(&mut self, channel_id: &str, role: ChannelRole) -> Result<()> {
        validate_channel_id(channel_id)?;
        self.execute("open_channel", |ctx| {
            match role {
                ChannelRole::Storage => ctx.state.add_storage_channel(channel_id)?,
                ChannelRole::Metadata => {
                    if let Some(previous) = ctx.state.metadata_channel()?
                        && previous != channel_id
                    {
                        warn!(previous = %previous, channel_id, "Replacing metadata channel");
                    }
                    ctx.state.set_metadata_channel(Some(channel_id))?
                }
            }
            info!(channel_id, ?role, "Channel opened");
            Ok(())
        })
    }

    /// Deregister a channel. Bindings for packets already sent on it stay resolvable.
    pub fn close_channel(&mut self, channel_id: &str) -> Result<()> {
        self.execute("close_channel", |ctx| {
            if ctx.state.is_storage_channel(channel_id)? {
                ctx.state.remove_storage_channel(channel_id)?;
            } else if ctx.state.metadata_channel()?.as_deref() == Some(channel_id) {
                ctx.state.set_metadata_channel(None)?;
            } else {
                return Err(CsuError::UnknownChannel(channel_id.to_string()));
            }
            info!(channel_id, "Channel closed");
            Ok(())
        })
    }

    // ----- grants -----

    fn check_grant_parties(granter: &str, grantee: &str) -> Result<()> {
        check_address(granter)?;
        check_address(grantee)?;
        if granter == grantee {
            return Err(CsuError::InvalidField {
                field: "grantee",
                reason: "cannot grant to self".to_string(),
            });
        }
        Ok(())
    }

    /// Store a capability grant signed by `granter`.
    pub fn grant_authorization(&mut self, granter: &str, grantee: &str, grant: &Grant) -> Result<()> {
        Self::check_grant_parties(granter, grantee)?;
        if grant.authorization.msg_type().is_empty() {
            return Err(CsuError::EmptyField("msg_type"));
        }
        if let crate::authz::Authorization::SessionBound { session_id, .. } = &grant.authorization {
            crate::error::check_key_field("session_id", session_id)?;
        }
        let now = self.block.time_unix();
        if grant.is_expired(now) {
            return Err(CsuError::InvalidField {
                field: "expiration_unix",
                reason: format!("already expired at {now}"),
            });
        }
        self.execute("grant_authorization", |ctx| {
            ctx.authz.save_grant(granter, grantee, grant)?;
            info!(granter, grantee, msg_type = grant.authorization.msg_type(), "Grant stored");
            Ok(())
        })
    }

    pub fn revoke_authorization(&mut self, granter: &str, grantee: &str, msg_type: &str) -> Result<()> {
        Self::check_grant_parties(granter, grantee)?;
        self.execute("revoke_authorization", |ctx| {
            ctx.authz.delete_grant(granter, grantee, msg_type)?;
            info!(granter, grantee, msg_type, "Grant revoked");
            Ok(())
        })
    }

    pub fn grant_fee_allowance(
        &mut self,
        granter: &str,
        grantee: &str,
        allowance: &FeeAllowance,
    ) -> Result<()> {
        Self::check_grant_parties(granter, grantee)?;
        self.execute("grant_fee_allowance", |ctx| {
            ctx.authz.save_allowance(granter, grantee, allowance)
        })
    }

    pub fn revoke_fee_allowance(&mut self, granter: &str, grantee: &str) -> Result<()> {
        Self::check_grant_parties(granter, grantee)?;
        self.execute("revoke_fee_allowance", |ctx| {
            ctx.authz.delete_allowance(granter, grantee)
        })
    }

    // ----- queries -----

    fn reader(&self) -> SessionStore<'_> {
        SessionStore::new(&self.store)
    }

    pub fn session(&self, session_id: &str) -> Result<Option<Session>> {
        self.reader().get_session(session_id)
    }

    pub fn sessions(&self) -> Result<Vec<Session>> {
        self.reader().sessions()
    }

    pub fn sessions_by_owner(&self, owner: &str) -> Result<Vec<Session>> {
        self.reader().sessions_by_owner(owner)
    }

    pub fn pending_packets(&self) -> Result<Vec<OutboundPacket>> {
        self.reader().pending_packets()
    }

    pub fn storage_channels(&self) -> Result<Vec<String>> {
        self.reader().storage_channels()
    }

    pub fn grant(&self, granter: &str, grantee: &str, msg_type: &str) -> Result<Option<Grant>> {
        AuthzStore::new(&self.store).get_grant(granter, grantee, msg_type)
    }

    pub fn fee_allowance(&self, granter: &str, grantee: &str) -> Result<Option<FeeAllowance>> {
        AuthzStore::new(&self.store).get_allowance(granter, grantee)
    }

    /// Whether `token` is the upload token issued for `session_id`.
    pub fn verify_upload_token(&self, session_id: &str, token: &str) -> Result<bool> {
        let Some(stored) = self.reader().token_hash(session_id)? else {
            return Ok(false);
        };
        let presented = token_hash(token);
        Ok(stored.as_bytes().ct_eq(presented.as_bytes()).into())
    }
}
