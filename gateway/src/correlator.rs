//! Packet outcome correlation.
//!
//! The relayer reports each packet's fate (acknowledgement or timeout) in some later round,
//! possibly twice and possibly out of order. The `(channel, sequence)` binding written at
//! send time is the only link back to what was sent; resolving a binding consumes it, so a
//! second report for the same packet finds nothing and does nothing.

use common::Acknowledgement;
use common::keys::session_id_from_frag_key;
use tracing::{debug, info, warn};

use crate::context::{ExecCtx, LedgerEvent};
use crate::error::Result;
use crate::state::SessionState;

/// Fate of a sent packet as reported by the relayer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PacketOutcome {
    Success(String),
    Error(String),
    Timeout,
}

impl PacketOutcome {
    /// Interpret raw acknowledgement bytes. Undecodable bytes count as an error.
    pub fn from_ack_bytes(bytes: &[u8]) -> Self {
        match Acknowledgement::decode(bytes) {
            Ok(Acknowledgement::Result(r)) => PacketOutcome::Success(r),
            Ok(Acknowledgement::Error(e)) => PacketOutcome::Error(e),
            Err(e) => PacketOutcome::Error(format!("malformed acknowledgement: {e}")),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PacketOutcome::Success(_))
    }

    fn label(&self) -> &'static str {
        match self {
            PacketOutcome::Success(_) => "success",
            PacketOutcome::Error(_) => "error",
            PacketOutcome::Timeout => "timeout",
        }
    }

    /// Text recorded as `close_reason` when a manifest fails.
    fn failure_reason(&self) -> String {
        match self {
            PacketOutcome::Success(_) => String::new(),
            PacketOutcome::Error(e) => e.clone(),
            PacketOutcome::Timeout => "packet timed out".to_string(),
        }
    }
}

/// What an outcome report resolved to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// No binding for this packet: already processed, or never ours
    Unbound,
    Fragment { session_id: String, success: bool },
    /// `state` is the session's state after the outcome was applied
    Manifest { session_id: String, state: SessionState },
}

/// Apply the outcome of the packet sent as `sequence` on `channel`.
pub fn on_packet_outcome(
    ctx: &mut ExecCtx<'_>,
    channel: &str,
    sequence: u64,
    outcome: &PacketOutcome,
) -> Result<Resolution> {
    ctx.state.remove_packet(channel, sequence)?;

    if let Some(frag_key) = ctx.state.take_fragment_binding(channel, sequence)? {
        return on_fragment_outcome(ctx, &frag_key, outcome);
    }
    if let Some(session_id) = ctx.state.take_manifest_binding(channel, sequence)? {
        return on_manifest_outcome(ctx, session_id, outcome);
    }

    debug!(channel, sequence, outcome = outcome.label(), "No binding for packet outcome");
    Ok(Resolution::Unbound)
}

fn on_fragment_outcome(
    ctx: &mut ExecCtx<'_>,
    frag_key: &str,
    outcome: &PacketOutcome,
) -> Result<Resolution> {
    let Some(session_id) = session_id_from_frag_key(frag_key) else {
        warn!(frag_key, "Bound fragment key does not parse; dropping binding");
        return Ok(Resolution::Unbound);
    };
    let Some(mut session) = ctx.state.get_session(session_id)? else {
        warn!(session_id, "Fragment outcome for unknown session");
        return Ok(Resolution::Unbound);
    };

    match outcome {
        PacketOutcome::Success(_) => session.ack_success_count += 1,
        PacketOutcome::Error(_) | PacketOutcome::Timeout => {
            session.ack_error_count += 1;
            warn!(
                session_id,
                outcome = outcome.label(),
                reason = %outcome.failure_reason(),
                "Fragment delivery failed"
            );
        }
    }
    ctx.state.put_session(&session)?;
    ctx.emit(LedgerEvent::PacketResolved {
        kind: "fragment",
        outcome: outcome.label(),
    });

    Ok(Resolution::Fragment {
        session_id: session.session_id,
        success: outcome.is_success(),
    })
}

fn on_manifest_outcome(
    ctx: &mut ExecCtx<'_>,
    session_id: String,
    outcome: &PacketOutcome,
) -> Result<Resolution> {
    let Some(mut session) = ctx.state.get_session(&session_id)? else {
        warn!(session_id = %session_id, "Manifest outcome for unknown session");
        return Ok(Resolution::Unbound);
    };
    ctx.emit(LedgerEvent::PacketResolved {
        kind: "manifest",
        outcome: outcome.label(),
    });

    if session.state != SessionState::Finalizing {
        debug!(
            session_id = %session_id,
            state = %session.state,
            "Manifest outcome for session no longer finalizing"
        );
        return Ok(Resolution::Manifest {
            session_id,
            state: session.state,
        });
    }

    if outcome.is_success() {
        session.advance(SessionState::ClosedSuccess)?;
        info!(session_id = %session_id, "Manifest acknowledged, session closed");
    } else {
        session.fail(outcome.failure_reason())?;
        ctx.authz
            .revoke_session_grants(&session.owner, &session.executor, &session.session_id);
        warn!(
            session_id = %session_id,
            reason = session.close_reason.as_deref().unwrap_or_default(),
            "Manifest delivery failed, session closed"
        );
    }
    ctx.state.put_session(&session)?;
    ctx.emit(LedgerEvent::SessionClosed(session.state));

    Ok(Resolution::Manifest {
        session_id,
        state: session.state,
    })
}
