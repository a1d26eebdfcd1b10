//! The five session handlers.
//!
//! Every handler checks, in order: input validation, `local_admin` configured, session
//! exists, session not closed, caller identity, delegated grant (finalize only), state
//! precondition. Nothing is written until all checks for a call have passed, and the
//! caller discards the write buffer on any error anyway.

use common::keys::{token_hash, upload_token};
use common::{Manifest, PacketData, validate_digest_hex};
use tracing::info;

use crate::context::{ExecCtx, LedgerEvent};
use crate::distribution::{distribute, validate_items};
use crate::error::{CsuError, Result, check_address, check_key_field};
use crate::messages::{
    DistributeBatchResponse, FinalizeResponse, InitSessionResponse, MSG_FINALIZE_AND_CLOSE_SESSION,
    MsgAbortAndCloseSession, MsgCommitRootProof, MsgDistributeBatch, MsgFinalizeAndCloseSession,
    MsgInitSession,
};
use crate::state::{Session, SessionState};

/// Load a session that is still open.
fn load_open_session(ctx: &ExecCtx<'_>, session_id: &str) -> Result<Session> {
    let session = ctx.state.load_session(session_id)?;
    if session.state.is_closed() {
        return Err(CsuError::SessionClosed(session.session_id));
    }
    Ok(session)
}

/// `msg_executor == session.executor == local_admin`
fn require_executor(admin: &str, msg_executor: &str, session: &Session) -> Result<()> {
    if msg_executor != admin {
        return Err(CsuError::Unauthorized {
            role: "executor",
            expected: admin.to_string(),
            actual: msg_executor.to_string(),
        });
    }
    if session.executor != admin {
        return Err(CsuError::Unauthorized {
            role: "session executor",
            expected: admin.to_string(),
            actual: session.executor.clone(),
        });
    }
    Ok(())
}

fn require_distributable(session: &Session) -> Result<()> {
    if !session.has_root_proof() {
        return Err(CsuError::RootProofNotCommitted(session.session_id.clone()));
    }
    match session.state {
        SessionState::RootCommitted | SessionState::Distributing => Ok(()),
        state => Err(CsuError::InvalidState {
            session_id: session.session_id.clone(),
            state: state.to_string(),
            expected: "ROOT_COMMITTED or DISTRIBUTING",
        }),
    }
}

/// The manifest must describe exactly the session being finalized.
fn check_manifest_binding(manifest: &Manifest, session: &Session) -> Result<()> {
    let mismatch = |field: &str, got: &str, want: &str| {
        CsuError::InvalidManifest(format!("{field} is {got:?}, session has {want:?}"))
    };
    if manifest.session_id != session.session_id {
        return Err(mismatch("session_id", &manifest.session_id, &session.session_id));
    }
    if manifest.owner != session.owner {
        return Err(mismatch("owner", &manifest.owner, &session.owner));
    }
    if manifest.root_proof != session.root_proof {
        return Err(mismatch("root_proof", &manifest.root_proof, &session.root_proof));
    }
    if manifest.fragment_size != session.fragment_size {
        return Err(mismatch(
            "fragment_size",
            &manifest.fragment_size.to_string(),
            &session.fragment_size.to_string(),
        ));
    }
    Ok(())
}

pub fn init_session(ctx: &mut ExecCtx<'_>, msg: &MsgInitSession) -> Result<InitSessionResponse> {
    check_address(&msg.executor)?;
    check_address(&msg.owner)?;
    let max = ctx.params.max_fragment_bytes;
    if !(1..=max).contains(&msg.fragment_size) {
        return Err(CsuError::InvalidField {
            field: "fragment_size",
            reason: format!("{} is outside 1..={max}", msg.fragment_size),
        });
    }
    let now = ctx.now_unix();
    let deadline_unix = match msg.deadline_unix {
        Some(deadline) if deadline <= now => {
            return Err(CsuError::InvalidDeadline {
                deadline_unix: deadline,
                now_unix: now,
            });
        }
        Some(deadline) => deadline,
        None => now.saturating_add(ctx.params.default_deadline_seconds),
    };

    let admin = ctx.params.local_admin()?;
    if msg.executor != admin {
        return Err(CsuError::Unauthorized {
            role: "executor",
            expected: admin.to_string(),
            actual: msg.executor.clone(),
        });
    }

    let session_id = format!("{}-{}", msg.owner, ctx.block.time_unix_nanos);
    if ctx.state.has_session(&session_id)? {
        return Err(CsuError::SessionExists(session_id));
    }

    let token = upload_token(&session_id);
    ctx.state.set_token_hash(&session_id, &token_hash(&token))?;
    ctx.state.put_session(&Session {
        session_id: session_id.clone(),
        owner: msg.owner.clone(),
        executor: msg.executor.clone(),
        fragment_size: msg.fragment_size,
        deadline_unix,
        root_proof: String::new(),
        state: SessionState::Init,
        distributed_count: 0,
        ack_success_count: 0,
        ack_error_count: 0,
        close_reason: None,
        created_at_unix: now,
    })?;
    ctx.emit(LedgerEvent::SessionOpened);

    info!(
        session_id = %session_id,
        owner = %msg.owner,
        fragment_size = msg.fragment_size,
        deadline_unix,
        "Session opened"
    );
    Ok(InitSessionResponse {
        session_id,
        upload_token: token,
        deadline_unix,
    })
}

pub fn commit_root_proof(ctx: &mut ExecCtx<'_>, msg: &MsgCommitRootProof) -> Result<()> {
    check_address(&msg.owner)?;
    check_key_field("session_id", &msg.session_id)?;
    validate_digest_hex(&msg.root_proof).map_err(|reason| CsuError::InvalidField {
        field: "root_proof",
        reason,
    })?;

    ctx.params.local_admin()?;
    let mut session = load_open_session(ctx, &msg.session_id)?;
    if msg.owner != session.owner {
        return Err(CsuError::Unauthorized {
            role: "owner",
            expected: session.owner,
            actual: msg.owner.clone(),
        });
    }
    if session.state != SessionState::Init {
        return Err(CsuError::InvalidState {
            session_id: session.session_id,
            state: session.state.to_string(),
            expected: "INIT",
        });
    }

    session.root_proof = msg.root_proof.to_ascii_lowercase();
    session.advance(SessionState::RootCommitted)?;
    ctx.state.put_session(&session)?;

    info!(session_id = %session.session_id, root_proof = %session.root_proof, "Root proof committed");
    Ok(())
}

pub fn distribute_batch(
    ctx: &mut ExecCtx<'_>,
    msg: &MsgDistributeBatch,
) -> Result<DistributeBatchResponse> {
    check_address(&msg.executor)?;
    check_key_field("session_id", &msg.session_id)?;
    validate_items(&msg.items, ctx.params.max_fragment_bytes)?;

    let admin = ctx.params.local_admin()?;
    let mut session = load_open_session(ctx, &msg.session_id)?;
    require_executor(admin, &msg.executor, &session)?;
    require_distributable(&session)?;

    let assignments = distribute(ctx, &mut session, &msg.items)?;
    if session.state == SessionState::RootCommitted {
        session.advance(SessionState::Distributing)?;
    }
    ctx.state.put_session(&session)?;

    info!(
        session_id = %session.session_id,
        items = assignments.len(),
        distributed_count = session.distributed_count,
        "Batch distributed"
    );
    Ok(DistributeBatchResponse {
        assignments,
        distributed_count: session.distributed_count,
    })
}

pub fn finalize_and_close_session(
    ctx: &mut ExecCtx<'_>,
    msg: &MsgFinalizeAndCloseSession,
) -> Result<FinalizeResponse> {
    check_address(&msg.executor)?;
    check_key_field("session_id", &msg.session_id)?;
    msg.manifest.validate().map_err(CsuError::InvalidManifest)?;

    let admin = ctx.params.local_admin()?;
    let mut session = load_open_session(ctx, &msg.session_id)?;
    require_executor(admin, &msg.executor, &session)?;
    ctx.authz.check_session_grant(
        &session.owner,
        &msg.executor,
        &session.session_id,
        MSG_FINALIZE_AND_CLOSE_SESSION,
        ctx.now_unix(),
    )?;
    require_distributable(&session)?;
    check_manifest_binding(&msg.manifest, &session)?;

    let channel = ctx
        .state
        .metadata_channel()?
        .ok_or(CsuError::NoMetadataChannel)?;
    let sequence = ctx.send_packet(&channel, &PacketData::Manifest(msg.manifest.clone()))?;
    ctx.state
        .bind_manifest_sequence(&channel, sequence, &session.session_id)?;

    session.advance(SessionState::Finalizing)?;
    ctx.state.put_session(&session)?;
    ctx.authz
        .revoke_session_grants(&session.owner, &session.executor, &session.session_id);
    ctx.emit(LedgerEvent::ManifestSent);

    info!(
        session_id = %session.session_id,
        project = %msg.manifest.project_name,
        version = %msg.manifest.version,
        channel = %channel,
        sequence,
        "Manifest sent, session finalizing"
    );
    Ok(FinalizeResponse {
        channel_id: channel,
        sequence,
    })
}

pub fn abort_and_close_session(ctx: &mut ExecCtx<'_>, msg: &MsgAbortAndCloseSession) -> Result<()> {
    check_address(&msg.executor)?;
    check_key_field("session_id", &msg.session_id)?;
    if msg.reason.trim().is_empty() {
        return Err(CsuError::EmptyField("reason"));
    }

    let admin = ctx.params.local_admin()?;
    let mut session = load_open_session(ctx, &msg.session_id)?;
    require_executor(admin, &msg.executor, &session)?;

    session.fail(msg.reason.clone())?;
    ctx.state.put_session(&session)?;
    ctx.authz
        .revoke_session_grants(&session.owner, &session.executor, &session.session_id);
    ctx.emit(LedgerEvent::SessionClosed(SessionState::ClosedFailed));

    info!(session_id = %session.session_id, reason = %msg.reason, "Session aborted");
    Ok(())
}
