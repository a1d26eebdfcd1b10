//! End-of-round deadline sweep.

use tracing::info;

use crate::context::{ExecCtx, LedgerEvent};
use crate::error::Result;
use crate::state::SessionState;

/// Close reason recorded on expired sessions.
pub const EXPIRED_REASON: &str = "EXPIRED";

/// Close every open session whose deadline has passed. Returns the ids closed.
///
/// Closed sessions are skipped, so a second sweep in the same round closes nothing.
pub fn sweep_expired(ctx: &mut ExecCtx<'_>) -> Result<Vec<String>> {
    let now = ctx.now_unix();
    let mut closed = Vec::new();
    for mut session in ctx.state.sessions()? {
        if !session.is_expired(now) {
            continue;
        }
        let previous = session.state;
        session.fail(EXPIRED_REASON)?;
        ctx.state.put_session(&session)?;
        ctx.authz
            .revoke_session_grants(&session.owner, &session.executor, &session.session_id);
        ctx.emit(LedgerEvent::SessionClosed(SessionState::ClosedFailed));

        info!(
            session_id = %session.session_id,
            previous_state = %previous,
            deadline_unix = session.deadline_unix,
            now_unix = now,
            "Session expired"
        );
        closed.push(session.session_id);
    }
    Ok(closed)
}
