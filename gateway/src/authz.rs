//! Delegated authorization: capability grants and fee allowances.
//!
//! An owner delegates the right to finalize one specific session to the executor by
//! storing a session-bound grant. Grants are keyed by `(granter, grantee, msg_type)`, so
//! an owner holds at most one grant per message type towards a given executor.
//!
//! Revocation on session close is best-effort: a grant that is already gone is logged at
//! debug level, anything else at warn, and neither stops the transition being applied.

use common::{KvStore, KvStoreExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CsuError, Result};
use crate::messages::MSG_FINALIZE_AND_CLOSE_SESSION;

const GRANT_PREFIX: &str = "grant/";
const ALLOWANCE_PREFIX: &str = "allowance/";

/// What a grant allows the grantee to do.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Authorization {
    /// Valid only for one session and one message type
    SessionBound { session_id: String, msg_type: String },
    /// Any message of `msg_type`; never accepted where a session-bound grant is required
    Generic { msg_type: String },
}

impl Authorization {
    pub fn msg_type(&self) -> &str {
        match self {
            Authorization::SessionBound { msg_type, .. } | Authorization::Generic { msg_type } => {
                msg_type
            }
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Grant {
    pub authorization: Authorization,
    #[serde(default)]
    pub expiration_unix: Option<u64>,
}

impl Grant {
    pub fn session_bound(session_id: &str, msg_type: &str) -> Self {
        Self {
            authorization: Authorization::SessionBound {
                session_id: session_id.to_string(),
                msg_type: msg_type.to_string(),
            },
            expiration_unix: None,
        }
    }

    pub fn is_expired(&self, now_unix: u64) -> bool {
        self.expiration_unix.is_some_and(|exp| now_unix >= exp)
    }
}

/// Fee sponsorship from granter to grantee.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct FeeAllowance {
    #[serde(default)]
    pub spend_limit: Option<u64>,
    #[serde(default)]
    pub expiration_unix: Option<u64>,
}

/// Grant and allowance tables over a key-value store.
pub struct AuthzStore<'a> {
    kv: &'a dyn KvStore,
}

fn grant_key(granter: &str, grantee: &str, msg_type: &str) -> Vec<u8> {
    format!("{GRANT_PREFIX}{granter}/{grantee}/{msg_type}").into_bytes()
}

fn allowance_key(granter: &str, grantee: &str) -> Vec<u8> {
    format!("{ALLOWANCE_PREFIX}{granter}/{grantee}").into_bytes()
}

impl<'a> AuthzStore<'a> {
    pub fn new(kv: &'a dyn KvStore) -> Self {
        Self { kv }
    }

    /// Store `grant`, replacing any existing grant for the same message type.
    pub fn save_grant(&self, granter: &str, grantee: &str, grant: &Grant) -> Result<()> {
        let key = grant_key(granter, grantee, grant.authorization.msg_type());
        self.kv.set_value(&key, grant)?;
        Ok(())
    }

    pub fn get_grant(&self, granter: &str, grantee: &str, msg_type: &str) -> Result<Option<Grant>> {
        Ok(self.kv.get_value(&grant_key(granter, grantee, msg_type))?)
    }

    /// Delete a grant, failing with `GrantNotFound` if there is none.
    pub fn delete_grant(&self, granter: &str, grantee: &str, msg_type: &str) -> Result<()> {
        let key = grant_key(granter, grantee, msg_type);
        if !self.kv.has(&key)? {
            return Err(CsuError::GrantNotFound {
                granter: granter.to_string(),
                grantee: grantee.to_string(),
                msg_type: msg_type.to_string(),
            });
        }
        self.kv.remove(&key)?;
        Ok(())
    }

    pub fn save_allowance(&self, granter: &str, grantee: &str, allowance: &FeeAllowance) -> Result<()> {
        self.kv
            .set_value(&allowance_key(granter, grantee), allowance)?;
        Ok(())
    }

    pub fn get_allowance(&self, granter: &str, grantee: &str) -> Result<Option<FeeAllowance>> {
        Ok(self.kv.get_value(&allowance_key(granter, grantee))?)
    }

    pub fn delete_allowance(&self, granter: &str, grantee: &str) -> Result<()> {
        let key = allowance_key(granter, grantee);
        if !self.kv.has(&key)? {
            return Err(CsuError::GrantNotFound {
                granter: granter.to_string(),
                grantee: grantee.to_string(),
                msg_type: "fee_allowance".to_string(),
            });
        }
        self.kv.remove(&key)?;
        Ok(())
    }

    /// Require a live session-bound grant from `owner` to `executor` for exactly
    /// `(session_id, msg_type)`.
    pub fn check_session_grant(
        &self,
        owner: &str,
        executor: &str,
        session_id: &str,
        msg_type: &str,
        now_unix: u64,
    ) -> Result<()> {
        let grant = self
            .get_grant(owner, executor, msg_type)?
            .ok_or_else(|| CsuError::GrantNotFound {
                granter: owner.to_string(),
                grantee: executor.to_string(),
                msg_type: msg_type.to_string(),
            })?;

        let Authorization::SessionBound {
            session_id: granted_session,
            msg_type: granted_msg,
        } = &grant.authorization
        else {
            return Err(CsuError::GrantMismatch(
                "grant is not session-bound".to_string(),
            ));
        };
        if granted_session != session_id {
            return Err(CsuError::GrantMismatch(format!(
                "grant is for session {granted_session}, not {session_id}"
            )));
        }
        if granted_msg != msg_type {
            return Err(CsuError::GrantMismatch(format!(
                "grant is for {granted_msg}, not {msg_type}"
            )));
        }
        if grant.is_expired(now_unix) {
            return Err(CsuError::GrantMismatch(format!(
                "grant expired at {}",
                grant.expiration_unix.unwrap_or_default()
            )));
        }
        Ok(())
    }

    fn revoke_finalize_grant(&self, owner: &str, executor: &str, session_id: &str) -> Result<()> {
        let grant = self.get_grant(owner, executor, MSG_FINALIZE_AND_CLOSE_SESSION)?;
        if let Some(Grant {
            authorization: Authorization::SessionBound { session_id: bound, .. },
            ..
        }) = grant
            && bound != session_id
        {
            debug!(
                session_id,
                bound_session = %bound,
                owner,
                executor,
                "Finalize grant belongs to another session, kept"
            );
            return Ok(());
        }
        self.delete_grant(owner, executor, MSG_FINALIZE_AND_CLOSE_SESSION)
    }

    /// Drop the finalize grant and the fee allowance `owner` gave `executor`.
    ///
    /// A finalize grant bound to a different session is left in place: it belongs to
    /// another of the owner's sessions, which is still open. Never fails; problems are
    /// logged.
    pub fn revoke_session_grants(&self, owner: &str, executor: &str, session_id: &str) {
        let outcomes = [
            (
                "finalize_grant",
                self.revoke_finalize_grant(owner, executor, session_id),
            ),
            ("fee_allowance", self.delete_allowance(owner, executor)),
        ];
        for (what, outcome) in outcomes {
            match outcome {
                Ok(()) => debug!(session_id, owner, executor, what, "Revoked delegated grant"),
                Err(CsuError::GrantNotFound { .. }) => {
                    debug!(session_id, owner, executor, what, "No grant to revoke")
                }
                Err(e) => warn!(
                    session_id,
                    owner,
                    executor,
                    what,
                    error = %e,
                    "Failed to revoke delegated grant"
                ),
            }
        }
    }
}
