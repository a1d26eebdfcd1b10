//! Persistent ledger state for the gateway.
//!
//! All state lives in one ordered key space behind `KvStore`. Handlers receive a
//! `SessionStore` over a write-buffer, so nothing here needs to care about atomicity.
//!
//! # Key layout
//!
//! ```text
//! session/{session_id}                  -> Session
//! fragseen/{frag_key}                   -> ()
//! fragseq/{channel}/{seq_key}           -> frag_key
//! manseq/{channel}/{seq_key}            -> session_id
//! token/{session_id}                    -> token hash
//! channel/storage/{channel}             -> ()
//! channel/metadata                      -> channel
//! nextseq/{channel}                     -> u64
//! packet/{channel}/{seq_key}            -> OutboundPacket
//! ```

use common::keys::seq_key;
use common::{KvStore, KvStoreExt};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CsuError, Result};
use crate::transport::OutboundPacket;

const SESSION_PREFIX: &str = "session/";
const FRAG_SEEN_PREFIX: &str = "fragseen/";
const FRAG_SEQ_PREFIX: &str = "fragseq/";
const MANIFEST_SEQ_PREFIX: &str = "manseq/";
const TOKEN_PREFIX: &str = "token/";
const STORAGE_CHANNEL_PREFIX: &str = "channel/storage/";
const METADATA_CHANNEL_KEY: &str = "channel/metadata";
const NEXT_SEQ_PREFIX: &str = "nextseq/";
const PACKET_PREFIX: &str = "packet/";

/// Session lifecycle. States only ever move forward; both `Closed*` states are absorbing.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Init,
    RootCommitted,
    Distributing,
    Finalizing,
    ClosedSuccess,
    ClosedFailed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Init => "INIT",
            SessionState::RootCommitted => "ROOT_COMMITTED",
            SessionState::Distributing => "DISTRIBUTING",
            SessionState::Finalizing => "FINALIZING",
            SessionState::ClosedSuccess => "CLOSED_SUCCESS",
            SessionState::ClosedFailed => "CLOSED_FAILED",
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(self, SessionState::ClosedSuccess | SessionState::ClosedFailed)
    }

    fn rank(self) -> u8 {
        match self {
            SessionState::Init => 0,
            SessionState::RootCommitted => 1,
            SessionState::Distributing => 2,
            SessionState::Finalizing => 3,
            SessionState::ClosedSuccess | SessionState::ClosedFailed => 4,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        if self.is_closed() {
            return false;
        }
        match next {
            SessionState::ClosedFailed => true,
            SessionState::ClosedSuccess => self == SessionState::Finalizing,
            _ => next.rank() >= self.rank(),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One upload session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub owner: String,
    pub executor: String,
    pub fragment_size: u64,
    pub deadline_unix: u64,
    /// Lowercase hex, empty until committed
    pub root_proof: String,
    pub state: SessionState,
    pub distributed_count: u64,
    pub ack_success_count: u64,
    pub ack_error_count: u64,
    /// Set only when the session closes as failed
    pub close_reason: Option<String>,
    pub created_at_unix: u64,
}

impl Session {
    /// Move to `next`, refusing anything that would go backwards or leave a closed state.
    pub fn advance(&mut self, next: SessionState) -> Result<()> {
        if self.state.is_closed() {
            return Err(CsuError::SessionClosed(self.session_id.clone()));
        }
        if !self.state.can_advance_to(next) {
            return Err(CsuError::InvalidState {
                session_id: self.session_id.clone(),
                state: self.state.to_string(),
                expected: "a forward transition",
            });
        }
        self.state = next;
        Ok(())
    }

    /// Close as failed with `reason`.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.advance(SessionState::ClosedFailed)?;
        self.close_reason = Some(reason.into());
        Ok(())
    }

    pub fn has_root_proof(&self) -> bool {
        !self.root_proof.is_empty()
    }

    /// Not closed and past its deadline.
    pub fn is_expired(&self, now_unix: u64) -> bool {
        !self.state.is_closed() && now_unix > self.deadline_unix
    }
}

/// Session-store view over a key-value store.
pub struct SessionStore<'a> {
    kv: &'a dyn KvStore,
}

fn key(prefix: &str, rest: &str) -> Vec<u8> {
    format!("{prefix}{rest}").into_bytes()
}

fn channel_seq_key(prefix: &str, channel: &str, seq: u64) -> Vec<u8> {
    format!("{prefix}{channel}/{}", seq_key(seq)).into_bytes()
}

fn decode_string(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| common::StoreError::Codec(e.to_string()).into())
}

impl<'a> SessionStore<'a> {
    pub fn new(kv: &'a dyn KvStore) -> Self {
        Self { kv }
    }

    // ----- sessions -----

    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.kv.get_value(&key(SESSION_PREFIX, session_id))?)
    }

    /// Load a session or fail with `SessionNotFound`.
    pub fn load_session(&self, session_id: &str) -> Result<Session> {
        self.get_session(session_id)?
            .ok_or_else(|| CsuError::SessionNotFound(session_id.to_string()))
    }

    pub fn has_session(&self, session_id: &str) -> Result<bool> {
        Ok(self.kv.has(&key(SESSION_PREFIX, session_id))?)
    }

    pub fn put_session(&self, session: &Session) -> Result<()> {
        self.kv
            .set_value(&key(SESSION_PREFIX, &session.session_id), session)?;
        Ok(())
    }

    /// Every session, ordered by id.
    pub fn sessions(&self) -> Result<Vec<Session>> {
        self.kv
            .walk(SESSION_PREFIX.as_bytes())?
            .into_iter()
            .map(|(_, bytes)| {
                bincode::deserialize(&bytes).map_err(|e| common::StoreError::from(e).into())
            })
            .collect()
    }

    /// Sessions owned by `owner`. Linear scan over the session table.
    pub fn sessions_by_owner(&self, owner: &str) -> Result<Vec<Session>> {
        Ok(self
            .sessions()?
            .into_iter()
            .filter(|s| s.owner == owner)
            .collect())
    }

    // ----- fragment-seen set -----

    pub fn is_fragment_seen(&self, frag_key: &str) -> Result<bool> {
        Ok(self.kv.has(&key(FRAG_SEEN_PREFIX, frag_key))?)
    }

    pub fn mark_fragment_seen(&self, frag_key: &str) -> Result<()> {
        self.kv.set(&key(FRAG_SEEN_PREFIX, frag_key), &[])?;
        Ok(())
    }

    // ----- sequence bindings -----

    pub fn bind_fragment_sequence(&self, channel: &str, seq: u64, frag_key: &str) -> Result<()> {
        self.kv
            .set(&channel_seq_key(FRAG_SEQ_PREFIX, channel, seq), frag_key.as_bytes())?;
        Ok(())
    }

    /// Remove and return the fragment key bound to `(channel, seq)`.
    pub fn take_fragment_binding(&self, channel: &str, seq: u64) -> Result<Option<String>> {
        self.take_binding(channel_seq_key(FRAG_SEQ_PREFIX, channel, seq))
    }

    pub fn bind_manifest_sequence(&self, channel: &str, seq: u64, session_id: &str) -> Result<()> {
        self.kv.set(
            &channel_seq_key(MANIFEST_SEQ_PREFIX, channel, seq),
            session_id.as_bytes(),
        )?;
        Ok(())
    }

    /// Remove and return the session id bound to `(channel, seq)`.
    pub fn take_manifest_binding(&self, channel: &str, seq: u64) -> Result<Option<String>> {
        self.take_binding(channel_seq_key(MANIFEST_SEQ_PREFIX, channel, seq))
    }

    fn take_binding(&self, binding_key: Vec<u8>) -> Result<Option<String>> {
        let Some(bytes) = self.kv.get(&binding_key)? else {
            return Ok(None);
        };
        self.kv.remove(&binding_key)?;
        decode_string(bytes).map(Some)
    }

    // ----- upload tokens -----

    pub fn set_token_hash(&self, session_id: &str, token_hash: &str) -> Result<()> {
        self.kv
            .set(&key(TOKEN_PREFIX, session_id), token_hash.as_bytes())?;
        Ok(())
    }

    pub fn token_hash(&self, session_id: &str) -> Result<Option<String>> {
        self.kv
            .get(&key(TOKEN_PREFIX, session_id))?
            .map(decode_string)
            .transpose()
    }

    // ----- channel registry -----

    pub fn add_storage_channel(&self, channel: &str) -> Result<()> {
        self.kv.set(&key(STORAGE_CHANNEL_PREFIX, channel), &[])?;
        Ok(())
    }

    pub fn remove_storage_channel(&self, channel: &str) -> Result<()> {
        self.kv.remove(&key(STORAGE_CHANNEL_PREFIX, channel))?;
        Ok(())
    }

    /// Registered storage channels, lexicographically sorted.
    pub fn storage_channels(&self) -> Result<Vec<String>> {
        let mut channels = self
            .kv
            .walk(STORAGE_CHANNEL_PREFIX.as_bytes())?
            .into_iter()
            .map(|(k, _)| decode_string(k[STORAGE_CHANNEL_PREFIX.len()..].to_vec()))
            .collect::<Result<Vec<_>>>()?;
        // walk order is a property of the backend; placement must not depend on it
        channels.sort();
        Ok(channels)
    }

    pub fn is_storage_channel(&self, channel: &str) -> Result<bool> {
        Ok(self.kv.has(&key(STORAGE_CHANNEL_PREFIX, channel))?)
    }

    pub fn set_metadata_channel(&self, channel: Option<&str>) -> Result<()> {
        match channel {
            Some(c) => self.kv.set(METADATA_CHANNEL_KEY.as_bytes(), c.as_bytes())?,
            None => self.kv.remove(METADATA_CHANNEL_KEY.as_bytes())?,
        }
        Ok(())
    }

    pub fn metadata_channel(&self) -> Result<Option<String>> {
        self.kv
            .get(METADATA_CHANNEL_KEY.as_bytes())?
            .map(decode_string)
            .transpose()
    }

    // ----- packet sequencing and commitments -----

    /// Allocate the next send sequence on `channel`. Sequences start at 1.
    pub fn next_sequence(&self, channel: &str) -> Result<u64> {
        let seq_key = key(NEXT_SEQ_PREFIX, channel);
        let next = self.kv.get_value::<u64>(&seq_key)?.unwrap_or(1);
        self.kv.set_value(&seq_key, &(next + 1))?;
        Ok(next)
    }

    pub fn put_packet(&self, packet: &OutboundPacket) -> Result<()> {
        self.kv.set_value(
            &channel_seq_key(PACKET_PREFIX, &packet.source_channel, packet.sequence),
            packet,
        )?;
        Ok(())
    }

    pub fn get_packet(&self, channel: &str, seq: u64) -> Result<Option<OutboundPacket>> {
        Ok(self
            .kv
            .get_value(&channel_seq_key(PACKET_PREFIX, channel, seq))?)
    }

    pub fn remove_packet(&self, channel: &str, seq: u64) -> Result<()> {
        self.kv
            .remove(&channel_seq_key(PACKET_PREFIX, channel, seq))?;
        Ok(())
    }

    /// Packets sent but not yet resolved, ordered by channel then sequence.
    pub fn pending_packets(&self) -> Result<Vec<OutboundPacket>> {
        self.kv
            .walk(PACKET_PREFIX.as_bytes())?
            .into_iter()
            .map(|(_, bytes)| {
                bincode::deserialize(&bytes).map_err(|e| common::StoreError::from(e).into())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::MemoryStore;
    use common::keys::frag_key;

    fn session(id: &str, owner: &str) -> Session {
        Session {
            session_id: id.to_string(),
            owner: owner.to_string(),
            executor: "csu1admin".to_string(),
            fragment_size: 1024,
            deadline_unix: 1_000,
            root_proof: String::new(),
            state: SessionState::Init,
            distributed_count: 0,
            ack_success_count: 0,
            ack_error_count: 0,
            close_reason: None,
            created_at_unix: 10,
        }
    }

    #[test]
    fn test_state_ordering() {
        use SessionState::*;
        assert!(Init.can_advance_to(RootCommitted));
        assert!(RootCommitted.can_advance_to(Distributing));
        assert!(Distributing.can_advance_to(Distributing));
        assert!(Finalizing.can_advance_to(ClosedSuccess));
        assert!(Init.can_advance_to(ClosedFailed));
        assert!(!Distributing.can_advance_to(RootCommitted));
        assert!(!Distributing.can_advance_to(ClosedSuccess));
        assert!(!ClosedSuccess.can_advance_to(ClosedFailed));
        assert!(!ClosedFailed.can_advance_to(ClosedFailed));
        assert_eq!(RootCommitted.to_string(), "ROOT_COMMITTED");
    }

    #[test]
    fn test_closed_session_is_absorbing() {
        let mut s = session("alice-1", "alice");
        s.fail("boom").unwrap();
        assert_eq!(s.state, SessionState::ClosedFailed);
        assert_eq!(s.close_reason.as_deref(), Some("boom"));
        assert!(matches!(s.fail("again"), Err(CsuError::SessionClosed(_))));
        assert_eq!(s.close_reason.as_deref(), Some("boom"));
    }

    #[test]
    fn test_session_crud_and_owner_filter() {
        let kv = MemoryStore::new();
        let store = SessionStore::new(&kv);
        store.put_session(&session("alice-1", "alice")).unwrap();
        store.put_session(&session("bob-1", "bob")).unwrap();
        store.put_session(&session("alice-2", "alice")).unwrap();

        assert!(store.has_session("alice-1").unwrap());
        assert!(matches!(
            store.load_session("carol-1"),
            Err(CsuError::SessionNotFound(_))
        ));
        assert_eq!(store.sessions().unwrap().len(), 3);
        let ids: Vec<String> = store
            .sessions_by_owner("alice")
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(ids, vec!["alice-1", "alice-2"]);
    }

    #[test]
    fn test_bindings_are_channel_scoped_and_consumed_once() {
        let kv = MemoryStore::new();
        let store = SessionStore::new(&kv);
        let fk = frag_key("alice-1", "a.txt", 0);
        store.bind_fragment_sequence("channel-0", 1, &fk).unwrap();
        store.bind_manifest_sequence("channel-9", 1, "alice-1").unwrap();

        assert_eq!(store.take_fragment_binding("channel-1", 1).unwrap(), None);
        assert_eq!(
            store.take_fragment_binding("channel-0", 1).unwrap(),
            Some(fk)
        );
        assert_eq!(store.take_fragment_binding("channel-0", 1).unwrap(), None);
        assert_eq!(
            store.take_manifest_binding("channel-9", 1).unwrap().as_deref(),
            Some("alice-1")
        );
        assert_eq!(store.take_manifest_binding("channel-9", 1).unwrap(), None);
    }

    #[test]
    fn test_storage_channels_sorted() {
        let kv = MemoryStore::new();
        let store = SessionStore::new(&kv);
        for c in ["channel-2", "channel-10", "channel-1"] {
            store.add_storage_channel(c).unwrap();
        }
        assert_eq!(
            store.storage_channels().unwrap(),
            vec!["channel-1", "channel-10", "channel-2"]
        );
        store.remove_storage_channel("channel-10").unwrap();
        assert!(!store.is_storage_channel("channel-10").unwrap());
        assert_eq!(store.storage_channels().unwrap().len(), 2);
    }

    #[test]
    fn test_sequences_are_per_channel() {
        let kv = MemoryStore::new();
        let store = SessionStore::new(&kv);
        assert_eq!(store.next_sequence("a").unwrap(), 1);
        assert_eq!(store.next_sequence("a").unwrap(), 2);
        assert_eq!(store.next_sequence("b").unwrap(), 1);
    }

    #[test]
    fn test_packet_commitments() {
        let kv = MemoryStore::new();
        let store = SessionStore::new(&kv);
        let packet = OutboundPacket {
            source_channel: "channel-0".to_string(),
            sequence: 3,
            data: b"{}".to_vec(),
            timeout_unix: 600,
        };
        store.put_packet(&packet).unwrap();
        assert_eq!(store.pending_packets().unwrap(), vec![packet.clone()]);
        assert_eq!(store.get_packet("channel-0", 3).unwrap(), Some(packet));
        store.remove_packet("channel-0", 3).unwrap();
        assert!(store.pending_packets().unwrap().is_empty());
    }

    #[test]
    fn test_token_and_metadata_channel() {
        let kv = MemoryStore::new();
        let store = SessionStore::new(&kv);
        assert_eq!(store.token_hash("alice-1").unwrap(), None);
        store.set_token_hash("alice-1", "abcd").unwrap();
        assert_eq!(store.token_hash("alice-1").unwrap().as_deref(), Some("abcd"));

        assert_eq!(store.metadata_channel().unwrap(), None);
        store.set_metadata_channel(Some("channel-m")).unwrap();
        assert_eq!(store.metadata_channel().unwrap().as_deref(), Some("channel-m"));
        store.set_metadata_channel(None).unwrap();
        assert_eq!(store.metadata_channel().unwrap(), None);
    }
}
