//! Fragment storage ledger state.
//!
//! Fragments are filed under their `fragment_id`, which any party can derive from
//! `(session_id, path, index)`. Re-delivering the same bytes is accepted silently; a
//! different payload under an existing id is refused.

use common::keys::fragment_id;
use common::{FragmentPacket, KvStore, KvStoreExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DatastoreError, Result};

const FRAGMENT_PREFIX: &str = "fragment/";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StoredFragment {
    pub session_id: String,
    pub root_proof: String,
    pub path: String,
    pub index: u64,
    pub data: Vec<u8>,
    pub received_at_unix: u64,
}

impl StoredFragment {
    fn same_content(&self, packet: &FragmentPacket) -> bool {
        self.session_id == packet.session_id
            && self.root_proof == packet.root_proof
            && self.path == packet.path
            && self.index == packet.index
            && self.data == packet.data
    }
}

pub struct FragmentStore<'a> {
    kv: &'a dyn KvStore,
}

fn fragment_key(id: &str) -> Vec<u8> {
    format!("{FRAGMENT_PREFIX}{id}").into_bytes()
}

impl<'a> FragmentStore<'a> {
    pub fn new(kv: &'a dyn KvStore) -> Self {
        Self { kv }
    }

    /// Store `packet` and return its fragment id.
    pub fn put(&self, packet: &FragmentPacket, max_bytes: u64, now_unix: u64) -> Result<String> {
        let size = packet.data.len() as u64;
        if size == 0 {
            return Err(DatastoreError::EmptyFragment {
                path: packet.path.clone(),
                index: packet.index,
            });
        }
        if size > max_bytes {
            return Err(DatastoreError::FragmentTooLarge {
                path: packet.path.clone(),
                index: packet.index,
                size,
                max: max_bytes,
            });
        }

        let id = fragment_id(&packet.session_id, &packet.path, packet.index);
        let key = fragment_key(&id);
        if let Some(existing) = self.kv.get_value::<StoredFragment>(&key)? {
            if existing.same_content(packet) {
                debug!(fragment_id = %id, "Fragment re-delivered, already stored");
                return Ok(id);
            }
            return Err(DatastoreError::ConflictingFragment(id));
        }

        self.kv.set_value(
            &key,
            &StoredFragment {
                session_id: packet.session_id.clone(),
                root_proof: packet.root_proof.clone(),
                path: packet.path.clone(),
                index: packet.index,
                data: packet.data.clone(),
                received_at_unix: now_unix,
            },
        )?;
        Ok(id)
    }

    pub fn get(&self, fragment_id: &str) -> Result<Option<StoredFragment>> {
        Ok(self.kv.get_value(&fragment_key(fragment_id))?)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.kv.walk(FRAGMENT_PREFIX.as_bytes())?.len())
    }
}
