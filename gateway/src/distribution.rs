//! Fragment distribution: validation, dedup, proof verification and round-robin placement.
//!
//! A batch is checked in full before the first packet is committed. Duplicates are
//! detected both inside the batch and against the session's history, and any failure
//! rejects the whole batch.

use common::keys::frag_key;
use common::verifier::{decode_root_proof, verify_fragment_against};
use common::{DistributeItem, FragmentPacket, PacketData};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::context::{ExecCtx, LedgerEvent};
use crate::error::{CsuError, Result, check_key_field};
use crate::messages::FragmentAssignment;
use crate::state::Session;

/// Input checks that need no ledger state.
pub fn validate_items(items: &[DistributeItem], max_fragment_bytes: u64) -> Result<()> {
    if items.is_empty() {
        return Err(CsuError::EmptyField("items"));
    }
    for item in items {
        check_key_field("path", &item.path)?;
        if item.data.is_empty() {
            return Err(CsuError::EmptyField("data"));
        }
        let size = item.data.len() as u64;
        if size > max_fragment_bytes {
            return Err(CsuError::FragmentTooLarge {
                path: item.path.clone(),
                index: item.index,
                size,
                max: max_fragment_bytes,
            });
        }
    }
    Ok(())
}

/// Channel for the `position`-th fragment of a session. `channels` must be sorted.
pub fn select_channel(channels: &[String], position: u64) -> Option<&str> {
    if channels.is_empty() {
        return None;
    }
    let slot = (position % channels.len() as u64) as usize;
    channels.get(slot).map(String::as_str)
}

/// Distribute `items` for `session`, updating its counters in place.
///
/// The caller persists `session` afterwards; nothing here commits.
pub fn distribute(
    ctx: &mut ExecCtx<'_>,
    session: &mut Session,
    items: &[DistributeItem],
) -> Result<Vec<FragmentAssignment>> {
    let max = ctx.params.max_fragments_per_session;
    let total = session.distributed_count.saturating_add(items.len() as u64);
    if total > max {
        return Err(CsuError::TooManyFragments { total, max });
    }

    let mut batch_keys = HashSet::with_capacity(items.len());
    let mut keys = Vec::with_capacity(items.len());
    for item in items {
        let key = frag_key(&session.session_id, &item.path, item.index);
        if !batch_keys.insert(key.clone()) || ctx.state.is_fragment_seen(&key)? {
            return Err(CsuError::DuplicateFragment {
                session_id: session.session_id.clone(),
                path: item.path.clone(),
                index: item.index,
            });
        }
        keys.push(key);
    }

    let root = decode_root_proof(&session.root_proof)?;
    for item in items {
        if let Err(e) = verify_fragment_against(&root, item) {
            warn!(
                session_id = %session.session_id,
                path = %item.path,
                index = item.index,
                error = %e,
                "Rejecting batch: fragment does not verify"
            );
            return Err(e.into());
        }
    }

    let channels = ctx.state.storage_channels()?;
    if channels.is_empty() {
        return Err(CsuError::NoStorageChannels);
    }

    let mut assignments = Vec::with_capacity(items.len());
    for (item, key) in items.iter().zip(&keys) {
        let channel = select_channel(&channels, session.distributed_count)
            .ok_or(CsuError::NoStorageChannels)?
            .to_string();
        let packet = PacketData::Fragment(FragmentPacket {
            session_id: session.session_id.clone(),
            root_proof: session.root_proof.clone(),
            path: item.path.clone(),
            index: item.index,
            data: item.data.clone(),
        });
        let sequence = ctx.send_packet(&channel, &packet)?;
        ctx.state.bind_fragment_sequence(&channel, sequence, key)?;
        ctx.state.mark_fragment_seen(key)?;
        session.distributed_count += 1;

        debug!(
            session_id = %session.session_id,
            path = %item.path,
            index = item.index,
            channel = %channel,
            sequence,
            "Fragment assigned"
        );
        assignments.push(FragmentAssignment {
            path: item.path.clone(),
            index: item.index,
            channel_id: channel,
            sequence,
        });
    }

    ctx.emit(LedgerEvent::FragmentsDistributed(assignments.len() as u64));
    Ok(assignments)
}
