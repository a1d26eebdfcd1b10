//! Packet receive entry point for the storage and metadata ledgers.

use common::{Acknowledgement, CacheStore, KvStore, PacketData, PacketError};
use tracing::{debug, warn};

use crate::config::{DatastoreConfig, LedgerRole};
use crate::error::{DatastoreError, Result};
use crate::fragments::FragmentStore;
use crate::manifests::ManifestStore;

/// A ledger at the far end of a gateway channel.
///
/// Every packet is applied against a write buffer which is committed only when the
/// packet is accepted, so an error acknowledgement never leaves partial state behind.
pub struct ReceivingLedger<S: KvStore> {
    store: S,
    config: DatastoreConfig,
}

impl<S: KvStore> ReceivingLedger<S> {
    pub fn new(store: S, config: DatastoreConfig) -> Self {
        Self { store, config }
    }

    pub fn role(&self) -> LedgerRole {
        self.config.role
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn fragments(&self) -> FragmentStore<'_> {
        FragmentStore::new(&self.store)
    }

    pub fn manifests(&self) -> ManifestStore<'_> {
        ManifestStore::new(&self.store)
    }

    /// Handle raw packet bytes and produce the acknowledgement to relay back.
    pub fn on_recv_packet(&self, data: &[u8], now_unix: u64) -> Acknowledgement {
        let packet = match PacketData::decode(data) {
            Ok(packet) => packet,
            Err(PacketError::UnknownPacketType(kind)) => {
                warn!(role = self.role().as_str(), kind = %kind, "Unknown packet type");
                return Acknowledgement::error(format!("unrecognized packet type: {kind}"));
            }
            Err(e) => {
                warn!(role = self.role().as_str(), error = %e, "Malformed packet");
                return Acknowledgement::error(e.to_string());
            }
        };

        let kind = packet.type_name();
        let cache = CacheStore::new(&self.store);
        let outcome = self
            .apply(&cache, packet, now_unix)
            .and_then(|result| cache.commit().map(|_| result).map_err(DatastoreError::from));

        match outcome {
            Ok(result) => {
                debug!(role = self.role().as_str(), kind, result = %result, "Packet accepted");
                Acknowledgement::success(result)
            }
            Err(e) => {
                warn!(role = self.role().as_str(), kind, error = %e, "Packet refused");
                Acknowledgement::error(e.to_string())
            }
        }
    }

    fn apply(&self, kv: &dyn KvStore, packet: PacketData, now_unix: u64) -> Result<String> {
        match (self.config.role, packet) {
            (_, PacketData::NoData(_)) => Ok(String::new()),
            (LedgerRole::Storage, PacketData::Fragment(fragment)) => {
                FragmentStore::new(kv).put(&fragment, self.config.max_fragment_bytes, now_unix)
            }
            (LedgerRole::Metadata, PacketData::Manifest(manifest)) => {
                ManifestStore::new(kv).put(&manifest, now_unix)
            }
            (role, other) => Err(DatastoreError::UnsupportedPacket {
                kind: other.type_name(),
                role: role.as_str(),
            }),
        }
    }
}
