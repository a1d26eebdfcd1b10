//! Metadata ledger state: published manifests keyed by `(project_name, version)`.

use common::keys::KEY_SEPARATOR;
use common::{KvStore, KvStoreExt, Manifest};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DatastoreError, Result};

const MANIFEST_PREFIX: &str = "manifest/";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StoredManifest {
    /// Manifest as received, JSON-encoded
    pub manifest_json: String,
    pub session_id: String,
    pub received_at_unix: u64,
}

impl StoredManifest {
    pub fn manifest(&self) -> Result<Manifest> {
        Manifest::from_json(&self.manifest_json)
            .map_err(|e| DatastoreError::InvalidManifest(e.to_string()))
    }
}

pub struct ManifestStore<'a> {
    kv: &'a dyn KvStore,
}

fn project_prefix(project_name: &str) -> String {
    format!("{MANIFEST_PREFIX}{project_name}{KEY_SEPARATOR}")
}

fn manifest_key(project_name: &str, version: &str) -> Vec<u8> {
    format!("{}{version}", project_prefix(project_name)).into_bytes()
}

impl<'a> ManifestStore<'a> {
    pub fn new(kv: &'a dyn KvStore) -> Self {
        Self { kv }
    }

    /// Publish `manifest`. Returns `project_name@version`.
    pub fn put(&self, manifest: &Manifest, now_unix: u64) -> Result<String> {
        manifest.validate().map_err(DatastoreError::InvalidManifest)?;

        let label = format!("{}@{}", manifest.project_name, manifest.version);
        let key = manifest_key(&manifest.project_name, &manifest.version);
        if let Some(existing) = self.kv.get_value::<StoredManifest>(&key)? {
            if existing.session_id == manifest.session_id {
                debug!(manifest = %label, "Manifest re-delivered, already stored");
                return Ok(label);
            }
            return Err(DatastoreError::ManifestConflict {
                project_name: manifest.project_name.clone(),
                version: manifest.version.clone(),
                existing_session: existing.session_id,
            });
        }

        let manifest_json = manifest
            .to_json()
            .map_err(|e| DatastoreError::InvalidManifest(e.to_string()))?;
        self.kv.set_value(
            &key,
            &StoredManifest {
                manifest_json,
                session_id: manifest.session_id.clone(),
                received_at_unix: now_unix,
            },
        )?;
        Ok(label)
    }

    pub fn get(&self, project_name: &str, version: &str) -> Result<Option<StoredManifest>> {
        Ok(self.kv.get_value(&manifest_key(project_name, version))?)
    }

    /// Published versions of `project_name`, in key order.
    pub fn versions(&self, project_name: &str) -> Result<Vec<String>> {
        let prefix = project_prefix(project_name);
        Ok(self
            .kv
            .walk(prefix.as_bytes())?
            .into_iter()
            .map(|(k, _)| String::from_utf8_lossy(&k[prefix.len()..]).into_owned())
            .collect())
    }
}
