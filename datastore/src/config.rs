//! Configuration for the receiving ledgers.

use serde::Deserialize;

/// Which packets a receiving ledger accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerRole {
    /// Stores fragments
    Storage,
    /// Stores manifests
    Metadata,
}

impl LedgerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerRole::Storage => "storage",
            LedgerRole::Metadata => "metadata",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatastoreConfig {
    #[serde(default = "default_role")]
    pub role: LedgerRole,

    /// Fragments larger than this are refused
    #[serde(default = "default_max_fragment_bytes")]
    pub max_fragment_bytes: u64,
}

fn default_role() -> LedgerRole {
    LedgerRole::Storage
}

fn default_max_fragment_bytes() -> u64 {
    1024 * 1024
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            role: default_role(),
            max_fragment_bytes: default_max_fragment_bytes(),
        }
    }
}

impl DatastoreConfig {
    pub fn storage() -> Self {
        Self::default()
    }

    pub fn metadata() -> Self {
        Self {
            role: LedgerRole::Metadata,
            ..Self::default()
        }
    }
}

/// Load configuration from a TOML file with environment variable overrides.
pub fn load_config(path: Option<&str>) -> anyhow::Result<DatastoreConfig> {
    let config = match path {
        Some(p) => toml::from_str(&std::fs::read_to_string(p)?)?,
        None => DatastoreConfig::default(),
    };
    Ok(apply_env_overrides(config))
}

fn apply_env_overrides(mut config: DatastoreConfig) -> DatastoreConfig {
    if let Ok(val) = std::env::var("DATASTORE_ROLE") {
        match val.as_str() {
            "storage" => config.role = LedgerRole::Storage,
            "metadata" => config.role = LedgerRole::Metadata,
            other => tracing::warn!(value = other, "Ignoring unknown DATASTORE_ROLE"),
        }
    }
    if let Some(v) = std::env::var("DATASTORE_MAX_FRAGMENT_BYTES")
        .ok()
        .and_then(|v| v.parse().ok())
    {
        config.max_fragment_bytes = v;
    }
    config
}
