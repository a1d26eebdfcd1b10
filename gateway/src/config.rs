//! Configuration loading for the gateway ledger.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CsuError, Result};

/// On-ledger CSU parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsuParams {
    /// Fragments larger than this are rejected
    #[serde(default = "default_max_fragment_bytes")]
    pub max_fragment_bytes: u64,

    /// Upper bound on `distributed_count` for one session
    #[serde(default = "default_max_fragments_per_session")]
    pub max_fragments_per_session: u64,

    /// Deadline applied when InitSession does not supply one
    #[serde(default = "default_deadline_seconds")]
    pub default_deadline_seconds: u64,

    /// Sole permitted executor address. Every CSU handler fails while this is unset.
    #[serde(default)]
    pub local_admin: Option<String>,

    /// Relative timeout stamped on every outbound packet
    #[serde(default = "default_packet_timeout_seconds")]
    pub packet_timeout_seconds: u64,
}

fn default_max_fragment_bytes() -> u64 {
    1024 * 1024
}

fn default_max_fragments_per_session() -> u64 {
    100_000
}

fn default_deadline_seconds() -> u64 {
    24 * 60 * 60
}

fn default_packet_timeout_seconds() -> u64 {
    600
}

impl Default for CsuParams {
    fn default() -> Self {
        Self {
            max_fragment_bytes: default_max_fragment_bytes(),
            max_fragments_per_session: default_max_fragments_per_session(),
            default_deadline_seconds: default_deadline_seconds(),
            local_admin: None,
            packet_timeout_seconds: default_packet_timeout_seconds(),
        }
    }
}

impl CsuParams {
    /// The configured admin, or `LocalAdminNotSet`.
    pub fn local_admin(&self) -> Result<&str> {
        match self.local_admin.as_deref() {
            Some(admin) if !admin.is_empty() => Ok(admin),
            _ => Err(CsuError::LocalAdminNotSet),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_fragment_bytes", self.max_fragment_bytes),
            ("max_fragments_per_session", self.max_fragments_per_session),
            ("default_deadline_seconds", self.default_deadline_seconds),
            ("packet_timeout_seconds", self.packet_timeout_seconds),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(CsuError::InvalidField {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if let Some(admin) = &self.local_admin {
            crate::error::check_address(admin)?;
        }
        Ok(())
    }
}

/// Gateway configuration loaded from TOML + environment overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Sled database path for ledger state
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Seconds between end-of-round processing (expiry sweep)
    #[serde(default = "default_round_interval_secs")]
    pub round_interval_secs: u64,

    #[serde(default)]
    pub params: CsuParams,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/gateway/ledger.db")
}

fn default_round_interval_secs() -> u64 {
    5
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            round_interval_secs: default_round_interval_secs(),
            params: CsuParams::default(),
        }
    }
}

/// Load configuration from TOML file with environment variable overrides.
pub fn load_config(path: Option<&str>) -> anyhow::Result<GatewayConfig> {
    let config_path = path.map(std::path::Path::new).or_else(|| {
        let default = std::path::Path::new("gateway.toml");
        default.exists().then_some(default)
    });

    let config = match config_path {
        Some(p) => toml::from_str(&std::fs::read_to_string(p)?)?,
        None => GatewayConfig::default(),
    };

    let config = apply_env_overrides(config);
    config.params.validate()?;
    Ok(config)
}

/// Read an env var and parse it, returning None if missing or parse fails.
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn apply_env_overrides(mut config: GatewayConfig) -> GatewayConfig {
    if let Ok(val) = std::env::var("CSU_DB_PATH") {
        config.db_path = PathBuf::from(val);
    }
    if let Some(v) = env_parse("CSU_ROUND_INTERVAL_SECS") {
        config.round_interval_secs = v;
    }
    if let Some(v) = env_parse("CSU_MAX_FRAGMENT_BYTES") {
        config.params.max_fragment_bytes = v;
    }
    if let Some(v) = env_parse("CSU_MAX_FRAGMENTS_PER_SESSION") {
        config.params.max_fragments_per_session = v;
    }
    if let Some(v) = env_parse("CSU_DEFAULT_DEADLINE_SECONDS") {
        config.params.default_deadline_seconds = v;
    }
    if let Some(v) = env_parse("CSU_PACKET_TIMEOUT_SECONDS") {
        config.params.packet_timeout_seconds = v;
    }
    if let Ok(val) = std::env::var("CSU_LOCAL_ADMIN")
        && !val.trim().is_empty()
    {
        config.params.local_admin = Some(val.trim().to_string());
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.round_interval_secs, 5);
        assert_eq!(config.params.max_fragment_bytes, 1024 * 1024);
        assert_eq!(config.params.packet_timeout_seconds, 600);
        assert!(config.params.local_admin.is_none());
    }

    #[test]
    fn test_local_admin_required() {
        let mut params = CsuParams::default();
        assert!(matches!(params.local_admin(), Err(CsuError::LocalAdminNotSet)));
        params.local_admin = Some(String::new());
        assert!(matches!(params.local_admin(), Err(CsuError::LocalAdminNotSet)));
        params.local_admin = Some("csu1admin".to_string());
        assert_eq!(params.local_admin().unwrap(), "csu1admin");
    }

    #[test]
    fn test_toml_partial_params() {
        let config: GatewayConfig = toml::from_str(
            r#"
            round_interval_secs = 2

            [params]
            local_admin = "csu1admin"
            max_fragment_bytes = 4096
            "#,
        )
        .unwrap();
        assert_eq!(config.round_interval_secs, 2);
        assert_eq!(config.params.max_fragment_bytes, 4096);
        assert_eq!(config.params.default_deadline_seconds, 86_400);
        assert_eq!(config.params.local_admin.as_deref(), Some("csu1admin"));
        config.params.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_and_bad_admin() {
        let params = CsuParams {
            max_fragment_bytes: 0,
            ..CsuParams::default()
        };
        assert!(params.validate().is_err());

        let params = CsuParams {
            local_admin: Some("not an address".to_string()),
            ..CsuParams::default()
        };
        assert!(matches!(
            params.validate(),
            Err(CsuError::InvalidAddress { .. })
        ));
    }
}
