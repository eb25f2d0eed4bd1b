//! Engine configuration
//!
//! Provides the knobs the engine exposes to its callers:
//! - Parse limits bounding the work spent on one untrusted document
//! - Revocation source selection, endpoint, timeout and cache TTL

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Published attestation status list
pub const DEFAULT_REVOCATION_URL: &str = "https://android.googleapis.com/attestation/status";

/// Upper bounds applied by the structural parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseLimits {
    /// Largest accepted document, in bytes
    pub max_document_bytes: usize,
    /// Deepest accepted element nesting
    pub max_depth: usize,
    /// Total number of elements in one document
    pub max_elements: usize,
    pub max_keyboxes: usize,
    pub max_keys_per_keybox: usize,
    pub max_certificates_per_chain: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_document_bytes: 1024 * 1024, // 1 MB
            max_depth: 16,
            max_elements: 4096,
            max_keyboxes: 16,
            max_keys_per_keybox: 8,
            max_certificates_per_chain: 16,
        }
    }
}

/// Where revocation data comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RevocationMode {
    /// Fetch the status list over HTTPS
    #[default]
    Http,
    /// Read a status list snapshot from disk
    File,
}

impl FromStr for RevocationMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" | "https" | "online" => Ok(RevocationMode::Http),
            "file" | "snapshot" | "offline" => Ok(RevocationMode::File),
            _ => Err(EngineError::Configuration(format!(
                "Unknown revocation mode: {}. Valid options: http, file",
                s
            ))),
        }
    }
}

/// Revocation source configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevocationConfig {
    pub mode: RevocationMode,

    /// Status list endpoint (http mode)
    pub url: String,

    /// Snapshot location (file mode)
    pub snapshot_path: Option<PathBuf>,

    /// Bound on one fetch, including the body
    pub timeout_secs: u64,

    /// How long a fetched list is reused
    pub cache_ttl_secs: u64,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            mode: RevocationMode::Http,
            url: DEFAULT_REVOCATION_URL.to_string(),
            snapshot_path: None,
            timeout_secs: 30,
            cache_ttl_secs: 3600, // 1 hour
        }
    }
}

impl RevocationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] when the selected mode lacks its
    /// location or the timeout is zero.
    pub fn validate(&self) -> EngineResult<()> {
        if self.timeout_secs == 0 {
            return Err(EngineError::Configuration(
                "revocation timeout must be at least one second".to_string(),
            ));
        }
        match self.mode {
            RevocationMode::Http if self.url.trim().is_empty() => Err(EngineError::Configuration(
                "revocation url is required in http mode".to_string(),
            )),
            RevocationMode::File if self.snapshot_path.is_none() => Err(EngineError::Configuration(
                "revocation snapshot_path is required in file mode".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub limits: ParseLimits,
    pub revocation: RevocationConfig,
}

impl EngineConfig {
    /// Create a new engine configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] for unparsable values.
    pub fn from_env() -> EngineResult<Self> {
        let mut config = Self::default();

        // === Revocation ===
        if let Ok(mode) = std::env::var("KEYBOX_REVOCATION_MODE") {
            config.revocation.mode = mode.parse()?;
        }
        if let Ok(url) = std::env::var("KEYBOX_REVOCATION_URL") {
            config.revocation.url = url;
        }
        if let Ok(path) = std::env::var("KEYBOX_REVOCATION_SNAPSHOT") {
            config.revocation.snapshot_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = env_number("KEYBOX_REVOCATION_TIMEOUT_SECONDS")? {
            config.revocation.timeout_secs = secs;
        }
        if let Some(secs) = env_number("KEYBOX_REVOCATION_CACHE_TTL_SECONDS")? {
            config.revocation.cache_ttl_secs = secs;
        }

        // === Parse limits ===
        if let Some(bytes) = env_number("KEYBOX_MAX_DOCUMENT_BYTES")? {
            config.limits.max_document_bytes = usize::try_from(bytes)
                .map_err(|_| EngineError::Configuration(format!("document limit too large: {}", bytes)))?;
        }
        if let Some(count) = env_number("KEYBOX_MAX_CERTIFICATES")? {
            config.limits.max_certificates_per_chain = usize::try_from(count)
                .map_err(|_| EngineError::Configuration(format!("certificate limit too large: {}", count)))?;
        }

        config.revocation.validate()?;
        Ok(config)
    }
}

fn env_number(name: &str) -> EngineResult<Option<u64>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| EngineError::Configuration(format!("{} must be a number, got {:?}", name, value))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revocation_mode_parsing() {
        assert_eq!("HTTP".parse::<RevocationMode>().unwrap(), RevocationMode::Http);
        assert_eq!("snapshot".parse::<RevocationMode>().unwrap(), RevocationMode::File);
        assert!("carrier-pigeon".parse::<RevocationMode>().is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.revocation.validate().is_ok());
        assert_eq!(config.revocation.url, DEFAULT_REVOCATION_URL);
        assert_eq!(config.revocation.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_file_mode_requires_snapshot_path() {
        let config = RevocationConfig {
            mode: RevocationMode::File,
            ..RevocationConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = RevocationConfig {
            timeout_secs: 0,
            ..RevocationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"revocation": {"mode": "file", "snapshot_path": "/tmp/status.json"}}"#)
                .unwrap();
        assert_eq!(config.revocation.mode, RevocationMode::File);
        assert_eq!(config.revocation.cache_ttl_secs, 3600);
        assert_eq!(config.limits, ParseLimits::default());
    }
}
