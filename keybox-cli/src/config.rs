//! Operator configuration
//!
//! Sources, lowest precedence first:
//! - built-in defaults
//! - `keyboxer.toml` in the working directory, or the file given with `--config`
//! - `KEYBOXER__*` environment variables (`KEYBOXER__REVOCATION__MODE=file`)

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use keybox_engine::{EngineConfig, ParseLimits, RevocationConfig};
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_FILE: &str = "keyboxer";
const ENV_PREFIX: &str = "KEYBOXER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyboxerConfig {
    /// PEM bundle of trusted root certificates
    pub anchors: PathBuf,

    /// Directory holding accepted keyboxes
    pub store_dir: PathBuf,

    /// Default source for `import`
    pub manual_dir: PathBuf,

    /// Validations run at the same time by the import and cleanup jobs
    pub concurrency: usize,

    pub limits: ParseLimits,
    pub revocation: RevocationConfig,
}

impl Default for KeyboxerConfig {
    fn default() -> Self {
        Self {
            anchors: PathBuf::from("roots.pem"),
            store_dir: PathBuf::from("keys"),
            manual_dir: PathBuf::from("manual"),
            concurrency: 8,
            limits: ParseLimits::default(),
            revocation: RevocationConfig::default(),
        }
    }
}

impl KeyboxerConfig {
    /// Load configuration; an explicit `path` must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: Self = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config
            .revocation
            .validate()
            .context("Invalid revocation configuration")?;
        Ok(config)
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            limits: self.limits.clone(),
            revocation: self.revocation.clone(),
        }
    }
}
