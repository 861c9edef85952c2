//! Runtime configuration, loadable from an optional TOML file: each field
//! has a `#[serde(default = "...")]` plus a matching `Default` impl, falling
//! back to pure defaults when no file is present.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "RuntimeConfig::default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "RuntimeConfig::default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub check_only: bool,
    #[serde(default)]
    pub redact: bool,
    #[serde(default = "RuntimeConfig::default_log_format")]
    pub log_format: String,
}

impl RuntimeConfig {
    fn default_interval_seconds() -> u64 {
        30
    }

    fn default_max_retries() -> u32 {
        3
    }

    fn default_log_format() -> String {
        "pretty".to_string()
    }

    /// Loads `path` if it exists, parsing as TOML; otherwise returns
    /// [`Default::default`].
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file found, using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interval_seconds: Self::default_interval_seconds(),
            max_retries: Self::default_max_retries(),
            dry_run: false,
            check_only: false,
            redact: false,
            log_format: Self::default_log_format(),
        }
    }
}
