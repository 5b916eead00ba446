//! Session configuration.

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Decoded lines longer than this are split into fixed-size chunks.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Upper bound on bytes carried over between reads for an
    /// unterminated line fragment.
    #[serde(default = "default_carry_limit")]
    pub carry_limit: usize,
    /// How long a reader thread blocks waiting for stream bytes.
    #[serde(default = "default_read_wait_ms")]
    pub read_wait_ms: u64,
    /// Forces the first decode candidate for subprocess output.
    #[serde(default)]
    pub stdin_encoding: Option<String>,
    /// Explicit shell invocation, bypassing launch-policy detection.
    #[serde(default)]
    pub custom_shell: Option<String>,
    /// Path to the pseudo-terminal helper binary, if installed.
    #[serde(default)]
    pub tty_helper: Option<PathBuf>,
}

fn default_max_line_length() -> usize {
    4096
}

fn default_carry_limit() -> usize {
    10000
}

fn default_read_wait_ms() -> u64 {
    100
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_line_length: default_max_line_length(),
            carry_limit: default_carry_limit(),
            read_wait_ms: default_read_wait_ms(),
            stdin_encoding: None,
            custom_shell: None,
            tty_helper: None,
        }
    }
}

impl SessionConfig {
    /// Load config from a specific file path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load config from the default location (config/default.toml) or
    /// fall back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from("config/default.toml");
        if config_path.exists() {
            return Self::load_from(&config_path);
        }
        Ok(SessionConfig::default())
    }
}
