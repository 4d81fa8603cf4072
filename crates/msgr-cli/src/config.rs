//! Client configuration at `~/.msgr/config.toml`.
//!
//! Provides the default server, port, push bind address, request timeout
//! and optional normalizer URL. CLI flags always override file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use tracing::debug;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub default: DefaultConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultConfig {
    /// Server host name or address.
    #[serde(default = "default_server")]
    pub server: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Local address the push listener binds.
    #[serde(default = "default_push_bind")]
    pub push_bind: IpAddr,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// SOAP text service; whitespace is collapsed locally when unset.
    #[serde(default)]
    pub normalizer_url: Option<String>,
}

impl Default for DefaultConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            port: default_port(),
            push_bind: default_push_bind(),
            timeout_secs: default_timeout_secs(),
            normalizer_url: None,
        }
    }
}

fn default_server() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_push_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }
}

/// `~/.msgr/config.toml`, or a relative path when there is no home directory.
pub fn default_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".msgr")
        .join("config.toml")
}
