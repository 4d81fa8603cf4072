//! Server configuration: TOML file + CLI overrides.

use msgr_core::{MsgrError, MsgrResult};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Lowest port the server agrees to listen on.
pub const MIN_PORT: u16 = 1024;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_push_timeout")]
    pub push_timeout_secs: u64,
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            read_timeout_secs: default_read_timeout(),
            push_timeout_secs: default_push_timeout(),
            max_pending: default_max_pending(),
        }
    }
}

fn default_bind() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_port() -> u16 {
    8888
}
fn default_read_timeout() -> u64 {
    10
}
fn default_push_timeout() -> u64 {
    5
}
fn default_max_pending() -> usize {
    256
}

/// Resolved server configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    /// Bound on reading one control request.
    pub read_timeout: Duration,
    /// Bound on dialing and writing one push delivery.
    pub push_timeout: Duration,
    /// Pending messages kept per disconnected alias.
    pub max_pending: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_section(ServerSection::default())
    }
}

impl ServerConfig {
    fn from_section(section: ServerSection) -> Self {
        Self {
            bind: section.bind,
            port: section.port,
            read_timeout: Duration::from_secs(section.read_timeout_secs),
            push_timeout: Duration::from_secs(section.push_timeout_secs),
            max_pending: section.max_pending,
        }
    }

    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_port: Option<u16>,
        cli_bind: Option<IpAddr>,
    ) -> MsgrResult<Self> {
        let file_config = match config_path.map(expand_tilde) {
            Some(expanded) if expanded.exists() => {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| MsgrError::Config(format!("config parse error: {e}")))?
            }
            Some(expanded) => {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
            None => ConfigFile::default(),
        };

        let mut section = file_config.server;
        if let Some(port) = cli_port {
            section.port = port;
        }
        if let Some(bind) = cli_bind {
            section.bind = bind;
        }

        if section.port < MIN_PORT {
            return Err(MsgrError::Config(format!(
                "port must be in {MIN_PORT}..=65535, got {}",
                section.port
            )));
        }
        if section.max_pending == 0 {
            return Err(MsgrError::Config("max_pending must be at least 1".into()));
        }

        Ok(Self::from_section(section))
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
