//! Configuration loading and validation.
//!
//! The bot reads a single TOML file (path given as the first CLI
//! argument, defaulting to `config.toml`). Authorization lists are plain
//! nick lists; the DCC port range should match the router's forwarding
//! rule.

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Chat server and identity.
    pub server: ServerConfig,
    /// Authorization lists.
    #[serde(default)]
    pub auth: AuthConfig,
    /// DCC transfer settings.
    #[serde(default)]
    pub dcc: DccConfig,
    /// Filesystem locations.
    #[serde(default)]
    pub paths: PathsConfig,
    /// Stats persistence settings.
    #[serde(default)]
    pub stats: StatsConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.nick.is_empty() {
            return Err(ConfigError::Invalid("server.nick must not be empty".into()));
        }
        if self.server.channel.is_empty() {
            return Err(ConfigError::Invalid(
                "server.channel must not be empty".into(),
            ));
        }
        if self.dcc.port_min > self.dcc.port_max {
            return Err(ConfigError::Invalid(format!(
                "dcc.port_min ({}) exceeds dcc.port_max ({})",
                self.dcc.port_min, self.dcc.port_max
            )));
        }
        if self.dcc.chunk_size == 0 {
            return Err(ConfigError::Invalid("dcc.chunk_size must be > 0".into()));
        }
        Ok(())
    }

    /// Whether `nick` may use the admin command tier.
    pub fn is_admin(&self, nick: &str) -> bool {
        self.auth.admins.iter().any(|a| a == nick)
    }

    /// Whether `nick` may request or upload files.
    pub fn is_file_allowed(&self, nick: &str) -> bool {
        self.auth.file_allowed.iter().any(|a| a == nick)
    }
}

/// Chat server and bot identity.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server hostname (e.g., "irc.libera.chat").
    pub host: String,
    /// Server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Channel to join (e.g., "#sharing").
    pub channel: String,
    /// Bot nickname.
    pub nick: String,
    /// NickServ password; IDENTIFY is sent after registration when set.
    #[serde(default)]
    pub nickserv_password: Option<String>,
}

/// Authorization lists. Immutable for the lifetime of the process.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Nicks allowed to use !stats, !uptime, !kick, !shutdown.
    #[serde(default)]
    pub admins: Vec<String>,
    /// Nicks allowed to use !get and to upload via DCC SEND.
    #[serde(default)]
    pub file_allowed: Vec<String>,
}

/// DCC transfer settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DccConfig {
    /// Lower bound of the listener port range (inclusive).
    #[serde(default = "default_port_min")]
    pub port_min: u16,
    /// Upper bound of the listener port range (inclusive). Size the
    /// range to match the router's port-forwarding rule.
    #[serde(default = "default_port_max")]
    pub port_max: u16,
    /// Address announced in DCC SEND offers. Set to the public address
    /// when behind NAT; defaults to 127.0.0.1.
    #[serde(default)]
    pub public_ip: Option<Ipv4Addr>,
    /// How long to wait for a peer to connect to an offer.
    #[serde(default = "default_accept_timeout")]
    pub accept_timeout_secs: u64,
    /// Transfer chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for DccConfig {
    fn default() -> Self {
        Self {
            port_min: default_port_min(),
            port_max: default_port_max(),
            public_ip: None,
            accept_timeout_secs: default_accept_timeout(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Directory of files offered via !files / !get.
    #[serde(default = "default_shared_dir")]
    pub shared_dir: PathBuf,
    /// Destination directory for inbound uploads.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Stats snapshot file, read once at startup.
    #[serde(default = "default_stats_file")]
    pub stats_file: PathBuf,
    /// Append-only log file. Logs go to stdout when unset.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            shared_dir: default_shared_dir(),
            upload_dir: default_upload_dir(),
            stats_file: default_stats_file(),
            log_file: None,
        }
    }
}

/// Stats persistence settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    /// Snapshot interval in seconds.
    #[serde(default = "default_save_interval")]
    pub save_interval_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            save_interval_secs: default_save_interval(),
        }
    }
}

fn default_port() -> u16 {
    6667
}

fn default_port_min() -> u16 {
    50000
}

fn default_port_max() -> u16 {
    50100
}

fn default_accept_timeout() -> u64 {
    60
}

fn default_chunk_size() -> usize {
    1024
}

fn default_shared_dir() -> PathBuf {
    PathBuf::from("shared_files")
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("shared_files/uploaded")
}

fn default_stats_file() -> PathBuf {
    PathBuf::from("sharebot_stats.json")
}

fn default_save_interval() -> u64 {
    60
}
