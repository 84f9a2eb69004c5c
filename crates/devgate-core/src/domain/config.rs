//! Gateway configuration and TOML loading.
//!
//! [`ServerConfig`] carries every value the gateway core needs: where to
//! listen, how large each receive buffer is, and how long a connection may
//! stay silent before the registry evicts it.  The binary fills it from a
//! TOML file and CLI flags; embedding applications usually build it in code.
//!
//! Example file:
//!
//! ```toml
//! [server]
//! listen_ip = "0.0.0.0"
//! port = 6050
//! buffer_size = 1024
//! idle_timeout_minutes = 2
//! send_timeout_secs = 30
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every field is optional.  Missing fields take the defaults below, and a
//! port of `0` is treated as "unset" and resolves to [`DEFAULT_PORT`].

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Port used when the configured port is unset or zero.
pub const DEFAULT_PORT: u16 = 6050;
/// Receive buffer size in bytes when none is configured.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;
/// Idle timeout used by the binary when none is configured.
pub const DEFAULT_IDLE_MINUTES: u32 = 2;
/// Upper bound on a single outbound send when none is configured.
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 30;
/// Pending-connection backlog handed to `listen(2)`.
pub const ACCEPT_BACKLOG: u32 = 150;

const MIN_IDLE_MINUTES: u32 = 1;

/// Error type for configuration handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The listening IP is not a parseable IPv4 address.
    #[error("invalid listening address '{0}'")]
    InvalidAddress(String),

    /// The config file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level layout of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and registry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// IPv4 address to bind.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,
    /// TCP port to bind.  `0` means "use [`DEFAULT_PORT`]".
    #[serde(default = "default_port")]
    pub port: u16,
    /// Size of each per-connection receive buffer in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Minutes of silence after which a connection is evicted (minimum 1).
    #[serde(default = "default_idle_minutes")]
    pub idle_timeout_minutes: u32,
    /// Seconds a single send may block on a stalled peer before it fails.
    /// `0` means "use [`DEFAULT_SEND_TIMEOUT_SECS`]".
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

/// Logging settings for the binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}
fn default_idle_minutes() -> u32 {
    DEFAULT_IDLE_MINUTES
}
fn default_send_timeout_secs() -> u64 {
    DEFAULT_SEND_TIMEOUT_SECS
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            port: default_port(),
            buffer_size: default_buffer_size(),
            idle_timeout_minutes: default_idle_minutes(),
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Creates a config for `listen_ip:port` with default buffer and idle settings.
    pub fn new(listen_ip: impl Into<String>, port: u16) -> Self {
        Self {
            listen_ip: listen_ip.into(),
            port,
            ..Self::default()
        }
    }

    /// The port that will actually be bound.
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            DEFAULT_PORT
        } else {
            self.port
        }
    }

    /// The receive buffer size that will actually be used.
    ///
    /// A zero-sized buffer would make every read look like a closed peer, so
    /// `0` falls back to [`DEFAULT_BUFFER_SIZE`].
    pub fn effective_buffer_size(&self) -> usize {
        if self.buffer_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            self.buffer_size
        }
    }

    /// Per-send write deadline; `0` falls back to [`DEFAULT_SEND_TIMEOUT_SECS`].
    pub fn send_timeout(&self) -> Duration {
        let secs = if self.send_timeout_secs == 0 {
            DEFAULT_SEND_TIMEOUT_SECS
        } else {
            self.send_timeout_secs
        };
        Duration::from_secs(secs)
    }

    /// Parses `listen_ip` and combines it with [`effective_port`](Self::effective_port).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if `listen_ip` is not an IPv4 address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: Ipv4Addr = self
            .listen_ip
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.listen_ip.clone()))?;
        Ok(SocketAddr::from((ip, self.effective_port())))
    }
}

/// Converts an idle timeout in minutes into the registry's eviction threshold.
///
/// Values below one minute are clamped up to one minute.
pub fn idle_threshold_from_minutes(minutes: u32) -> Duration {
    Duration::from_secs(u64::from(minutes.max(MIN_IDLE_MINUTES)) * 60)
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parses an [`AppConfig`] from TOML text.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] if the TOML is malformed.
pub fn parse_config(text: &str) -> Result<AppConfig, ConfigError> {
    Ok(toml::from_str(text)?)
}

/// Loads an [`AppConfig`] from `path`, returning defaults when the file does
/// not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("config file {} not found; using defaults", path.display());
            Ok(AppConfig::default())
        }
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
