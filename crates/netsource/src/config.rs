//! Configuration file support for netsource
//!
//! Loads and validates source configuration from TOML files.
//! Default location: /etc/netsource/netsource.toml

use crate::error::{NetSourceError, Result};
use crate::sample::SampleKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/netsource/netsource.toml";

/// Socket role of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Listen on `port` and accept one peer at a time.
    #[default]
    Server,
    /// Connect out to `ip_address:port`.
    Client,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Server => "server",
            ConnectionType::Client => "client",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionType {
    type Err = NetSourceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "server" => Ok(ConnectionType::Server),
            "client" => Ok(ConnectionType::Client),
            other => Err(NetSourceError::InvalidConnectionType(other.to_string())),
        }
    }
}

/// Poll, backoff and shutdown timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Readiness poll timeout for accept and read, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Pause between connection attempts, in milliseconds
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_ms: u64,

    /// Pause while no output connection is registered, in milliseconds
    #[serde(default = "default_idle_backoff")]
    pub idle_backoff_ms: u64,

    /// Client connect timeout, in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Interval between checks for worker completion during stop, in milliseconds
    #[serde(default = "default_shutdown_poll")]
    pub shutdown_poll_ms: u64,

    /// Number of completion checks before stop gives up
    #[serde(default = "default_shutdown_retries")]
    pub shutdown_retries: u32,
}

/// Output connection declared in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Unique connection name
    pub name: String,

    /// Declared element kind (`dataShort`, `float`, `u8`, ...)
    pub port_type: SampleKind,

    /// Per-connection byte swap override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_swap: Option<u16>,
}

/// Complete netsource configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Socket role
    #[serde(default)]
    pub connection_type: ConnectionType,

    /// Peer host for the client role
    #[serde(default)]
    pub ip_address: String,

    /// TCP port to listen on or connect to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Local address the server role binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// 0 = no swap, 1 = natural sample width, N = groups of N bytes
    #[serde(default)]
    pub byte_swap: u16,

    /// Fixed flush chunk size in bytes
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Buffer level that triggers an aligned flush, in bytes
    #[serde(default = "default_min_bytes")]
    pub min_bytes: usize,

    /// Stream identifier attached to every packet
    #[serde(default = "default_stream_id")]
    pub stream_id: String,

    /// Maximum bytes taken from the socket per read
    #[serde(default = "default_read_chunk")]
    pub read_chunk_bytes: usize,

    /// Timing configuration
    #[serde(default)]
    pub timing: TimingConfig,

    /// Output connections (used by the daemon)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<ConnectionConfig>,
}

// Default functions
fn default_port() -> u16 {
    32191
}

fn default_bind_address() -> String {
    "localhost".to_string()
}

fn default_max_bytes() -> usize {
    16384
}

fn default_min_bytes() -> usize {
    16384
}

fn default_stream_id() -> String {
    "netsource".to_string()
}

fn default_read_chunk() -> usize {
    1024
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_reconnect_backoff() -> u64 {
    100
}

fn default_idle_backoff() -> u64 {
    1000
}

fn default_connect_timeout() -> u64 {
    500
}

fn default_shutdown_poll() -> u64 {
    100
}

fn default_shutdown_retries() -> u32 {
    10
}

// Default implementations
impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            reconnect_backoff_ms: default_reconnect_backoff(),
            idle_backoff_ms: default_idle_backoff(),
            connect_timeout_ms: default_connect_timeout(),
            shutdown_poll_ms: default_shutdown_poll(),
            shutdown_retries: default_shutdown_retries(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            connection_type: ConnectionType::default(),
            ip_address: String::new(),
            port: default_port(),
            bind_address: default_bind_address(),
            byte_swap: 0,
            max_bytes: default_max_bytes(),
            min_bytes: default_min_bytes(),
            stream_id: default_stream_id(),
            read_chunk_bytes: default_read_chunk(),
            timing: TimingConfig::default(),
            connections: Vec::new(),
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn shutdown_poll(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_ms)
    }
}

impl SourceConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config: Self = toml::from_str(&content).map_err(|e| {
                    NetSourceError::Configuration(format!(
                        "Failed to parse config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(NetSourceError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            NetSourceError::Configuration(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_bytes == 0 {
            return Err(NetSourceError::config("max_bytes must be > 0"));
        }

        if self.min_bytes == 0 {
            return Err(NetSourceError::config("min_bytes must be > 0"));
        }

        if self.read_chunk_bytes == 0 {
            return Err(NetSourceError::config("read_chunk_bytes must be > 0"));
        }

        if self.stream_id.is_empty() {
            return Err(NetSourceError::config("stream_id cannot be empty"));
        }

        if self.connection_type == ConnectionType::Client && self.ip_address.is_empty() {
            return Err(NetSourceError::config(
                "ip_address is required for the client connection type",
            ));
        }

        let timing = &self.timing;
        if timing.poll_interval_ms == 0
            || timing.reconnect_backoff_ms == 0
            || timing.idle_backoff_ms == 0
            || timing.connect_timeout_ms == 0
            || timing.shutdown_poll_ms == 0
        {
            return Err(NetSourceError::config("timing intervals must be > 0"));
        }

        for (i, conn) in self.connections.iter().enumerate() {
            if conn.name.is_empty() {
                return Err(NetSourceError::config("connection name cannot be empty"));
            }
            if self.connections[..i].iter().any(|c| c.name == conn.name) {
                return Err(NetSourceError::DuplicateConnection(conn.name.clone()));
            }
        }

        Ok(())
    }
}
