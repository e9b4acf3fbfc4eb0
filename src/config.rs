//! Configuration module for roomchat.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::protocol::DEFAULT_MAX_LINE_BYTES;
use crate::{Result, RoomchatError};

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on a single socket read in milliseconds.
    ///
    /// Each connection re-checks the shutdown signal whenever a read times out.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Longest accepted line in bytes.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Lines queued per connection before the peer counts as stalled and is
    /// removed from its room.
    #[serde(default = "default_outbound_queue_len")]
    pub outbound_queue_len: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE_BYTES
}

fn default_outbound_queue_len() -> usize {
    256
}

impl ServerConfig {
    /// Read timeout as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// `host:port` string suitable for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            read_timeout_ms: default_read_timeout_ms(),
            max_line_bytes: default_max_line_bytes(),
            outbound_queue_len: default_outbound_queue_len(),
        }
    }
}

/// History storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Directory holding one JSON file per room.
    #[serde(default = "default_history_dir")]
    pub dir: String,
}

fn default_history_dir() -> String {
    "chat_history".to_string()
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: default_history_dir(),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Server host to connect to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port to connect to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Timeout for connecting and for the handshake reply, in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// How long to wait for `left_room` after sending `leave`.
    #[serde(default = "default_leave_ack_timeout_ms")]
    pub leave_ack_timeout_ms: u64,
    /// Longest accepted line in bytes.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Longest accepted history line in the join reply, in bytes.
    #[serde(default = "default_max_history_bytes")]
    pub max_history_bytes: usize,
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_leave_ack_timeout_ms() -> u64 {
    2000
}

fn default_max_history_bytes() -> usize {
    16 * 1024 * 1024
}

impl ClientConfig {
    /// `host:port` string of the server.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_secs: default_connect_timeout(),
            leave_ack_timeout_ms: default_leave_ack_timeout_ms(),
            max_line_bytes: default_max_line_bytes(),
            max_history_bytes: default_max_history_bytes(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/roomchat.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// History storage configuration.
    #[serde(default)]
    pub history: HistoryConfig,
    /// Client configuration.
    #[serde(default)]
    pub client: ClientConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(RoomchatError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| RoomchatError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `ROOMCHAT_HISTORY_DIR`: directory for room history files
    /// - `ROOMCHAT_LOG_LEVEL`: log level
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("ROOMCHAT_HISTORY_DIR") {
            if !dir.is_empty() {
                self.history.dir = dir;
            }
        }
        if let Ok(level) = std::env::var("ROOMCHAT_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.server.read_timeout_ms == 0 {
            return Err(RoomchatError::Validation(
                "server.read_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.server.max_line_bytes == 0 || self.client.max_line_bytes == 0 {
            return Err(RoomchatError::Validation(
                "max_line_bytes must be greater than zero".to_string(),
            ));
        }
        if self.server.outbound_queue_len < 2 {
            return Err(RoomchatError::Validation(
                "server.outbound_queue_len must be at least 2".to_string(),
            ));
        }
        if self.client.max_history_bytes < self.client.max_line_bytes {
            return Err(RoomchatError::Validation(
                "client.max_history_bytes must not be below client.max_line_bytes".to_string(),
            ));
        }
        if self.history.dir.trim().is_empty() {
            return Err(RoomchatError::Validation(
                "history.dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
