//! Relay pool configuration
//!
//! Configuration is plain JSON with camelCase keys. Every field has a
//! default, so `{}` is a valid config.

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_true() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_max_reconnect_delay_ms() -> u64 {
    60_000
}

fn default_outbox_capacity() -> usize {
    1_024
}

fn default_confirmation_timeout_ms() -> u64 {
    5_000
}

fn default_status_capacity() -> usize {
    256
}

/// Per-connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Reconnect automatically after an unexpected close
    #[serde(default = "default_true")]
    pub reconnect: bool,

    /// Time allowed for the WebSocket handshake
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// First reconnect delay
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Ceiling for the doubling reconnect delay
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Reconnection attempts (0 = infinite)
    #[serde(default)]
    pub max_reconnect_attempts: u32,

    /// Frames held while the socket is not open
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            reconnect: true,
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            max_reconnect_attempts: 0,
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

impl RelayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }
}

/// Pool-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// Relays added when the pool is built from config
    #[serde(default)]
    pub relays: Vec<String>,

    /// Settings applied to every relay connection
    #[serde(default)]
    pub relay: RelayConfig,

    /// How long a published event may stay unconfirmed
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,

    /// Buffer size of the connection status broadcast
    #[serde(default = "default_status_capacity")]
    pub status_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            relays: Vec::new(),
            relay: RelayConfig::default(),
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
            status_capacity: default_status_capacity(),
        }
    }
}

impl PoolConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    /// Parse a config from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ClientError::Config(e.to_string()))
    }
}

/// Load a pool config from a JSON file.
pub fn load_config(path: impl AsRef<Path>) -> Result<PoolConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    PoolConfig::from_json(&text)
        .map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))
}

/// Write a pool config as pretty JSON.
pub fn save_config(path: impl AsRef<Path>, config: &PoolConfig) -> Result<()> {
    let text = serde_json::to_string_pretty(config)?;
    std::fs::write(path, text)?;
    Ok(())
}
