//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::matchmaking::HubConfig;
use crate::util::rate_limit::RELAY_RATE_LIMIT;
use crate::util::time::{period, INPUT_TPS, SNAPSHOT_TPS};

/// Relay server configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS, comma-separated. Any origin when unset.
    pub client_origin: Option<String>,
    /// Seconds a matched session may stay disconnected
    pub reconnect_grace_secs: u64,
    /// Seconds a queued session may stay silent
    pub queue_idle_timeout_secs: u64,
    /// Inbound messages per second per connection
    pub relay_rate_limit: u32,
    /// Sweeper period in milliseconds
    pub sweep_interval_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origin: lookup("CLIENT_ORIGIN").filter(|s| !s.trim().is_empty()),
            reconnect_grace_secs: parse_or(&lookup, "RECONNECT_GRACE_SECS", 30)?,
            queue_idle_timeout_secs: parse_or(&lookup, "QUEUE_IDLE_TIMEOUT_SECS", 30)?,
            relay_rate_limit: parse_or(&lookup, "RELAY_RATE_LIMIT", RELAY_RATE_LIMIT)?,
            sweep_interval_ms: parse_or(&lookup, "SWEEP_INTERVAL_MS", 500)?,
        })
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            reconnect_grace: Duration::from_secs(self.reconnect_grace_secs),
            queue_idle_timeout: Duration::from_secs(self.queue_idle_timeout_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(10))
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Timers and retry policy of a multiplayer client session
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Relay WebSocket URL
    pub relay_url: String,
    /// Durable id sent on every relay (re)connection
    pub session_id: String,
    pub username: String,
    /// Local UDP address for the direct channel; None disables it
    pub direct_bind: Option<SocketAddr>,
    /// Address advertised to the peer, when it differs from the bound one
    pub direct_advertise: Option<SocketAddr>,
    pub snapshot_interval: Duration,
    pub input_interval: Duration,
    pub ping_interval: Duration,
    pub link_check_interval: Duration,
    /// Silence after which the direct channel counts as down
    pub direct_timeout: Duration,
    pub relay_backoff: Duration,
    pub relay_max_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:8080/ws".to_string(),
            session_id: uuid::Uuid::new_v4().to_string(),
            username: "player".to_string(),
            direct_bind: None,
            direct_advertise: None,
            snapshot_interval: period(SNAPSHOT_TPS),
            input_interval: period(INPUT_TPS),
            ping_interval: Duration::from_secs(5),
            link_check_interval: Duration::from_secs(1),
            direct_timeout: Duration::from_secs(3),
            relay_backoff: Duration::from_secs(2),
            relay_max_retries: 5,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
