//! Network, telemetry and session-loop settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Listener address for the WebSocket/HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BindConfig {
    /// Default: 0.0.0.0
    #[serde(default = "BindConfig::default_host")]
    pub host: String,

    /// Default: 8766
    #[serde(default = "BindConfig::default_port")]
    pub port: u16,
}

impl BindConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8766
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

/// Logging and OTLP export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint. Empty disables export; logs still go to stderr.
    #[serde(default)]
    pub otlp_endpoint: String,

    /// EnvFilter directive used when RUST_LOG is unset.
    /// Default: info,tootle=debug
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info,tootle=debug".to_string()
    }

    pub fn otlp_enabled(&self) -> bool {
        !self.otlp_endpoint.trim().is_empty()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: String::new(),
            log_level: Self::default_log_level(),
        }
    }
}

/// Per-connection session loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "SessionConfig::default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    #[serde(default = "SessionConfig::default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,

    #[serde(default = "SessionConfig::default_close_timeout_secs")]
    pub close_timeout_secs: u64,

    /// Capacity of the handoff queue between a generation worker and its
    /// session. A full queue blocks the worker.
    #[serde(default = "SessionConfig::default_queue_capacity")]
    pub queue_capacity: usize,

    /// Emit a MIDI snapshot every this many events.
    #[serde(default = "SessionConfig::default_snapshot_every")]
    pub snapshot_every: u64,
}

impl SessionConfig {
    fn default_ping_interval_secs() -> u64 {
        20
    }

    fn default_ping_timeout_secs() -> u64 {
        20
    }

    fn default_close_timeout_secs() -> u64 {
        5
    }

    fn default_queue_capacity() -> usize {
        256
    }

    fn default_snapshot_every() -> u64 {
        20
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: Self::default_ping_interval_secs(),
            ping_timeout_secs: Self::default_ping_timeout_secs(),
            close_timeout_secs: Self::default_close_timeout_secs(),
            queue_capacity: Self::default_queue_capacity(),
            snapshot_every: Self::default_snapshot_every(),
        }
    }
}
