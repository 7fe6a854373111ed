//! Layered configuration for the Tootle streaming service.
//!
//! Everything here is process-level: where to listen, where the model
//! artifacts live, how loud to log, and the knobs of the per-connection
//! session loop. Nothing in this crate changes once the server is running.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/tootle/config.toml` (system)
//! 2. `~/.config/tootle/config.toml` (user)
//! 3. `./tootle.toml` (local override, or the path given on the CLI)
//! 4. Environment variables (`TOOTLE_*`, `MODEL_*`)
//!
//! # Example Config
//!
//! ```toml
//! [bind]
//! host = "0.0.0.0"
//! port = 8766
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info"
//!
//! [model]
//! config = "models/default/config.json"
//! device = "cpu"
//! no_download = true
//!
//! [session]
//! ping_interval_secs = 20
//! queue_capacity = 256
//! ```

pub mod infra;
pub mod loader;
pub mod model;

pub use infra::{BindConfig, SessionConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use model::{resolve_model_path, Device, ModelConfig};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Complete Tootle configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TootleConfig {
    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

impl TootleConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace `./tootle.toml`.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return where values came from.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = TootleConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::apply_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources)?;
        config.model.resolve_paths();

        Ok((config, sources))
    }

    /// Socket address string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind.host, self.bind.port)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# Tootle Configuration\n\n");

        output.push_str("[bind]\n");
        output.push_str(&format!("host = \"{}\"\n", self.bind.host));
        output.push_str(&format!("port = {}\n", self.bind.port));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "otlp_endpoint = \"{}\"\n",
            self.telemetry.otlp_endpoint
        ));
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output.push_str("\n[model]\n");
        output.push_str(&format!("config = \"{}\"\n", self.model.config.display()));
        output.push_str(&format!("base = \"{}\"\n", self.model.base.display()));
        output.push_str(&format!("token = \"{}\"\n", self.model.token.display()));
        output.push_str(&format!("config_url = \"{}\"\n", self.model.config_url));
        output.push_str(&format!("base_url = \"{}\"\n", self.model.base_url));
        output.push_str(&format!("token_url = \"{}\"\n", self.model.token_url));
        output.push_str(&format!("no_download = {}\n", self.model.no_download));
        output.push_str(&format!("device = \"{}\"\n", self.model.device));

        output.push_str("\n[session]\n");
        output.push_str(&format!(
            "ping_interval_secs = {}\n",
            self.session.ping_interval_secs
        ));
        output.push_str(&format!(
            "ping_timeout_secs = {}\n",
            self.session.ping_timeout_secs
        ));
        output.push_str(&format!(
            "close_timeout_secs = {}\n",
            self.session.close_timeout_secs
        ));
        output.push_str(&format!("queue_capacity = {}\n", self.session.queue_capacity));
        output.push_str(&format!("snapshot_every = {}\n", self.session.snapshot_every));

        output
    }
}
