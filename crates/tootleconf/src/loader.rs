//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, Device, TootleConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/tootle/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("tootle/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("tootle.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Overlay a TOML file onto `config`. Keys absent from the file keep their
/// current value.
pub fn apply_file(config: &mut TootleConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    apply_toml_str(config, &contents, path)
}

/// Overlay TOML text onto `config`.
pub fn apply_toml_str(
    config: &mut TootleConfig,
    contents: &str,
    path: &Path,
) -> Result<(), ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    if let Some(bind) = table.get("bind").and_then(|v| v.as_table()) {
        if let Some(v) = bind.get("host").and_then(|v| v.as_str()) {
            config.bind.host = v.to_string();
        }
        if let Some(v) = bind.get("port").and_then(|v| v.as_integer()) {
            config.bind.port =
                u16::try_from(v).map_err(|_| parse_err(format!("bind.port out of range: {}", v)))?;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("otlp_endpoint").and_then(|v| v.as_str()) {
            config.telemetry.otlp_endpoint = v.to_string();
        }
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.telemetry.log_level = v.to_string();
        }
    }

    if let Some(model) = table.get("model").and_then(|v| v.as_table()) {
        if let Some(v) = model.get("config").and_then(|v| v.as_str()) {
            config.model.config = expand_path(v);
        }
        if let Some(v) = model.get("base").and_then(|v| v.as_str()) {
            config.model.base = expand_path(v);
        }
        if let Some(v) = model.get("token").and_then(|v| v.as_str()) {
            config.model.token = expand_path(v);
        }
        if let Some(v) = model.get("config_url").and_then(|v| v.as_str()) {
            config.model.config_url = v.to_string();
        }
        if let Some(v) = model.get("base_url").and_then(|v| v.as_str()) {
            config.model.base_url = v.to_string();
        }
        if let Some(v) = model.get("token_url").and_then(|v| v.as_str()) {
            config.model.token_url = v.to_string();
        }
        if let Some(v) = model.get("no_download").and_then(|v| v.as_bool()) {
            config.model.no_download = v;
        }
        if let Some(v) = model.get("device").and_then(|v| v.as_str()) {
            config.model.device = v.parse::<Device>().map_err(parse_err)?;
        }
    }

    if let Some(session) = table.get("session").and_then(|v| v.as_table()) {
        let positive = |key: &str| -> Result<Option<u64>, ConfigError> {
            match session.get(key).and_then(|v| v.as_integer()) {
                Some(v) if v > 0 => Ok(Some(v as u64)),
                Some(v) => Err(parse_err(format!("session.{} must be positive, got {}", key, v))),
                None => Ok(None),
            }
        };

        if let Some(v) = positive("ping_interval_secs")? {
            config.session.ping_interval_secs = v;
        }
        if let Some(v) = positive("ping_timeout_secs")? {
            config.session.ping_timeout_secs = v;
        }
        if let Some(v) = positive("close_timeout_secs")? {
            config.session.close_timeout_secs = v;
        }
        if let Some(v) = positive("queue_capacity")? {
            config.session.queue_capacity = v as usize;
        }
        if let Some(v) = positive("snapshot_every")? {
            config.session.snapshot_every = v;
        }
    }

    Ok(())
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(
    config: &mut TootleConfig,
    sources: &mut ConfigSources,
) -> Result<(), ConfigError> {
    apply_env_overrides_from(config, sources, env::vars())
}

/// Same as [`apply_env_overrides`] but reading from an explicit variable set.
pub fn apply_env_overrides_from(
    config: &mut TootleConfig,
    sources: &mut ConfigSources,
    vars: impl IntoIterator<Item = (String, String)>,
) -> Result<(), ConfigError> {
    let invalid = |key: &str, message: String| ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    };

    for (key, value) in vars {
        match key.as_str() {
            "TOOTLE_HOST" => config.bind.host = value,
            "TOOTLE_PORT" => {
                config.bind.port = value
                    .parse()
                    .map_err(|e| invalid(&key, format!("{}", e)))?;
            }
            // Standard OTEL variable is accepted too
            "TOOTLE_OTLP_ENDPOINT" | "OTEL_EXPORTER_OTLP_ENDPOINT" => {
                config.telemetry.otlp_endpoint = value;
            }
            "TOOTLE_LOG_LEVEL" => config.telemetry.log_level = value,
            "TOOTLE_DEVICE" => {
                config.model.device = value.parse().map_err(|e| invalid(&key, e))?;
            }
            "TOOTLE_QUEUE_CAPACITY" => {
                let capacity: usize = value
                    .parse()
                    .map_err(|e| invalid(&key, format!("{}", e)))?;
                if capacity == 0 {
                    return Err(invalid(&key, "must be positive".to_string()));
                }
                config.session.queue_capacity = capacity;
            }
            "MODEL_CONFIG_URL" => config.model.config_url = value,
            "MODEL_BASE_URL" => config.model.base_url = value,
            "MODEL_TOKEN_URL" => config.model.token_url = value,
            "MODEL_NO_DOWNLOAD" => {
                config.model.no_download =
                    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
            }
            _ => continue,
        }
        sources.env_overrides.push(key);
    }

    Ok(())
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        return PathBuf::from(path);
    }

    if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        let (var_name, rest) = match stripped.find('/') {
            Some(slash_pos) => (&stripped[..slash_pos], Some(&stripped[slash_pos + 1..])),
            None => (stripped, None),
        };
        return match (env::var(var_name), rest) {
            (Ok(value), Some(rest)) => PathBuf::from(value).join(rest),
            (Ok(value), None) => PathBuf::from(value),
            (Err(_), _) => PathBuf::from(path),
        };
    }

    PathBuf::from(path)
}
