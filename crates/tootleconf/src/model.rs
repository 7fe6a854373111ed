//! Model artifact locations and execution device.
//!
//! Downloading artifacts is not this crate's job; it only records where they
//! are expected and whether fetching them is allowed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

const UPSTREAM: &str = "https://huggingface.co/skytnt/midi-model-tv2o-medium/resolve/main";

/// Where inference runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cuda,
    Cpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cuda => write!(f, "cuda"),
            Device::Cpu => write!(f, "cpu"),
        }
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cuda" => Ok(Device::Cuda),
            "cpu" => Ok(Device::Cpu),
            other => Err(format!("unknown device '{}', expected cuda or cpu", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    /// Model config.json (carries the tokenizer version).
    #[serde(default = "ModelConfig::default_config")]
    pub config: PathBuf,

    #[serde(default = "ModelConfig::default_base")]
    pub base: PathBuf,

    #[serde(default = "ModelConfig::default_token")]
    pub token: PathBuf,

    #[serde(default = "ModelConfig::default_config_url")]
    pub config_url: String,

    #[serde(default = "ModelConfig::default_base_url")]
    pub base_url: String,

    #[serde(default = "ModelConfig::default_token_url")]
    pub token_url: String,

    /// Never fetch missing artifacts.
    #[serde(default)]
    pub no_download: bool,

    #[serde(default)]
    pub device: Device,
}

impl ModelConfig {
    fn default_config() -> PathBuf {
        PathBuf::from("models/default/config.json")
    }

    fn default_base() -> PathBuf {
        PathBuf::from("models/default/model_base.onnx")
    }

    fn default_token() -> PathBuf {
        PathBuf::from("models/default/model_token.onnx")
    }

    fn default_config_url() -> String {
        format!("{}/config.json", UPSTREAM)
    }

    fn default_base_url() -> String {
        format!("{}/onnx/model_base.onnx", UPSTREAM)
    }

    fn default_token_url() -> String {
        format!("{}/onnx/model_token.onnx", UPSTREAM)
    }

    /// Re-anchor relative artifact paths under `MODEL_PATH` when it is set.
    pub fn resolve_paths(&mut self) {
        let root = std::env::var_os("MODEL_PATH").map(PathBuf::from);
        self.resolve_paths_under(root.as_deref());
    }

    pub fn resolve_paths_under(&mut self, model_root: Option<&Path>) {
        self.config = resolve_model_path(&self.config, model_root);
        self.base = resolve_model_path(&self.base, model_root);
        self.token = resolve_model_path(&self.token, model_root);
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            config: Self::default_config(),
            base: Self::default_base(),
            token: Self::default_token(),
            config_url: Self::default_config_url(),
            base_url: Self::default_base_url(),
            token_url: Self::default_token_url(),
            no_download: false,
            device: Device::default(),
        }
    }
}

/// Resolve a model path against an optional model root.
///
/// Absolute paths pass through. With a root, a leading `models/` component is
/// dropped so `MODEL_PATH=/app/models` maps `models/default/x` to
/// `/app/models/default/x`. If only the doubled legacy layout
/// (`/app/models/models/default/x`) exists on disk, that one wins.
pub fn resolve_model_path(path: &Path, model_root: Option<&Path>) -> PathBuf {
    if path.as_os_str().is_empty() || path.is_absolute() {
        return path.to_path_buf();
    }

    let Some(root) = model_root else {
        return path.to_path_buf();
    };

    let normalized = PathBuf::from(path.to_string_lossy().replace('\\', "/"));
    let mut components = normalized.components().peekable();
    if matches!(components.peek(), Some(Component::Normal(first)) if *first == "models") {
        components.next();
    }
    let relative: PathBuf = components.collect();

    let candidate = root.join(relative);
    let legacy = root.join(path);
    if candidate.exists() || !legacy.exists() {
        candidate
    } else {
        legacy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_absolute_path_passes_through() {
        let p = resolve_model_path(Path::new("/opt/m/config.json"), Some(Path::new("/app")));
        assert_eq!(p, PathBuf::from("/opt/m/config.json"));
    }

    #[test]
    fn test_no_root_keeps_relative() {
        let p = resolve_model_path(Path::new("models/default/config.json"), None);
        assert_eq!(p, PathBuf::from("models/default/config.json"));
    }

    #[test]
    fn test_leading_models_component_dropped() {
        let dir = TempDir::new().unwrap();
        let p = resolve_model_path(Path::new("models/default/config.json"), Some(dir.path()));
        assert_eq!(p, dir.path().join("default/config.json"));
    }

    #[test]
    fn test_legacy_layout_preferred_when_only_it_exists() {
        let dir = TempDir::new().unwrap();
        let legacy = dir.path().join("models/default");
        std::fs::create_dir_all(&legacy).unwrap();
        std::fs::write(legacy.join("config.json"), "{}").unwrap();

        let p = resolve_model_path(Path::new("models/default/config.json"), Some(dir.path()));
        assert_eq!(p, legacy.join("config.json"));
    }

    #[test]
    fn test_device_parse() {
        assert_eq!("CPU".parse::<Device>().unwrap(), Device::Cpu);
        assert!("tpu".parse::<Device>().is_err());
    }
}
