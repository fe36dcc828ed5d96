use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::work::RestoreOptions;

const DEFAULT_SCRATCH_DIR: &str = "/var/tmp";
const DEFAULT_REGISTRY_LOCK: &str = "/var/lib/qubes/qubes.xml";
const DEFAULT_TICK_MS: u64 = 100;
const TICK_MS_RANGE: std::ops::RangeInclusive<u64> = 10..=2000;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VmrestoreConfig {
    pub version: u32,
    pub engine: EngineConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
    #[serde(default)]
    pub defaults: RestoreOptions,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    pub lock_path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lock_path: PathBuf::from(DEFAULT_REGISTRY_LOCK),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RestoreConfig {
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl RestoreConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SCRATCH_DIR)
}

fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not resolve home directory for config path")]
    HomeDirectoryUnavailable,
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {message}")]
    Validation { message: String },
}

pub fn resolve_config_path() -> anyhow::Result<PathBuf> {
    let base_dirs = BaseDirs::new().ok_or(ConfigError::HomeDirectoryUnavailable)?;
    Ok(base_dirs
        .home_dir()
        .join(".config")
        .join("vmrestore")
        .join("config.toml"))
}

pub fn load_config(path: &Path) -> Result<VmrestoreConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let parsed: VmrestoreConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    validate_config(&parsed)?;
    Ok(parsed)
}

pub fn validate_config(config: &VmrestoreConfig) -> Result<(), ConfigError> {
    if config.version != 1 {
        return Err(validation("version must be 1"));
    }

    if config.engine.program.trim().is_empty() {
        return Err(validation("engine.program must be non-empty"));
    }

    if let Some(index) = config
        .engine
        .args
        .iter()
        .position(|value| value.trim().is_empty())
    {
        return Err(validation(format!("engine.args[{index}] must be non-empty")));
    }

    if !config.restore.scratch_dir.is_absolute() {
        return Err(validation("restore.scratch_dir must be an absolute path"));
    }

    if !TICK_MS_RANGE.contains(&config.restore.tick_ms) {
        return Err(validation(format!(
            "restore.tick_ms must be between {} and {}",
            TICK_MS_RANGE.start(),
            TICK_MS_RANGE.end()
        )));
    }

    if config.registry.lock_path.as_os_str().is_empty() {
        return Err(validation("registry.lock_path must be non-empty"));
    }

    Ok(())
}

fn validation(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}
