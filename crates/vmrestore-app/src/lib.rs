mod inventory;
pub mod pump;
mod restore;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use vmrestore_core::config::{VmrestoreConfig, load_config, resolve_config_path};
use vmrestore_core::engine::RestoreEngine;
use vmrestore_core::process_engine::ProcessEngine;
use vmrestore_core::registry::{LockFileRegistry, VmRegistry};
use vmrestore_core::work::RestoreOptions;

pub use inventory::{RestoreSummary, SummaryRow, summarize_selection};
pub use restore::{REMOVABLE_MEDIA_NOTICE, RestoreSession, StartError};

/// Settings shared by every restore started from one [`App`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreSettings {
    pub scratch_dir: PathBuf,
    pub tick: Duration,
    pub defaults: RestoreOptions,
}

impl RestoreSettings {
    pub fn from_config(config: &VmrestoreConfig) -> Self {
        Self {
            scratch_dir: config.restore.scratch_dir.clone(),
            tick: config.restore.tick(),
            defaults: config.defaults,
        }
    }
}

pub struct App {
    pub engine: Arc<dyn RestoreEngine>,
    pub registry: Arc<dyn VmRegistry>,
    pub settings: RestoreSettings,
}

impl App {
    pub fn new(
        engine: Arc<dyn RestoreEngine>,
        registry: Arc<dyn VmRegistry>,
        settings: RestoreSettings,
    ) -> Self {
        Self {
            engine,
            registry,
            settings,
        }
    }

    /// Wires the process-backed engine and lock-file registry described by `config`.
    pub fn from_config(config: &VmrestoreConfig) -> Self {
        let engine = ProcessEngine::new(
            config.engine.program.clone(),
            config.engine.args.clone(),
            config.restore.scratch_dir.clone(),
        );
        let registry = LockFileRegistry::new(config.registry.lock_path.clone());
        Self::new(
            Arc::new(engine),
            Arc::new(registry),
            RestoreSettings::from_config(config),
        )
    }
}

pub fn ensure_config_ready() -> Result<VmrestoreConfig> {
    let config_path = resolve_config_path().context("failed to resolve config path")?;

    if !config_path.exists() {
        bail!(
            "missing config at {}\nCreate ~/.config/vmrestore/config.toml and see README.md for setup instructions.",
            config_path.display()
        );
    }

    load_config(&config_path).map_err(|error| {
        anyhow!(
            "invalid config at {}: {error}\nFix the config and retry. See README.md for setup instructions.",
            config_path.display()
        )
    })
}
