use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to open VM registry lock at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to lock VM registry at {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The host's VM registry, locked exclusively while a restore mutates it.
pub trait VmRegistry: Send + Sync {
    /// Blocks until the exclusive lock is held.
    fn lock_for_writing(&self) -> Result<(), RegistryError>;
    fn unlock(&self);
}

/// Holds the registry write lock until dropped.
pub struct RegistryWriteGuard<'a> {
    registry: &'a dyn VmRegistry,
}

impl<'a> RegistryWriteGuard<'a> {
    pub fn acquire(registry: &'a dyn VmRegistry) -> Result<Self, RegistryError> {
        registry.lock_for_writing()?;
        debug!("vm registry locked for writing");
        Ok(Self { registry })
    }
}

impl Drop for RegistryWriteGuard<'_> {
    fn drop(&mut self) {
        self.registry.unlock();
        debug!("vm registry unlocked");
    }
}

/// Advisory exclusive lock on a file shared with the other registry users on the host.
#[derive(Debug)]
pub struct LockFileRegistry {
    path: PathBuf,
    held: Mutex<Option<File>>,
}

impl LockFileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            held: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_locked(&self) -> bool {
        self.held
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }
}

impl VmRegistry for LockFileRegistry {
    fn lock_for_writing(&self) -> Result<(), RegistryError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|source| RegistryError::Open {
                path: self.path.clone(),
                source,
            })?;
        file.lock().map_err(|source| RegistryError::Lock {
            path: self.path.clone(),
            source,
        })?;

        *self
            .held
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(file);
        Ok(())
    }

    fn unlock(&self) {
        let file = self
            .held
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(file) = file {
            let _ = file.unlock();
        }
    }
}
