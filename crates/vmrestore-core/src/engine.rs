use std::path::PathBuf;

use thiserror::Error;

use crate::work::{BackupSource, RestoreOptions, VmCandidate, WorkItem};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("restore canceled by user")]
    Canceled { cleanup_path: Option<PathBuf> },
    #[error("{message}")]
    Failed { message: String },
}

impl EngineError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Callbacks handed to the engine for one restore call. Invoked on the worker thread.
pub trait EngineHooks {
    fn on_log(&mut self, text: &str);
    fn on_error(&mut self, text: &str);
    fn on_progress(&mut self, percent: i64);
    fn cancel_requested(&self) -> bool;
}

pub trait RestoreEngine: Send + Sync {
    /// Lists the VMs stored in a backup.
    fn inventory(
        &self,
        source: &BackupSource,
        options: &RestoreOptions,
    ) -> Result<Vec<VmCandidate>, EngineError>;

    /// Restores the requested VMs. May block for a long time.
    fn perform(&self, work: &WorkItem, hooks: &mut dyn EngineHooks) -> Result<(), EngineError>;
}
