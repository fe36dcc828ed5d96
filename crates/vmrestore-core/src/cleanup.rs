use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::outcome::Outcome;

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("failed to remove temporary files at {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Yes,
    No,
}

/// What the wizard should tell the user once a restore run is over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupAdvice {
    Finished,
    Aborted,
    OfferRemoval { path: PathBuf },
    InspectManually { message: String, leftovers: String },
}

impl CleanupAdvice {
    pub fn title(&self) -> &'static str {
        match self {
            Self::Finished => "Restore finished",
            Self::Aborted | Self::OfferRemoval { .. } => "Restore aborted",
            Self::InspectManually { .. } => "Restore error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Finished => "Finished successfully!".to_string(),
            Self::Aborted => "Restore aborted!".to_string(),
            Self::OfferRemoval { path } => {
                format!(
                    "Do you want to remove temporary files from {}?",
                    path.display()
                )
            }
            Self::InspectManually { message, leftovers } => format!(
                "ERROR: {message}\n\nPartially restored files may be left in {leftovers}; investigate them and/or clean them up."
            ),
        }
    }

    pub fn removal_path(&self) -> Option<&Path> {
        match self {
            Self::OfferRemoval { path } => Some(path.as_path()),
            _ => None,
        }
    }
}

/// Maps a finished run to advice. Nothing here deletes files on its own.
#[derive(Debug, Clone)]
pub struct CleanupAdvisor {
    scratch_dir: PathBuf,
}

impl CleanupAdvisor {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Conventional location of partially restored files.
    pub fn leftover_pattern(&self) -> String {
        self.scratch_dir.join("restore_*").display().to_string()
    }

    pub fn advise(&self, outcome: &Outcome) -> CleanupAdvice {
        match outcome {
            Outcome::Success => CleanupAdvice::Finished,
            Outcome::Canceled {
                cleanup_path: Some(path),
            } => CleanupAdvice::OfferRemoval { path: path.clone() },
            Outcome::Canceled { cleanup_path: None } => CleanupAdvice::Aborted,
            Outcome::Failed { message } => CleanupAdvice::InspectManually {
                message: message.clone(),
                leftovers: self.leftover_pattern(),
            },
            Outcome::FailedWithErrorsObserved => CleanupAdvice::InspectManually {
                message: Outcome::FailedWithErrorsObserved.banner().to_string(),
                leftovers: self.leftover_pattern(),
            },
        }
    }

    /// Deletes the offered directory only when the user said yes.
    /// Returns whether anything was removed.
    pub fn apply(
        &self,
        advice: &CleanupAdvice,
        confirmation: Confirmation,
    ) -> Result<bool, CleanupError> {
        let Some(path) = advice.removal_path() else {
            return Ok(false);
        };
        if confirmation != Confirmation::Yes || !path.exists() {
            return Ok(false);
        }

        fs::remove_dir_all(path).map_err(|source| CleanupError::Remove {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "removed temporary restore files");
        Ok(true)
    }
}
