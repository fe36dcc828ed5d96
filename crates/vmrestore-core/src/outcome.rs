use std::fmt;
use std::path::PathBuf;

/// Terminal result of one restore run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Canceled { cleanup_path: Option<PathBuf> },
    Failed { message: String },
    FailedWithErrorsObserved,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }

    /// Banner appended to the restore log once the run is over.
    pub fn banner(&self) -> &'static str {
        match self {
            Self::Success => "Finished successfully!",
            Self::Canceled { .. } => "Restore aborted!",
            Self::Failed { .. } | Self::FailedWithErrorsObserved => "Finished with errors!",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Canceled {
                cleanup_path: Some(path),
            } => write!(f, "canceled (temporary files in {})", path.display()),
            Self::Canceled { cleanup_path: None } => write!(f, "canceled"),
            Self::Failed { message } => write!(f, "failed: {message}"),
            Self::FailedWithErrorsObserved => write!(f, "finished with errors"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::Outcome;

    #[test]
    fn banner_groups_both_failure_kinds() {
        assert_eq!(
            Outcome::Failed {
                message: "disk full".to_string()
            }
            .banner(),
            Outcome::FailedWithErrorsObserved.banner()
        );
        assert_eq!(
            Outcome::Canceled { cleanup_path: None }.banner(),
            "Restore aborted!"
        );
    }

    #[test]
    fn display_mentions_cleanup_path() {
        let outcome = Outcome::Canceled {
            cleanup_path: Some(PathBuf::from("/var/tmp/restore_1")),
        };
        assert_eq!(
            outcome.to_string(),
            "canceled (temporary files in /var/tmp/restore_1)"
        );
    }
}
