use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const BACKUP_HEADER_FILE: &str = "qubes.xml";
const REMOVABLE_MEDIA_MARKER: &str = "media/";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RestoreOptions {
    #[serde(default)]
    pub use_default_template: bool,
    #[serde(default)]
    pub use_default_netvm: bool,
    #[serde(default)]
    pub ignore_username_mismatch: bool,
    #[serde(default)]
    pub verify_only: bool,
}

impl RestoreOptions {
    /// Command-line flags understood by the restore command.
    pub fn to_flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.use_default_template {
            flags.push("--skip-broken-template");
        }
        if self.use_default_netvm {
            flags.push("--skip-broken-netvm");
        }
        if self.ignore_username_mismatch {
            flags.push("--ignore-username-mismatch");
        }
        if self.verify_only {
            flags.push("--verify-only");
        }
        flags
    }

    /// Missing template and netvm are ignored together.
    pub fn ignore_missing(&self) -> bool {
        self.use_default_template && self.use_default_netvm
    }

    pub fn set_ignore_missing(&mut self, value: bool) {
        self.use_default_template = value;
        self.use_default_netvm = value;
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct BackupSource {
    pub location: PathBuf,
    pub passphrase: Option<String>,
    pub encrypted: bool,
    /// VM holding the backup; `None` means the location is local.
    pub source_vm: Option<String>,
}

impl fmt::Debug for BackupSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupSource")
            .field("location", &self.location)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("encrypted", &self.encrypted)
            .field("source_vm", &self.source_vm)
            .finish()
    }
}

impl BackupSource {
    pub fn local(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            passphrase: None,
            encrypted: false,
            source_vm: None,
        }
    }

    /// A local location must be a backup file or a directory holding the backup header.
    /// Locations inside another VM cannot be checked from here and are accepted.
    pub fn looks_restorable(&self) -> bool {
        if self.location.as_os_str().is_empty() {
            return false;
        }
        if self.source_vm.is_some() {
            return true;
        }
        is_backup_location(&self.location)
    }

    pub fn on_removable_media(&self) -> bool {
        self.location
            .to_string_lossy()
            .contains(REMOVABLE_MEDIA_MARKER)
    }
}

fn is_backup_location(path: &Path) -> bool {
    path.is_file() || path.join(BACKUP_HEADER_FILE).is_file()
}

/// A VM found in the backup, as reported by the engine inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmCandidate {
    pub name: String,
    pub good_to_go: bool,
    pub problem: Option<String>,
}

/// Everything the worker needs for one restore run. Immutable once handed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub source: BackupSource,
    pub vms: Vec<String>,
    pub options: RestoreOptions,
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{BackupSource, RestoreOptions};

    #[test]
    fn plain_file_is_a_restorable_location() {
        let temp = tempfile::tempdir().expect("temp dir");
        let file = temp.path().join("qubes-backup-2026");
        fs::write(&file, b"backup").expect("write backup");

        assert!(BackupSource::local(&file).looks_restorable());
    }

    #[test]
    fn directory_needs_backup_header() {
        let temp = tempfile::tempdir().expect("temp dir");
        assert!(!BackupSource::local(temp.path()).looks_restorable());

        fs::write(temp.path().join("qubes.xml"), b"<qubes/>").expect("write header");
        assert!(BackupSource::local(temp.path()).looks_restorable());
    }

    #[test]
    fn remote_source_is_accepted_without_checking_disk() {
        let mut source = BackupSource::local("/home/user/backups/missing");
        assert!(!source.looks_restorable());

        source.source_vm = Some("work".to_string());
        assert!(source.looks_restorable());
    }

    #[test]
    fn empty_location_is_never_restorable() {
        let mut source = BackupSource::local("");
        source.source_vm = Some("work".to_string());
        assert!(!source.looks_restorable());
    }

    #[test]
    fn media_paths_are_flagged_for_unmount_notice() {
        assert!(BackupSource::local("/run/media/user/usb/backup").on_removable_media());
        assert!(!BackupSource::local("/var/backups/backup").on_removable_media());
    }

    #[test]
    fn debug_output_redacts_passphrase() {
        let mut source = BackupSource::local("/backup");
        source.passphrase = Some("hunter2".to_string());
        let rendered = format!("{source:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn ignore_missing_toggles_template_and_netvm_together() {
        let mut options = RestoreOptions::default();
        options.set_ignore_missing(true);
        assert!(options.use_default_template && options.use_default_netvm);
        assert!(options.ignore_missing());
        assert_eq!(
            options.to_flags(),
            vec!["--skip-broken-template", "--skip-broken-netvm"]
        );

        options.use_default_netvm = false;
        assert!(!options.ignore_missing());
    }
}
