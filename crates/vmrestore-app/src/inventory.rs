use anyhow::{Context, Result, bail};
use tracing::debug;
use vmrestore_core::work::{BackupSource, RestoreOptions, VmCandidate};

use crate::App;

const INTERNAL_ENTRY_PREFIX: char = '$';
const NOT_IN_BACKUP: &str = "not found in backup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub name: String,
    pub good_to_go: bool,
    pub problem: Option<String>,
}

/// What the confirm page shows for the current selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreSummary {
    pub rows: Vec<SummaryRow>,
}

impl RestoreSummary {
    /// The restore may only start when something is selected and every VM is good to go.
    pub fn all_good(&self) -> bool {
        !self.rows.is_empty() && self.rows.iter().all(|row| row.good_to_go)
    }

    pub fn problems(&self) -> impl Iterator<Item = &SummaryRow> {
        self.rows.iter().filter(|row| !row.good_to_go)
    }
}

impl App {
    pub fn list_vms(
        &self,
        source: &BackupSource,
        options: &RestoreOptions,
    ) -> Result<Vec<VmCandidate>> {
        if !source.looks_restorable() {
            bail!(
                "{} is not a backup: choose a backup file or a directory containing qubes.xml",
                source.location.display()
            );
        }

        let candidates = self
            .engine
            .inventory(source, options)
            .with_context(|| format!("failed to read backup at {}", source.location.display()))?;

        let candidates: Vec<VmCandidate> = candidates
            .into_iter()
            .filter(|candidate| !candidate.name.starts_with(INTERNAL_ENTRY_PREFIX))
            .collect();
        debug!(count = candidates.len(), "backup inventory loaded");
        Ok(candidates)
    }
}

/// Builds the confirm summary in selection order. Selected names missing from the
/// inventory are reported as problems.
pub fn summarize_selection(candidates: &[VmCandidate], selected: &[String]) -> RestoreSummary {
    let rows = selected
        .iter()
        .map(|name| {
            match candidates.iter().find(|candidate| &candidate.name == name) {
                Some(candidate) => SummaryRow {
                    name: candidate.name.clone(),
                    good_to_go: candidate.good_to_go,
                    problem: candidate.problem.clone(),
                },
                None => SummaryRow {
                    name: name.clone(),
                    good_to_go: false,
                    problem: Some(NOT_IN_BACKUP.to_string()),
                },
            }
        })
        .collect();

    RestoreSummary { rows }
}
