use std::sync::{Arc, OnceLock};

use crate::outcome::Outcome;

/// Write-once slot the worker fills with its outcome as its last action.
#[derive(Debug, Clone, Default)]
pub struct CompletionLatch(Arc<OnceLock<Outcome>>);

impl CompletionLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first publish wins; a second one hands the rejected outcome back.
    pub fn publish(&self, outcome: Outcome) -> Result<(), Outcome> {
        self.0.set(outcome)
    }

    pub fn is_finished(&self) -> bool {
        self.0.get().is_some()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.0.get()
    }
}
