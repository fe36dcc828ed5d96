use std::io;
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};
use vmrestore_core::cancel::CancelSignal;
use vmrestore_core::channel::progress_channel;
use vmrestore_core::cleanup::{CleanupAdvice, CleanupAdvisor, CleanupError, Confirmation};
use vmrestore_core::latch::CompletionLatch;
use vmrestore_core::outcome::Outcome;
use vmrestore_core::task::TaskRunner;
use vmrestore_core::work::WorkItem;

use crate::App;
use crate::pump::{InteractiveContext, ProgressView, Pump, Tone};

pub const REMOVABLE_MEDIA_NOTICE: &str =
    "Please unmount your backup volume and cancel the file selection dialog.";

#[derive(Debug, Error)]
pub enum StartError {
    #[error("select at least one VM to restore")]
    NothingSelected,
    #[error("failed to start restore worker: {0}")]
    WorkerSpawn(#[source] io::Error),
}

/// One running (or finished) restore, owned by the interactive side.
pub struct RestoreSession {
    pump: Pump,
    worker: Option<JoinHandle<()>>,
    advisor: CleanupAdvisor,
    removable_media: bool,
}

impl App {
    pub fn start_restore(&self, work: WorkItem) -> Result<RestoreSession, StartError> {
        if work.vms.is_empty() {
            return Err(StartError::NothingSelected);
        }

        let (sender, receiver) = progress_channel();
        let cancel = CancelSignal::new();
        let latch = CompletionLatch::new();
        let removable_media = work.source.on_removable_media();
        let vm_count = work.vms.len();

        let runner = TaskRunner::new(self.engine.clone(), self.registry.clone(), sender);
        let worker = runner
            .spawn(work, cancel.clone(), latch.clone())
            .map_err(StartError::WorkerSpawn)?;
        info!(vms = vm_count, "restore worker spawned");

        Ok(RestoreSession {
            pump: Pump::new(receiver, latch, cancel),
            worker: Some(worker),
            advisor: CleanupAdvisor::new(self.settings.scratch_dir.clone()),
            removable_media,
        })
    }
}

impl RestoreSession {
    pub fn pump(&self) -> &Pump {
        &self.pump
    }

    pub fn pump_mut(&mut self) -> &mut Pump {
        &mut self.pump
    }

    pub fn is_finished(&self) -> bool {
        self.pump.is_stopped()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.pump.outcome()
    }

    pub fn can_cancel(&self) -> bool {
        self.pump.is_cancel_enabled()
    }

    pub fn tick(&mut self, view: &mut dyn ProgressView) -> Option<Outcome> {
        let outcome = self.pump.tick(view)?;
        self.on_stopped(view);
        Some(outcome)
    }

    /// Blocks until the worker publishes, for callers without their own event loop.
    pub fn run_to_completion(
        &mut self,
        view: &mut dyn ProgressView,
        context: &mut dyn InteractiveContext,
        tick: Duration,
    ) -> Outcome {
        if let Some(outcome) = self.pump.outcome() {
            return outcome.clone();
        }
        let outcome = self.pump.run_to_completion(view, context, tick);
        self.on_stopped(view);
        outcome
    }

    pub fn request_cancel(&mut self, view: &mut dyn ProgressView) -> bool {
        self.pump.request_cancel(view)
    }

    pub fn advice(&self) -> Option<CleanupAdvice> {
        self.pump.outcome().map(|outcome| self.advisor.advise(outcome))
    }

    pub fn apply_cleanup(&self, confirmation: Confirmation) -> Result<bool, CleanupError> {
        match self.advice() {
            Some(advice) => self.advisor.apply(&advice, confirmation),
            None => Ok(false),
        }
    }

    fn on_stopped(&mut self, view: &mut dyn ProgressView) {
        if self.removable_media {
            view.append_line(REMOVABLE_MEDIA_NOTICE, Tone::Log);
        }
        self.join_worker();
    }

    fn join_worker(&mut self) {
        // The worker publishes as its final action, so this returns promptly.
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("restore worker exited with a panic after publishing");
        }
    }
}

impl Drop for RestoreSession {
    fn drop(&mut self) {
        if self.worker.is_some() {
            // The detached worker still holds the registry lock until the engine returns.
            self.pump.cancel_signal().request_cancel();
        }
    }
}
