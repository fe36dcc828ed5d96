use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use crate::cancel::CancelSignal;
use crate::channel::ProgressSender;
use crate::engine::{EngineError, EngineHooks, RestoreEngine};
use crate::latch::CompletionLatch;
use crate::outcome::Outcome;
use crate::registry::{RegistryWriteGuard, VmRegistry};
use crate::work::WorkItem;

const WORKER_THREAD_NAME: &str = "restore-worker";

/// Runs one restore on the worker thread and reduces whatever happens to an [`Outcome`].
pub struct TaskRunner {
    engine: Arc<dyn RestoreEngine>,
    registry: Arc<dyn VmRegistry>,
    progress: ProgressSender,
}

struct ChannelHooks<'a> {
    progress: &'a ProgressSender,
    cancel: &'a CancelSignal,
    error_observed: bool,
}

impl EngineHooks for ChannelHooks<'_> {
    fn on_log(&mut self, text: &str) {
        self.progress.log(text);
    }

    fn on_error(&mut self, text: &str) {
        self.error_observed = true;
        self.progress.error(text);
    }

    fn on_progress(&mut self, percent: i64) {
        self.progress.progress(percent);
    }

    fn cancel_requested(&self) -> bool {
        self.cancel.is_cancel_requested()
    }
}

impl TaskRunner {
    pub fn new(
        engine: Arc<dyn RestoreEngine>,
        registry: Arc<dyn VmRegistry>,
        progress: ProgressSender,
    ) -> Self {
        Self {
            engine,
            registry,
            progress,
        }
    }

    /// The registry stays write-locked for the whole engine call and is released
    /// before this returns, whichever way the engine exits.
    pub fn run(&self, work: &WorkItem, cancel: &CancelSignal) -> Outcome {
        let _guard = match RegistryWriteGuard::acquire(self.registry.as_ref()) {
            Ok(guard) => guard,
            Err(error) => {
                warn!(%error, "could not lock vm registry");
                return Outcome::Failed {
                    message: error.to_string(),
                };
            }
        };

        if cancel.is_cancel_requested() {
            info!("restore canceled before the engine started");
            return Outcome::Canceled { cleanup_path: None };
        }

        info!(vms = work.vms.len(), "restore engine starting");
        let mut hooks = ChannelHooks {
            progress: &self.progress,
            cancel,
            error_observed: false,
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.engine.perform(work, &mut hooks)
        }));
        let error_observed = hooks.error_observed;

        match result {
            Ok(result) => resolve_outcome(result, error_observed),
            Err(payload) => Outcome::Failed {
                message: format!(
                    "restore engine panicked: {}",
                    panic_message(payload.as_ref())
                ),
            },
        }
    }

    /// Starts `run` on a dedicated thread; publishing to `latch` is its last action.
    pub fn spawn(
        self,
        work: WorkItem,
        cancel: CancelSignal,
        latch: CompletionLatch,
    ) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let outcome = self.run(&work, &cancel);
                info!(%outcome, "restore worker finished");
                drop(self);
                if latch.publish(outcome).is_err() {
                    warn!("restore outcome was already published");
                }
            })
    }
}

fn resolve_outcome(result: Result<(), EngineError>, error_observed: bool) -> Outcome {
    match result {
        Err(EngineError::Canceled { cleanup_path }) => Outcome::Canceled { cleanup_path },
        Err(EngineError::Failed { message }) => Outcome::Failed { message },
        Ok(()) if error_observed => Outcome::FailedWithErrorsObserved,
        Ok(()) => Outcome::Success,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic payload".to_string()
}
