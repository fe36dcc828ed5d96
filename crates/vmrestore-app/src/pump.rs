use std::time::Duration;

use tracing::{debug, info};
use vmrestore_core::cancel::CancelSignal;
use vmrestore_core::channel::{ProgressEvent, ProgressReceiver};
use vmrestore_core::latch::CompletionLatch;
use vmrestore_core::outcome::Outcome;

pub const ABORTING_MESSAGE: &str = "Aborting the operation...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Log,
    Error,
    Success,
}

/// Where a running restore is rendered. Only ever called from the interactive thread.
pub trait ProgressView {
    fn append_line(&mut self, text: &str, tone: Tone);
    fn set_progress(&mut self, percent: i64);
    fn set_cancel_enabled(&mut self, enabled: bool);
    fn finished(&mut self, outcome: &Outcome);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    Idle,
    CancelRequested,
}

/// Interactive work serviced between ticks by callers without their own event loop.
pub trait InteractiveContext {
    fn service_pending(&mut self, tick: Duration) -> Interaction;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpState {
    Running,
    Stopped(Outcome),
}

/// Moves worker output onto a [`ProgressView`] until the run publishes its outcome.
pub struct Pump {
    receiver: ProgressReceiver,
    latch: CompletionLatch,
    cancel: CancelSignal,
    state: PumpState,
    cancel_enabled: bool,
}

impl Pump {
    pub fn new(receiver: ProgressReceiver, latch: CompletionLatch, cancel: CancelSignal) -> Self {
        Self {
            receiver,
            latch,
            cancel,
            state: PumpState::Running,
            cancel_enabled: true,
        }
    }

    pub fn state(&self) -> &PumpState {
        &self.state
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.state, PumpState::Stopped(_))
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        match &self.state {
            PumpState::Running => None,
            PumpState::Stopped(outcome) => Some(outcome),
        }
    }

    pub fn is_cancel_enabled(&self) -> bool {
        self.cancel_enabled
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Returns the outcome on the tick that stops the pump and `None` otherwise.
    pub fn tick(&mut self, view: &mut dyn ProgressView) -> Option<Outcome> {
        if self.is_stopped() {
            return None;
        }

        // Read before draining so every event pushed before publish is applied first.
        let finished = self.latch.is_finished();

        for event in self.receiver.drain_available() {
            match event {
                ProgressEvent::Log(text) => view.append_line(&text, Tone::Log),
                ProgressEvent::Error(text) => view.append_line(&text, Tone::Error),
                ProgressEvent::Progress(percent) => view.set_progress(percent),
            }
        }

        if !finished {
            return None;
        }

        let outcome = self.latch.outcome()?.clone();
        let tone = match outcome {
            Outcome::Success => Tone::Success,
            Outcome::Canceled { .. } => Tone::Log,
            Outcome::Failed { .. } | Outcome::FailedWithErrorsObserved => Tone::Error,
        };
        view.set_progress(100);
        view.append_line(outcome.banner(), tone);
        self.cancel_enabled = false;
        view.set_cancel_enabled(false);
        view.finished(&outcome);

        info!(%outcome, "restore pump stopped");
        self.state = PumpState::Stopped(outcome.clone());
        Some(outcome)
    }

    /// Signals the worker and shows the abort notice. The pump keeps running until the
    /// worker publishes. Returns false when cancellation was already requested.
    pub fn request_cancel(&mut self, view: &mut dyn ProgressView) -> bool {
        if self.is_stopped() || !self.cancel.request_cancel() {
            return false;
        }

        debug!("restore cancellation requested");
        view.append_line(ABORTING_MESSAGE, Tone::Error);
        self.cancel_enabled = false;
        view.set_cancel_enabled(false);
        true
    }

    pub fn run_to_completion(
        &mut self,
        view: &mut dyn ProgressView,
        context: &mut dyn InteractiveContext,
        tick: Duration,
    ) -> Outcome {
        loop {
            if let PumpState::Stopped(outcome) = &self.state {
                return outcome.clone();
            }
            if let Some(outcome) = self.tick(view) {
                return outcome;
            }
            if context.service_pending(tick) == Interaction::CancelRequested {
                self.request_cancel(view);
            }
        }
    }
}
