use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag shared between the wizard and the restore worker.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true only for the call that actually flipped the flag.
    pub fn request_cancel(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::CancelSignal;

    #[test]
    fn new_signal_is_not_requested() {
        assert!(!CancelSignal::new().is_cancel_requested());
    }

    #[test]
    fn repeated_requests_are_equivalent_to_one() {
        let signal = CancelSignal::new();
        assert!(signal.request_cancel());
        assert!(!signal.request_cancel());
        assert!(!signal.request_cancel());
        assert!(signal.is_cancel_requested());
    }

    #[test]
    fn request_is_visible_from_clone_on_other_thread() {
        let signal = CancelSignal::new();
        let worker_view = signal.clone();
        signal.request_cancel();

        let observed = thread::spawn(move || worker_view.is_cancel_requested())
            .join()
            .expect("worker");
        assert!(observed);
    }
}
