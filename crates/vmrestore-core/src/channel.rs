use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

/// One unit of streamed feedback from the restore worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Log(String),
    Error(String),
    Progress(i64),
}

#[derive(Debug, Clone)]
pub struct ProgressSender {
    inner: Sender<ProgressEvent>,
}

#[derive(Debug)]
pub struct ProgressReceiver {
    inner: Receiver<ProgressEvent>,
    disconnected: bool,
}

pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    let (sender, receiver) = mpsc::channel();
    (
        ProgressSender { inner: sender },
        ProgressReceiver {
            inner: receiver,
            disconnected: false,
        },
    )
}

impl ProgressSender {
    /// Never blocks. Events pushed after the receiver is gone are discarded.
    pub fn push(&self, event: ProgressEvent) {
        let _ = self.inner.send(event);
    }

    pub fn log(&self, message: impl Into<String>) {
        self.push(ProgressEvent::Log(message.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(ProgressEvent::Error(message.into()));
    }

    pub fn progress(&self, percent: i64) {
        self.push(ProgressEvent::Progress(percent));
    }
}

impl ProgressReceiver {
    /// Returns every event buffered right now, oldest first, without waiting.
    pub fn drain_available(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        loop {
            match self.inner.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
        events
    }

    /// True once every sender has been dropped and the buffer was drained empty.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }
}
