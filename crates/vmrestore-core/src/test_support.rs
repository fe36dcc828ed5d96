use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::engine::{EngineError, EngineHooks, RestoreEngine};
use crate::registry::{RegistryError, VmRegistry};
use crate::work::{BackupSource, RestoreOptions, VmCandidate, WorkItem};

#[derive(Debug, Default)]
pub struct CountingRegistry {
    acquired: AtomicUsize,
    released: AtomicUsize,
    held: AtomicBool,
    fail_lock: bool,
}

impl CountingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_lock: true,
            ..Self::default()
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

impl VmRegistry for CountingRegistry {
    fn lock_for_writing(&self) -> Result<(), RegistryError> {
        if self.fail_lock {
            return Err(RegistryError::Lock {
                path: PathBuf::from("/var/lib/qubes/qubes.xml"),
                source: std::io::Error::other("lock refused"),
            });
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.held.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unlock(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.held.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Log(String),
    Error(String),
    Progress(i64),
    WaitForCancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finish {
    Return,
    Cancel(Option<PathBuf>),
    Fail(String),
    Panic(String),
}

pub struct ScriptedEngine {
    steps: Vec<Step>,
    finish: Finish,
    candidates: Vec<VmCandidate>,
    lock_probe: Option<Arc<CountingRegistry>>,
    perform_calls: AtomicUsize,
    lock_held_during_perform: Mutex<Vec<bool>>,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<Step>, finish: Finish) -> Self {
        Self {
            steps,
            finish,
            candidates: Vec::new(),
            lock_probe: None,
            perform_calls: AtomicUsize::new(0),
            lock_held_during_perform: Mutex::new(Vec::new()),
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<VmCandidate>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_lock_probe(mut self, registry: Arc<CountingRegistry>) -> Self {
        self.lock_probe = Some(registry);
        self
    }

    pub fn perform_calls(&self) -> usize {
        self.perform_calls.load(Ordering::SeqCst)
    }

    pub fn lock_held_during_perform(&self) -> Vec<bool> {
        self.lock_held_during_perform
            .lock()
            .expect("lock probe")
            .clone()
    }
}

impl RestoreEngine for ScriptedEngine {
    fn inventory(
        &self,
        _source: &BackupSource,
        _options: &RestoreOptions,
    ) -> Result<Vec<VmCandidate>, EngineError> {
        Ok(self.candidates.clone())
    }

    fn perform(&self, _work: &WorkItem, hooks: &mut dyn EngineHooks) -> Result<(), EngineError> {
        self.perform_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(registry) = &self.lock_probe {
            self.lock_held_during_perform
                .lock()
                .expect("lock probe")
                .push(registry.is_held());
        }

        for step in &self.steps {
            match step {
                Step::Log(text) => hooks.on_log(text),
                Step::Error(text) => hooks.on_error(text),
                Step::Progress(value) => hooks.on_progress(*value),
                Step::WaitForCancel => {
                    let deadline = Instant::now() + Duration::from_secs(5);
                    while !hooks.cancel_requested() && Instant::now() < deadline {
                        thread::sleep(Duration::from_millis(1));
                    }
                }
            }
        }

        match &self.finish {
            Finish::Return => Ok(()),
            Finish::Cancel(cleanup_path) => Err(EngineError::Canceled {
                cleanup_path: cleanup_path.clone(),
            }),
            Finish::Fail(message) => Err(EngineError::failed(message.clone())),
            Finish::Panic(message) => panic!("{message}"),
        }
    }
}

pub fn work_item(vms: &[&str]) -> WorkItem {
    WorkItem {
        source: BackupSource::local("/var/backups/qubes-backup"),
        vms: vms.iter().map(|value| (*value).to_string()).collect(),
        options: RestoreOptions::default(),
    }
}
