use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use vmrestore_app::pump::{ProgressView, Tone};
use vmrestore_app::{App, RestoreSession, RestoreSettings};
use vmrestore_core::engine::{EngineError, EngineHooks, RestoreEngine};
use vmrestore_core::outcome::Outcome;
use vmrestore_core::registry::{RegistryError, VmRegistry};
use vmrestore_core::work::{BackupSource, RestoreOptions, VmCandidate, WorkItem};

pub static ENV_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Default)]
pub struct CountingRegistry {
    acquired: AtomicUsize,
    released: AtomicUsize,
    held: AtomicBool,
}

impl CountingRegistry {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl VmRegistry for CountingRegistry {
    fn lock_for_writing(&self) -> Result<(), RegistryError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.held.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unlock(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.held.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    Log(&'static str),
    Error(&'static str),
    Progress(i64),
    WaitForCancel,
}

#[derive(Debug, Clone)]
pub enum Finish {
    Return,
    Cancel(Option<PathBuf>),
    Fail(&'static str),
}

pub struct ScriptedEngine {
    steps: Vec<Step>,
    finish: Finish,
    candidates: Vec<VmCandidate>,
    pub performed: Mutex<Vec<WorkItem>>,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<Step>, finish: Finish) -> Self {
        Self {
            steps,
            finish,
            candidates: Vec::new(),
            performed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<VmCandidate>) -> Self {
        self.candidates = candidates;
        self
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

    fn perform(&self, work: &WorkItem, hooks: &mut dyn EngineHooks) -> Result<(), EngineError> {
        self.performed.lock().expect("performed lock").push(work.clone());
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
            Finish::Cancel(path) => Err(EngineError::Canceled {
                cleanup_path: path.clone(),
            }),
            Finish::Fail(message) => Err(EngineError::failed(*message)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Line(String, Tone),
    Progress(i64),
    CancelEnabled(bool),
    Finished(Outcome),
}

#[derive(Default)]
pub struct RecordingView {
    pub updates: Vec<Update>,
}

impl RecordingView {
    pub fn last_progress(&self) -> Option<i64> {
        self.updates.iter().rev().find_map(|update| match update {
            Update::Progress(value) => Some(*value),
            _ => None,
        })
    }

    pub fn lines(&self) -> Vec<&str> {
        self.updates
            .iter()
            .filter_map(|update| match update {
                Update::Line(text, _) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl ProgressView for RecordingView {
    fn append_line(&mut self, text: &str, tone: Tone) {
        self.updates.push(Update::Line(text.to_string(), tone));
    }

    fn set_progress(&mut self, percent: i64) {
        self.updates.push(Update::Progress(percent));
    }

    fn set_cancel_enabled(&mut self, enabled: bool) {
        self.updates.push(Update::CancelEnabled(enabled));
    }

    fn finished(&mut self, outcome: &Outcome) {
        self.updates.push(Update::Finished(outcome.clone()));
    }
}

pub fn app_with(engine: Arc<ScriptedEngine>, registry: Arc<CountingRegistry>, scratch: &Path) -> App {
    App::new(
        engine,
        registry,
        RestoreSettings {
            scratch_dir: scratch.to_path_buf(),
            tick: Duration::from_millis(5),
            defaults: RestoreOptions::default(),
        },
    )
}

pub fn work_item(location: &str, vms: &[&str]) -> WorkItem {
    WorkItem {
        source: BackupSource::local(location),
        vms: vms.iter().map(|value| (*value).to_string()).collect(),
        options: RestoreOptions::default(),
    }
}

/// Ticks until the session stops, failing the test after five seconds.
pub fn pump_until_finished(session: &mut RestoreSession, view: &mut RecordingView) -> Outcome {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(outcome) = session.tick(view) {
            return outcome;
        }
        assert!(Instant::now() < deadline, "restore did not finish in time");
        thread::sleep(Duration::from_millis(2));
    }
}

/// Ticks until `line` shows up, so the engine is known to be running.
pub fn wait_for_line(session: &mut RestoreSession, view: &mut RecordingView, line: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !view.lines().contains(&line) {
        assert!(session.tick(view).is_none(), "restore finished before '{line}'");
        assert!(Instant::now() < deadline, "engine never logged '{line}'");
        thread::sleep(Duration::from_millis(2));
    }
}

pub fn write_valid_config(home: &Path) {
    let config_dir = home.join(".config").join("vmrestore");
    fs::create_dir_all(&config_dir).expect("create config dir");
    fs::write(
        config_dir.join("config.toml"),
        r#"
version = 1

[engine]
program = "qvm-backup-restore"

[restore]
tick_ms = 50
"#,
    )
    .expect("write config");
}
