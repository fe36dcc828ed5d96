use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::command_runner::{CommandRunner, SystemCommandRunner};
use crate::engine::{EngineError, EngineHooks, RestoreEngine};
use crate::work::{BackupSource, RestoreOptions, VmCandidate, WorkItem};

pub const SCRATCH_DIR_ENV: &str = "VMRESTORE_SCRATCH_DIR";
pub const PASSPHRASE_ENV: &str = "VMRESTORE_PASSPHRASE";

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const OUTPUT_GRACE: Duration = Duration::from_secs(1);
const INTERNAL_ENTRY_PREFIX: char = '$';

enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Restore engine backed by an external restore command.
///
/// stdout lines become log lines (`progress <N>` lines become progress updates),
/// stderr lines become error lines. Each run gets its own scratch directory under
/// `scratch_dir`, exported to the command as `VMRESTORE_SCRATCH_DIR`.
pub struct ProcessEngine {
    program: String,
    base_args: Vec<String>,
    scratch_dir: PathBuf,
    runner: Box<dyn CommandRunner>,
}

impl ProcessEngine {
    pub fn new(program: impl Into<String>, base_args: Vec<String>, scratch_dir: PathBuf) -> Self {
        Self::with_runner(
            program,
            base_args,
            scratch_dir,
            Box::new(SystemCommandRunner::new()),
        )
    }

    pub fn with_runner(
        program: impl Into<String>,
        base_args: Vec<String>,
        scratch_dir: PathBuf,
        runner: Box<dyn CommandRunner>,
    ) -> Self {
        Self {
            program: program.into(),
            base_args,
            scratch_dir,
            runner,
        }
    }

    fn source_args(&self, source: &BackupSource, options: &RestoreOptions) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.extend(options.to_flags().into_iter().map(str::to_string));
        if let Some(vm) = &source.source_vm {
            args.push("--appvm".to_string());
            args.push(vm.clone());
        }
        if source.encrypted {
            args.push("--encrypted".to_string());
        }
        args
    }

    fn create_run_scratch_dir(&self) -> Result<PathBuf, EngineError> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let path = self.scratch_dir.join(format!("restore_{millis}"));
        fs::create_dir_all(&path).map_err(|error| {
            EngineError::failed(format!(
                "failed to create scratch directory {}: {error}",
                path.display()
            ))
        })?;
        Ok(path)
    }

    fn spawn_child(&self, work: &WorkItem, scratch: &Path) -> Result<Child, EngineError> {
        let mut args = self.source_args(&work.source, &work.options);
        args.push(work.source.location.to_string_lossy().to_string());
        args.extend(work.vms.iter().cloned());

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .env(SCRATCH_DIR_ENV, scratch)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(passphrase) = &work.source.passphrase {
            command.env(PASSPHRASE_ENV, passphrase);
        }

        command.spawn().map_err(|error| {
            EngineError::failed(format!(
                "failed to start restore command '{}': {error}",
                self.program
            ))
        })
    }
}

impl RestoreEngine for ProcessEngine {
    fn inventory(
        &self,
        source: &BackupSource,
        options: &RestoreOptions,
    ) -> Result<Vec<VmCandidate>, EngineError> {
        let mut args = self.source_args(source, options);
        args.push("--list".to_string());
        args.push(source.location.to_string_lossy().to_string());

        let mut env = Vec::new();
        if let Some(passphrase) = source.passphrase.as_deref() {
            env.push((PASSPHRASE_ENV, passphrase));
        }

        let output = self
            .runner
            .run(&self.program, &args, &env)
            .map_err(|error| {
                EngineError::failed(format!(
                    "failed to run restore command '{}': {error:#}",
                    self.program
                ))
            })?;

        if output.status_code != 0 {
            let stderr = output.stderr.trim();
            let message = if stderr.is_empty() {
                format!("backup listing failed with exit code {}", output.status_code)
            } else {
                stderr.to_string()
            };
            return Err(EngineError::failed(message));
        }

        Ok(parse_inventory(&output.stdout))
    }

    fn perform(&self, work: &WorkItem, hooks: &mut dyn EngineHooks) -> Result<(), EngineError> {
        let scratch = self.create_run_scratch_dir()?;
        let mut child = match self.spawn_child(work, &scratch) {
            Ok(child) => child,
            Err(error) => {
                let _ = fs::remove_dir(&scratch);
                return Err(error);
            }
        };
        info!(program = %self.program, pid = child.id(), "restore command started");

        let (sender, receiver) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, sender.clone(), OutputLine::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, sender.clone(), OutputLine::Stderr);
        }
        drop(sender);

        let mut killed = false;
        let mut exited: Option<(ExitStatus, Instant)> = None;
        loop {
            if exited.is_none() {
                match child.try_wait() {
                    Ok(Some(status)) => exited = Some((status, Instant::now())),
                    Ok(None) => {}
                    Err(error) => warn!(%error, "failed to poll restore command"),
                }
            }

            // A command that already exited keeps its own result.
            if !killed && exited.is_none() && hooks.cancel_requested() {
                debug!("cancel requested, stopping restore command");
                killed = child.kill().is_ok();
            }

            match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(OutputLine::Stdout(line)) => dispatch_stdout(&line, hooks),
                Ok(OutputLine::Stderr(line)) => hooks.on_error(&line),
                Err(RecvTimeoutError::Timeout) => {
                    // Grandchildren may keep the pipes open after the command exits.
                    if let Some((_, at)) = exited
                        && at.elapsed() >= OUTPUT_GRACE
                    {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let status = match exited {
            Some((status, _)) => status,
            None => child.wait().map_err(|error| {
                EngineError::failed(format!("failed to wait for restore command: {error}"))
            })?,
        };

        // The command may exit on its own between the last poll and the kill.
        if killed && !status.success() && status.code().is_none() {
            let cleanup_path = scratch.exists().then_some(scratch);
            return Err(EngineError::Canceled { cleanup_path });
        }

        if !status.success() {
            return Err(EngineError::failed(match status.code() {
                Some(code) => format!("restore command exited with status {code}"),
                None => "restore command was terminated by a signal".to_string(),
            }));
        }

        // Only succeeds when the command left nothing behind.
        let _ = fs::remove_dir(&scratch);
        Ok(())
    }
}

fn forward_lines<R>(stream: R, sender: Sender<OutputLine>, wrap: fn(String) -> OutputLine)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        let mut forwarding = true;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => {
                    warn!(%error, "failed to read restore command output");
                    break;
                }
            }
            // Keep reading after the receiver is gone so the command never hits a closed pipe.
            if forwarding && sender.send(wrap(decode_line(&buf))).is_err() {
                forwarding = false;
            }
        }
    });
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

fn dispatch_stdout(line: &str, hooks: &mut dyn EngineHooks) {
    match parse_progress_line(line) {
        Some(percent) => hooks.on_progress(percent),
        None => hooks.on_log(line),
    }
}

/// Accepts `progress 42`, `progress: 42` and `progress 42%`.
pub fn parse_progress_line(line: &str) -> Option<i64> {
    let rest = line.trim().strip_prefix("progress")?;
    let value = rest.trim_start_matches(':').trim().trim_end_matches('%');
    value.parse().ok()
}

/// Parses `<name>\t<status>` lines; `ok` marks a VM that can be restored as-is.
pub fn parse_inventory(stdout: &str) -> Vec<VmCandidate> {
    stdout
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let (name, status) = match line.split_once('\t') {
                Some((name, status)) => (name.trim(), status.trim()),
                None => (line.trim(), "ok"),
            };
            if name.starts_with(INTERNAL_ENTRY_PREFIX) {
                return None;
            }
            let good_to_go = status.eq_ignore_ascii_case("ok");
            Some(VmCandidate {
                name: name.to_string(),
                good_to_go,
                problem: (!good_to_go).then(|| status.to_string()),
            })
        })
        .collect()
}
