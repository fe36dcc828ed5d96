use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, ContentArrangement, Table};
use crossterm::style::Stylize;
use tracing::info;
use vmrestore_app::pump::{InteractiveContext, Interaction, ProgressView, Tone};
use vmrestore_app::{App, ensure_config_ready, summarize_selection};
use vmrestore_core::cleanup::CleanupAdvice;
use vmrestore_core::doctor::{DoctorReport, run_doctor};
use vmrestore_core::outcome::Outcome;
use vmrestore_core::time::clock_label;
use vmrestore_core::work::{BackupSource, WorkItem};

use crate::cli::{Cli, Command, RestoreArgs};

pub fn run_with_deps(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Command::Doctor) => run_doctor_command(),
        Some(Command::Restore(args)) => run_restore_command(&args),
        Some(Command::Wizard) | None => run_wizard_command(),
    }
}

fn run_wizard_command() -> Result<()> {
    let config = ensure_config_ready()?;
    let app = App::from_config(&config);

    let _ = vmrestore_tui::run_wizard(&app)?;

    Ok(())
}

fn run_doctor_command() -> Result<()> {
    let report = run_doctor();
    print_doctor_report(&report);
    Ok(())
}

fn print_doctor_report(report: &DoctorReport) {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Check", "Status", "Details"]);

    for check in &report.checks {
        table.add_row(vec![
            Cell::new(check.name.as_str()),
            Cell::new(check.state.to_string()),
            Cell::new(check.details.as_str()),
        ]);
    }

    println!("{table}");
    println!("{}", report.summary());
}

fn run_restore_command(args: &RestoreArgs) -> Result<()> {
    let config = ensure_config_ready()?;
    let app = App::from_config(&config);

    eprintln!("Type 'c' and press Enter to cancel the restore.");
    let stdout = io::stdout();
    let colored = stdout.is_terminal();
    let mut view = StdoutView::new(stdout.lock(), colored);
    let mut context = StdinContext::spawn();

    let outcome = restore_headless(&app, args, &mut view, &mut context)?;
    if outcome.is_success() {
        Ok(())
    } else {
        bail!("{outcome}")
    }
}

/// Lists, verifies and restores the requested VMs, reporting through `view` until the
/// worker publishes its outcome.
pub fn restore_headless(
    app: &App,
    args: &RestoreArgs,
    view: &mut dyn ProgressView,
    context: &mut dyn InteractiveContext,
) -> Result<Outcome> {
    let source = BackupSource {
        location: args.source.clone(),
        passphrase: read_passphrase(args)?,
        encrypted: args.encrypted || args.passphrase_file.is_some(),
        source_vm: args.source_vm.clone(),
    };
    let options = args.options(app.settings.defaults);

    let candidates = app.list_vms(&source, &options)?;
    let summary = summarize_selection(&candidates, &args.vms);
    if !summary.all_good() {
        let problems = summary
            .problems()
            .map(|row| {
                format!(
                    "{}: {}",
                    row.name,
                    row.problem.as_deref().unwrap_or("not restorable")
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        bail!("cannot restore the selected VMs: {problems}");
    }

    let work = WorkItem {
        source,
        vms: args.vms.clone(),
        options,
    };
    let mut session = app.start_restore(work)?;
    info!(vms = args.vms.len(), "headless restore started");
    let outcome = session.run_to_completion(view, context, app.settings.tick);

    match session.advice() {
        Some(CleanupAdvice::OfferRemoval { path }) => view.append_line(
            &format!("Temporary files were left in {}.", path.display()),
            Tone::Log,
        ),
        Some(advice @ CleanupAdvice::InspectManually { .. }) => {
            view.append_line(&advice.message(), Tone::Error);
        }
        _ => {}
    }

    Ok(outcome)
}

fn read_passphrase(args: &RestoreArgs) -> Result<Option<String>> {
    let Some(path) = args.passphrase_file.as_ref() else {
        return Ok(None);
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read passphrase file {}", path.display()))?;
    Ok(raw.lines().next().map(str::to_string))
}

/// Prints restore progress as timestamped lines.
pub struct StdoutView<W: Write> {
    out: W,
    colored: bool,
    last_progress: Option<i64>,
}

impl<W: Write> StdoutView<W> {
    pub fn new(out: W, colored: bool) -> Self {
        Self {
            out,
            colored,
            last_progress: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, text: &str, tone: Tone) {
        let stamp = clock_label();
        let _ = if self.colored {
            match tone {
                Tone::Log => writeln!(self.out, "[{stamp}] {text}"),
                Tone::Error => writeln!(self.out, "[{stamp}] {}", text.red()),
                Tone::Success => writeln!(self.out, "[{stamp}] {}", text.green().bold()),
            }
        } else {
            writeln!(self.out, "[{stamp}] {text}")
        };
        let _ = self.out.flush();
    }
}

impl<W: Write> ProgressView for StdoutView<W> {
    fn append_line(&mut self, text: &str, tone: Tone) {
        self.write_line(text, tone);
    }

    fn set_progress(&mut self, percent: i64) {
        if self.last_progress == Some(percent) {
            return;
        }
        self.last_progress = Some(percent);
        self.write_line(&format!("progress {percent}%"), Tone::Log);
    }

    fn set_cancel_enabled(&mut self, _enabled: bool) {}

    fn finished(&mut self, _outcome: &Outcome) {
        let _ = self.out.flush();
    }
}

/// Turns a `c` or `cancel` line on stdin into a cancel request.
pub struct StdinContext {
    lines: Receiver<String>,
}

impl StdinContext {
    pub fn spawn() -> Self {
        let (sender, receiver) = mpsc::channel();
        // Detached: the reader stays blocked on stdin until the process exits.
        let _ = thread::Builder::new()
            .name("vmrestore-stdin".to_string())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    let Ok(line) = line else {
                        break;
                    };
                    if sender.send(line).is_err() {
                        break;
                    }
                }
            });
        Self::from_receiver(receiver)
    }

    pub fn from_receiver(lines: Receiver<String>) -> Self {
        Self { lines }
    }
}

impl InteractiveContext for StdinContext {
    fn service_pending(&mut self, tick: Duration) -> Interaction {
        match self.lines.recv_timeout(tick) {
            Ok(line) if matches!(line.trim(), "c" | "cancel") => Interaction::CancelRequested,
            Ok(_) | Err(RecvTimeoutError::Timeout) => Interaction::Idle,
            Err(RecvTimeoutError::Disconnected) => {
                thread::sleep(tick);
                Interaction::Idle
            }
        }
    }
}
