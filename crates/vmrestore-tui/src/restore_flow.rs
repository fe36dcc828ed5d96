use std::path::PathBuf;

use anyhow::Result;
use crossterm::event::{Event, KeyCode, KeyEvent};
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::Color;
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Gauge, List, ListItem, ListState, Paragraph, Row, Table, TableState};
use tui_input::Input;
use tui_input::backend::crossterm::EventHandler;
use vmrestore_app::pump::{ProgressView, Tone};
use vmrestore_app::{App, RestoreSession, RestoreSummary, StartError, summarize_selection};
use vmrestore_core::cleanup::{CleanupAdvice, CleanupError, Confirmation};
use vmrestore_core::outcome::Outcome;
use vmrestore_core::work::{BackupSource, RestoreOptions, VmCandidate, WorkItem};

use crate::UiExit;
use crate::keymap;
use crate::theme;
use crate::ui::binary_choice::{BinaryChoice, BinaryChoiceEvent};
use crate::ui::loading::LoadingState;
use crate::ui::modal::{ModalTone, render_error_modal, render_message_modal};
use crate::ui::text::{
    compact_hint, focus_line, key_hint_height, key_hint_paragraph, label_value_line,
    wrapped_paragraph, yes_no,
};

pub(crate) trait RestoreFlowOps {
    fn default_options(&self) -> RestoreOptions;
    fn list_vms(&self, source: &BackupSource, options: &RestoreOptions)
    -> Result<Vec<VmCandidate>>;
    fn start_restore(&self, work: WorkItem) -> Result<RestoreSession, StartError>;
    fn apply_cleanup(
        &self,
        session: &RestoreSession,
        confirmation: Confirmation,
    ) -> Result<bool, CleanupError>;
}

impl RestoreFlowOps for App {
    fn default_options(&self) -> RestoreOptions {
        self.settings.defaults
    }

    fn list_vms(
        &self,
        source: &BackupSource,
        options: &RestoreOptions,
    ) -> Result<Vec<VmCandidate>> {
        App::list_vms(self, source, options)
    }

    fn start_restore(&self, work: WorkItem) -> Result<RestoreSession, StartError> {
        App::start_restore(self, work)
    }

    fn apply_cleanup(
        &self,
        session: &RestoreSession,
        confirmation: Confirmation,
    ) -> Result<bool, CleanupError> {
        session.apply_cleanup(confirmation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    SelectSource,
    SelectVms,
    Confirm,
    Commit,
    Cleanup,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowSignal {
    Continue,
    Exit(UiExit),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceField {
    Location,
    SourceVm,
    Passphrase,
    Encrypted,
    IgnoreMissing,
    IgnoreUsernameMismatch,
    VerifyOnly,
}

impl SourceField {
    fn label(self) -> &'static str {
        match self {
            Self::Location => "Backup location",
            Self::SourceVm => "Backup held by VM",
            Self::Passphrase => "Passphrase",
            Self::Encrypted => "Encrypted backup",
            Self::IgnoreMissing => "Use default template/netvm when missing",
            Self::IgnoreUsernameMismatch => "Ignore username mismatch",
            Self::VerifyOnly => "Verify backup only",
        }
    }

    fn is_text(self) -> bool {
        matches!(self, Self::Location | Self::SourceVm | Self::Passphrase)
    }
}

const SOURCE_FIELDS: [SourceField; 7] = [
    SourceField::Location,
    SourceField::SourceVm,
    SourceField::Passphrase,
    SourceField::Encrypted,
    SourceField::IgnoreMissing,
    SourceField::IgnoreUsernameMismatch,
    SourceField::VerifyOnly,
];

/// Restore log as shown on the commit page.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RestoreLog {
    lines: Vec<(String, Tone)>,
    progress: i64,
    cancel_enabled: bool,
    outcome: Option<Outcome>,
}

impl RestoreLog {
    fn new() -> Self {
        Self {
            lines: Vec::new(),
            progress: 0,
            cancel_enabled: true,
            outcome: None,
        }
    }

    fn gauge_percent(&self) -> u16 {
        u16::try_from(self.progress.clamp(0, 100)).unwrap_or(0)
    }
}

impl ProgressView for RestoreLog {
    fn append_line(&mut self, text: &str, tone: Tone) {
        self.lines.push((text.to_string(), tone));
    }

    fn set_progress(&mut self, percent: i64) {
        self.progress = percent;
    }

    fn set_cancel_enabled(&mut self, enabled: bool) {
        self.cancel_enabled = enabled;
    }

    fn finished(&mut self, outcome: &Outcome) {
        self.outcome = Some(outcome.clone());
    }
}

struct RestoreFlow {
    step: Step,
    location: Input,
    source_vm: Input,
    passphrase: Input,
    encrypted: bool,
    options: RestoreOptions,
    field_selected: usize,
    candidates: Vec<VmCandidate>,
    checked: Vec<bool>,
    vm_selected: usize,
    summary: Option<RestoreSummary>,
    confirm: BinaryChoice,
    session: Option<RestoreSession>,
    log: RestoreLog,
    loading: LoadingState,
    advice: Option<CleanupAdvice>,
    cleanup_choice: BinaryChoice,
    finish_message: Option<String>,
    error_message: Option<String>,
}

pub(crate) struct RestoreScreen {
    flow: RestoreFlow,
}

impl RestoreScreen {
    pub(crate) fn new(app: &App) -> Self {
        Self {
            flow: RestoreFlow::new(app),
        }
    }

    pub(crate) fn render(&self, frame: &mut Frame<'_>) {
        self.flow.render(frame);
    }

    pub(crate) fn on_key(&mut self, key: KeyEvent, app: &App) -> Result<Option<UiExit>> {
        match self.flow.on_key(key, app)? {
            FlowSignal::Continue => Ok(None),
            FlowSignal::Exit(exit) => Ok(Some(exit)),
        }
    }

    pub(crate) fn on_tick(&mut self) {
        self.flow.on_tick();
    }

    pub(crate) fn is_restoring(&self) -> bool {
        self.flow.is_restoring()
    }

    pub(crate) fn cancel_restore(&mut self) -> bool {
        self.flow.cancel_restore()
    }
}

impl RestoreFlow {
    fn new(ops: &dyn RestoreFlowOps) -> Self {
        Self {
            step: Step::SelectSource,
            location: Input::default(),
            source_vm: Input::default(),
            passphrase: Input::default(),
            encrypted: false,
            options: ops.default_options(),
            field_selected: 0,
            candidates: Vec::new(),
            checked: Vec::new(),
            vm_selected: 0,
            summary: None,
            confirm: BinaryChoice::new(false),
            session: None,
            log: RestoreLog::new(),
            loading: LoadingState::default(),
            advice: None,
            cleanup_choice: BinaryChoice::new(false),
            finish_message: None,
            error_message: None,
        }
    }

    fn is_restoring(&self) -> bool {
        self.step == Step::Commit
    }

    fn on_key(&mut self, key: KeyEvent, ops: &dyn RestoreFlowOps) -> Result<FlowSignal> {
        if self.error_message.is_some() {
            if keymap::is_confirm(key) || keymap::is_back(key) {
                self.error_message = None;
            }
            return Ok(FlowSignal::Continue);
        }

        match self.step {
            Step::SelectSource => Ok(self.on_key_source(key, ops)),
            Step::SelectVms => Ok(self.on_key_vms(key)),
            Step::Confirm => Ok(self.on_key_confirm(key, ops)),
            Step::Commit => {
                if keymap::is_cancel_restore(key) {
                    self.cancel_restore();
                }
                Ok(FlowSignal::Continue)
            }
            Step::Cleanup => Ok(self.on_key_cleanup(key, ops)),
            Step::Finished => Ok(self.on_key_finished(key)),
        }
    }

    fn on_key_source(&mut self, key: KeyEvent, ops: &dyn RestoreFlowOps) -> FlowSignal {
        if keymap::is_back(key) {
            return FlowSignal::Exit(UiExit::Canceled);
        }
        if keymap::is_up(key) {
            self.field_selected = self.field_selected.saturating_sub(1);
            return FlowSignal::Continue;
        }
        if keymap::is_down(key) {
            if self.field_selected + 1 < SOURCE_FIELDS.len() {
                self.field_selected += 1;
            }
            return FlowSignal::Continue;
        }
        if keymap::is_confirm(key) {
            self.load_vms(ops);
            return FlowSignal::Continue;
        }

        let field = SOURCE_FIELDS[self.field_selected];
        if field.is_text() {
            let event = Event::Key(key);
            let _ = match field {
                SourceField::Location => self.location.handle_event(&event),
                SourceField::SourceVm => self.source_vm.handle_event(&event),
                _ => self.passphrase.handle_event(&event),
            };
        } else if keymap::is_toggle(key) {
            self.toggle_field(field);
        }
        FlowSignal::Continue
    }

    fn toggle_field(&mut self, field: SourceField) {
        match field {
            SourceField::Encrypted => self.encrypted = !self.encrypted,
            SourceField::IgnoreMissing => {
                let next = !self.options.ignore_missing();
                self.options.set_ignore_missing(next);
            }
            SourceField::IgnoreUsernameMismatch => {
                self.options.ignore_username_mismatch = !self.options.ignore_username_mismatch;
            }
            SourceField::VerifyOnly => self.options.verify_only = !self.options.verify_only,
            SourceField::Location | SourceField::SourceVm | SourceField::Passphrase => {}
        }
    }

    fn backup_source(&self) -> BackupSource {
        let non_empty = |input: &Input| {
            let value = input.value().trim();
            (!value.is_empty()).then(|| value.to_string())
        };
        BackupSource {
            location: PathBuf::from(self.location.value().trim()),
            passphrase: (!self.passphrase.value().is_empty())
                .then(|| self.passphrase.value().to_string()),
            encrypted: self.encrypted,
            source_vm: non_empty(&self.source_vm),
        }
    }

    fn load_vms(&mut self, ops: &dyn RestoreFlowOps) {
        let source = self.backup_source();
        match ops.list_vms(&source, &self.options) {
            Ok(candidates) if candidates.is_empty() => {
                self.error_message = Some("The backup does not contain any VMs.".to_string());
            }
            Ok(candidates) => {
                self.checked = vec![true; candidates.len()];
                self.candidates = candidates;
                self.vm_selected = 0;
                self.step = Step::SelectVms;
            }
            Err(error) => {
                self.error_message = Some(format!("ERROR: {error:#}"));
            }
        }
    }

    fn on_key_vms(&mut self, key: KeyEvent) -> FlowSignal {
        if keymap::is_back(key) {
            self.step = Step::SelectSource;
        } else if keymap::is_list_up(key) {
            self.vm_selected = self.vm_selected.saturating_sub(1);
        } else if keymap::is_list_down(key) {
            if self.vm_selected + 1 < self.candidates.len() {
                self.vm_selected += 1;
            }
        } else if keymap::is_toggle(key) {
            if let Some(value) = self.checked.get_mut(self.vm_selected) {
                *value = !*value;
            }
        } else if key.code == KeyCode::Char('a') {
            let next = !self.checked.iter().all(|value| *value);
            self.checked.iter_mut().for_each(|value| *value = next);
        } else if keymap::is_confirm(key) {
            let selected = self.selected_vm_names();
            if selected.is_empty() {
                self.error_message = Some("Select at least one VM to restore.".to_string());
            } else {
                self.summary = Some(summarize_selection(&self.candidates, &selected));
                self.confirm = BinaryChoice::new(false);
                self.step = Step::Confirm;
            }
        }
        FlowSignal::Continue
    }

    fn selected_vm_names(&self) -> Vec<String> {
        self.candidates
            .iter()
            .zip(&self.checked)
            .filter(|(_, checked)| **checked)
            .map(|(candidate, _)| candidate.name.clone())
            .collect()
    }

    fn confirm_allowed(&self) -> bool {
        self.summary
            .as_ref()
            .is_some_and(RestoreSummary::all_good)
    }

    fn on_key_confirm(&mut self, key: KeyEvent, ops: &dyn RestoreFlowOps) -> FlowSignal {
        if !self.confirm_allowed() {
            if keymap::is_back(key) {
                self.step = Step::SelectVms;
            }
            return FlowSignal::Continue;
        }

        match self.confirm.on_key(key) {
            BinaryChoiceEvent::Continue => {}
            BinaryChoiceEvent::ConfirmYes => self.start_restore(ops),
            BinaryChoiceEvent::ConfirmNo | BinaryChoiceEvent::Back => {
                self.step = Step::SelectVms;
            }
        }
        FlowSignal::Continue
    }

    fn start_restore(&mut self, ops: &dyn RestoreFlowOps) {
        let work = WorkItem {
            source: self.backup_source(),
            vms: self.selected_vm_names(),
            options: self.options,
        };

        match ops.start_restore(work) {
            Ok(session) => {
                self.session = Some(session);
                self.log = RestoreLog::new();
                self.advice = None;
                self.finish_message = None;
                self.step = Step::Commit;
            }
            Err(error) => {
                self.error_message = Some(format!("ERROR: {error}"));
            }
        }
    }

    fn cancel_restore(&mut self) -> bool {
        if self.step != Step::Commit {
            return false;
        }
        match self.session.as_mut() {
            Some(session) => session.request_cancel(&mut self.log),
            None => false,
        }
    }

    fn on_tick(&mut self) {
        if self.step != Step::Commit {
            return;
        }
        self.loading.next_frame();

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.tick(&mut self.log).is_none() {
            return;
        }

        let advice = session.advice();
        self.step = if advice
            .as_ref()
            .is_some_and(|advice| advice.removal_path().is_some())
        {
            self.cleanup_choice = BinaryChoice::new(false);
            Step::Cleanup
        } else {
            Step::Finished
        };
        self.advice = advice;
    }

    fn on_key_cleanup(&mut self, key: KeyEvent, ops: &dyn RestoreFlowOps) -> FlowSignal {
        let confirmation = match self.cleanup_choice.on_key(key) {
            BinaryChoiceEvent::Continue => return FlowSignal::Continue,
            BinaryChoiceEvent::ConfirmYes => Confirmation::Yes,
            BinaryChoiceEvent::ConfirmNo | BinaryChoiceEvent::Back => Confirmation::No,
        };

        let path = self
            .advice
            .as_ref()
            .and_then(CleanupAdvice::removal_path)
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        let result = match self.session.as_ref() {
            Some(session) => ops.apply_cleanup(session, confirmation),
            None => Ok(false),
        };

        self.finish_message = Some(match result {
            Ok(true) => format!("Removed temporary files from {path}."),
            Ok(false) => format!("Temporary files were left in {path}."),
            Err(error) => {
                self.error_message = Some(format!("ERROR: {error}"));
                format!("Temporary files were left in {path}.")
            }
        });
        self.step = Step::Finished;
        FlowSignal::Continue
    }

    fn on_key_finished(&mut self, key: KeyEvent) -> FlowSignal {
        if keymap::is_confirm(key) || keymap::is_back(key) {
            return FlowSignal::Exit(UiExit::Completed);
        }
        if key.code == KeyCode::Char('r') && !self.succeeded() {
            self.session = None;
            self.advice = None;
            self.finish_message = None;
            self.confirm = BinaryChoice::new(false);
            self.step = Step::Confirm;
        }
        FlowSignal::Continue
    }

    fn succeeded(&self) -> bool {
        self.log.outcome.as_ref().is_some_and(Outcome::is_success)
    }

    fn render(&self, frame: &mut Frame<'_>) {
        match self.step {
            Step::SelectSource => self.render_source(frame),
            Step::SelectVms => self.render_vms(frame),
            Step::Confirm => self.render_confirm(frame),
            Step::Commit | Step::Cleanup | Step::Finished => self.render_commit(frame),
        }

        match self.step {
            Step::Cleanup => self.render_cleanup_modal(frame),
            Step::Finished => self.render_finished_modal(frame),
            _ => {}
        }

        if let Some(message) = self.error_message.as_deref() {
            render_error_modal(frame, message, "Enter/Esc: continue");
        }
    }

    fn page_layout(frame: &Frame<'_>, key_text: &str) -> [Rect; 3] {
        let area = frame.area();
        Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(6),
                Constraint::Length(key_hint_height(area.width, key_text)),
            ])
            .areas(area)
    }

    fn render_source(&self, frame: &mut Frame<'_>) {
        let key_text = compact_hint(
            frame.area().width,
            "Enter: list VMs    Up/Down or Tab: move    Space: toggle option    Esc: quit",
            "Enter: list | Tab: move | Space: toggle | Esc: quit",
        );
        let [header, body, footer] = Self::page_layout(frame, key_text);

        frame.render_widget(
            wrapped_paragraph(focus_line("Choose the backup to restore from"))
                .block(theme::chrome("Restore VMs: backup source")),
            header,
        );

        let items: Vec<ListItem<'_>> = SOURCE_FIELDS
            .iter()
            .map(|field| ListItem::new(label_value_line(field.label(), self.field_value(*field))))
            .collect();
        let list = List::new(items)
            .block(theme::chrome("Source and options"))
            .highlight_style(theme::table_highlight(Color::Cyan))
            .highlight_symbol(">> ");
        let mut state = ListState::default();
        state.select(Some(self.field_selected));
        frame.render_stateful_widget(list, body, &mut state);

        frame.render_widget(
            key_hint_paragraph(key_text).block(theme::key_block()),
            footer,
        );
    }

    fn field_value(&self, field: SourceField) -> String {
        match field {
            SourceField::Location => self.location.value().to_string(),
            SourceField::SourceVm => {
                let value = self.source_vm.value();
                if value.is_empty() {
                    "(local)".to_string()
                } else {
                    value.to_string()
                }
            }
            SourceField::Passphrase => "*".repeat(self.passphrase.value().chars().count()),
            SourceField::Encrypted => yes_no(self.encrypted).to_string(),
            SourceField::IgnoreMissing => yes_no(self.options.ignore_missing()).to_string(),
            SourceField::IgnoreUsernameMismatch => {
                yes_no(self.options.ignore_username_mismatch).to_string()
            }
            SourceField::VerifyOnly => yes_no(self.options.verify_only).to_string(),
        }
    }

    fn render_vms(&self, frame: &mut Frame<'_>) {
        let key_text = compact_hint(
            frame.area().width,
            "Space: toggle VM    a: toggle all    Enter: continue    Up/Down or j/k: move    Esc: back",
            "Space: toggle | a: all | Enter: next | Esc: back",
        );
        let [header, body, footer] = Self::page_layout(frame, key_text);

        let selected = self.checked.iter().filter(|value| **value).count();
        frame.render_widget(
            wrapped_paragraph(focus_line(format!(
                "Select the VMs to restore ({selected} of {} selected)",
                self.candidates.len()
            )))
            .block(theme::chrome("Restore VMs: select VMs")),
            header,
        );

        let items: Vec<ListItem<'_>> = self
            .candidates
            .iter()
            .zip(&self.checked)
            .map(|(candidate, checked)| {
                let mark = if *checked { "[x]" } else { "[ ]" };
                let mut spans = vec![Span::raw(format!("{mark} {}", candidate.name))];
                if let Some(problem) = candidate.problem.as_deref() {
                    spans.push(Span::styled(
                        format!("  ({problem})"),
                        theme::error_prompt(),
                    ));
                }
                ListItem::new(Line::from(spans))
            })
            .collect();
        let list = List::new(items)
            .block(theme::chrome("VMs in backup"))
            .highlight_style(theme::table_highlight(Color::Cyan));
        let mut state = ListState::default();
        state.select(Some(self.vm_selected));
        frame.render_stateful_widget(list, body, &mut state);

        frame.render_widget(
            key_hint_paragraph(key_text).block(theme::key_block()),
            footer,
        );
    }

    fn render_confirm(&self, frame: &mut Frame<'_>) {
        let allowed = self.confirm_allowed();
        let key_text = if allowed {
            "y/n or Space: choose    Enter: confirm    Esc: back"
        } else {
            "Esc: back to VM selection"
        };
        let [header, body, footer] = Self::page_layout(frame, key_text);

        let prompt = if allowed {
            focus_line(format!(
                "Start restore? {}",
                self.confirm.selected_label()
            ))
        } else {
            Line::from(Span::styled(
                "Some selected VMs cannot be restored. Adjust the selection or options.",
                theme::error_prompt(),
            ))
        };
        frame.render_widget(
            wrapped_paragraph(prompt).block(theme::chrome("Restore VMs: confirm")),
            header,
        );

        let rows = self
            .summary
            .iter()
            .flat_map(|summary| summary.rows.iter())
            .map(|row| {
                let status = if row.good_to_go { "OK" } else { "Problem" };
                Row::new(vec![
                    row.name.clone(),
                    status.to_string(),
                    row.problem.clone().unwrap_or_default(),
                ])
            });
        let table = Table::new(
            rows,
            [
                Constraint::Length(28),
                Constraint::Length(10),
                Constraint::Min(20),
            ],
        )
        .header(Row::new(["Name", "Status", "Details"]).style(theme::table_header(Color::Cyan)))
        .block(theme::chrome("Summary"));
        frame.render_stateful_widget(table, body, &mut TableState::new());

        frame.render_widget(
            key_hint_paragraph(key_text).block(theme::key_block()),
            footer,
        );
    }

    fn render_commit(&self, frame: &mut Frame<'_>) {
        let key_text = if self.log.cancel_enabled && self.step == Step::Commit {
            "c/Esc: cancel restore"
        } else {
            "Waiting for the restore to stop..."
        };
        let area = frame.area();
        let [header, gauge_area, body, footer] = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Min(4),
                Constraint::Length(key_hint_height(area.width, key_text)),
            ])
            .areas(area);

        let status = match &self.log.outcome {
            Some(outcome) => Line::from(Span::styled(
                outcome.banner(),
                if outcome.is_success() {
                    theme::success_prompt()
                } else {
                    theme::error_prompt()
                },
            )),
            None => focus_line(self.loading.label("Restoring VMs...")),
        };
        frame.render_widget(
            wrapped_paragraph(status).block(theme::chrome("Restore VMs: progress")),
            header,
        );

        frame.render_widget(
            Gauge::default()
                .block(theme::chrome("Progress"))
                .gauge_style(theme::success_prompt())
                .percent(self.log.gauge_percent()),
            gauge_area,
        );

        let visible = usize::from(body.height.saturating_sub(2));
        let skip = self.log.lines.len().saturating_sub(visible);
        let lines: Vec<Line<'_>> = self.log.lines[skip..]
            .iter()
            .map(|(text, tone)| Line::from(Span::styled(text.as_str(), theme::tone(*tone))))
            .collect();
        frame.render_widget(
            Paragraph::new(Text::from(lines)).block(theme::chrome("Log")),
            body,
        );

        if self.step == Step::Commit {
            frame.render_widget(
                key_hint_paragraph(key_text).block(theme::key_block()),
                footer,
            );
        }
    }

    fn render_cleanup_modal(&self, frame: &mut Frame<'_>) {
        let Some(advice) = self.advice.as_ref() else {
            return;
        };
        let message = format!(
            "{}\n\nRemove: {}",
            advice.message(),
            self.cleanup_choice.selected_label()
        );
        render_message_modal(
            frame,
            advice.title(),
            &message,
            ModalTone::Notice,
            "y/n or Space: choose    Enter: confirm",
        );
    }

    fn render_finished_modal(&self, frame: &mut Frame<'_>) {
        let Some(advice) = self.advice.as_ref() else {
            return;
        };
        let mut message = match advice {
            CleanupAdvice::OfferRemoval { .. } => advice.title().to_string(),
            _ => advice.message(),
        };
        if let Some(extra) = self.finish_message.as_deref() {
            message.push_str("\n\n");
            message.push_str(extra);
        }

        let (tone, footer) = if self.succeeded() {
            (ModalTone::Success, "Enter/Esc: finish")
        } else if matches!(advice, CleanupAdvice::InspectManually { .. }) {
            (ModalTone::Error, "Enter/Esc: finish    r: back to confirm")
        } else {
            (ModalTone::Notice, "Enter/Esc: finish    r: back to confirm")
        };
        render_message_modal(frame, advice.title(), &message, tone, footer);
    }
}
