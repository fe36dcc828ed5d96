mod keymap;
mod restore_flow;
mod theme;
mod ui;

use std::io::{Stdout, stdout};

use anyhow::{Context, Result, anyhow};
use crossterm::cursor::{Hide, Show};
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use restore_flow::RestoreScreen;
use tracing::{debug, info};
use vmrestore_app::App;

use crate::ui::modal::render_error_modal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiExit {
    Completed,
    Canceled,
}

pub(crate) struct TerminalSession {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalSession {
    pub(crate) fn enter() -> Result<Self> {
        let terminal = enter_with_ops(
            || enable_raw_mode().context("failed to enable raw mode"),
            || {
                let mut out = stdout();
                execute!(out, EnterAlternateScreen, Hide)
                    .context("failed to enter alternate screen")
            },
            || {
                let backend = CrosstermBackend::new(stdout());
                Terminal::new(backend).context("failed to create terminal backend")
            },
            || {
                let mut out = stdout();
                execute!(out, Show, LeaveAlternateScreen)
                    .context("failed to restore terminal screen during rollback")
            },
            || disable_raw_mode().context("failed to disable raw mode during rollback"),
        )?;
        Ok(Self { terminal })
    }

    pub(crate) fn draw<F>(&mut self, draw_fn: F) -> Result<()>
    where
        F: FnOnce(&mut ratatui::Frame<'_>),
    {
        self.terminal
            .draw(draw_fn)
            .context("failed to render terminal")?;
        Ok(())
    }

    pub(crate) fn autoresize(&mut self) -> Result<()> {
        self.terminal
            .autoresize()
            .context("failed to autoresize terminal")?;
        Ok(())
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let _ = execute!(self.terminal.backend_mut(), Show, LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
}

fn enter_with_ops<T, EnableRawMode, EnterAltScreen, CreateTerminal, LeaveAltScreen, DisableRawMode>(
    mut enable_raw_mode_op: EnableRawMode,
    mut enter_alt_screen_op: EnterAltScreen,
    mut create_terminal_op: CreateTerminal,
    mut leave_alt_screen_op: LeaveAltScreen,
    mut disable_raw_mode_op: DisableRawMode,
) -> Result<T>
where
    EnableRawMode: FnMut() -> Result<()>,
    EnterAltScreen: FnMut() -> Result<()>,
    CreateTerminal: FnMut() -> Result<T>,
    LeaveAltScreen: FnMut() -> Result<()>,
    DisableRawMode: FnMut() -> Result<()>,
{
    enable_raw_mode_op()?;

    if let Err(error) = enter_alt_screen_op() {
        return Err(failure_with_rollback(
            error,
            false,
            &mut leave_alt_screen_op,
            &mut disable_raw_mode_op,
        ));
    }

    create_terminal_op().map_err(|error| {
        failure_with_rollback(error, true, &mut leave_alt_screen_op, &mut disable_raw_mode_op)
    })
}

/// Undoes a partial terminal setup in reverse order. Raw mode is always on by the time this runs.
fn failure_with_rollback<LeaveAltScreen, DisableRawMode>(
    setup_error: anyhow::Error,
    alt_screen_entered: bool,
    leave_alt_screen_op: &mut LeaveAltScreen,
    disable_raw_mode_op: &mut DisableRawMode,
) -> anyhow::Error
where
    LeaveAltScreen: FnMut() -> Result<()>,
    DisableRawMode: FnMut() -> Result<()>,
{
    let mut cleanup_failures = Vec::<String>::new();

    if alt_screen_entered && let Err(error) = leave_alt_screen_op() {
        cleanup_failures.push(format!(
            "failed to restore alternate screen during rollback: {error:#}"
        ));
    }

    if let Err(error) = disable_raw_mode_op() {
        cleanup_failures.push(format!(
            "failed to disable raw mode during rollback: {error:#}"
        ));
    }

    if cleanup_failures.is_empty() {
        setup_error
    } else {
        anyhow!(
            "{setup_error:#}\nterminal rollback cleanup failed: {}",
            cleanup_failures.join("\n")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickReason {
    Timeout,
    AfterInput,
}

trait TickTarget {
    fn on_tick(&mut self);
    fn should_tick_after_input(&self) -> bool;
}

impl TickTarget for RestoreScreen {
    fn on_tick(&mut self) {
        RestoreScreen::on_tick(self);
    }

    fn should_tick_after_input(&self) -> bool {
        self.is_restoring()
    }
}

/// Drains restore progress on every poll timeout, and after input while a restore runs
/// so that key repeat cannot starve the log.
fn tick_helper<T: TickTarget>(target: &mut T, reason: TickReason) -> bool {
    if reason == TickReason::AfterInput && !target.should_tick_after_input() {
        return false;
    }

    target.on_tick();
    true
}

/// Runs the interactive restore wizard until the user finishes or quits.
pub fn run_wizard(app: &App) -> Result<UiExit> {
    let mut session = TerminalSession::enter()?;
    let mut screen = RestoreScreen::new(app);
    let mut global_error: Option<String> = None;
    let tick = app.settings.tick;
    info!(tick_ms = tick.as_millis() as u64, "restore wizard started");

    loop {
        session.draw(|frame| {
            screen.render(frame);

            if let Some(message) = global_error.as_deref() {
                render_global_error(frame, message);
            }
        })?;

        let has_event = event::poll(tick).context("failed to poll terminal event")?;
        if !has_event {
            tick_helper(&mut screen, TickReason::Timeout);
            continue;
        }

        let event = event::read().context("failed to read terminal event")?;
        let key = match event {
            Event::Resize(_, _) => {
                session.autoresize()?;
                continue;
            }
            Event::Key(key) if matches!(key.kind, KeyEventKind::Press) => key,
            _ => continue,
        };

        if keymap::is_ctrl_c(key) {
            if screen.is_restoring() {
                debug!("ctrl-c while restoring; requesting cancel");
                screen.cancel_restore();
                tick_helper(&mut screen, TickReason::AfterInput);
                continue;
            }
            info!("restore wizard canceled");
            return Ok(UiExit::Canceled);
        }

        if global_error.is_some() {
            if keymap::is_confirm(key) || keymap::is_back(key) {
                global_error = None;
            }
            continue;
        }

        match screen.on_key(key, app) {
            Ok(Some(exit)) => {
                info!(?exit, "restore wizard finished");
                return Ok(exit);
            }
            Ok(None) => {}
            Err(error) => global_error = Some(format!("{error:#}")),
        }

        tick_helper(&mut screen, TickReason::AfterInput);
    }
}

fn render_global_error(frame: &mut ratatui::Frame<'_>, message: &str) {
    let text = format!("Operation failed.\n\n{message}");
    render_error_modal(frame, &text, "Enter/Esc: continue");
}

pub(crate) fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let pct_x = percent_x.min(100);
    let pct_y = percent_y.min(100);

    let [_, vertical, _] = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - pct_y) / 2),
            Constraint::Percentage(pct_y),
            Constraint::Percentage((100 - pct_y) / 2),
        ])
        .areas(area);
    let [_, horizontal, _] = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - pct_x) / 2),
            Constraint::Percentage(pct_x),
            Constraint::Percentage((100 - pct_x) / 2),
        ])
        .areas(vertical);
    horizontal
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use anyhow::anyhow;
    use ratatui::layout::Rect;

    use super::{TickReason, TickTarget, centered_rect, enter_with_ops, tick_helper};

    struct TickProbe {
        ticks: usize,
        restoring: bool,
    }

    impl TickTarget for TickProbe {
        fn on_tick(&mut self) {
            self.ticks += 1;
        }

        fn should_tick_after_input(&self) -> bool {
            self.restoring
        }
    }

    #[test]
    fn centered_rect_returns_middle_segment() {
        let area = Rect::new(0, 0, 100, 50);
        let centered = centered_rect(80, 60, area);

        assert_eq!(centered, Rect::new(10, 10, 80, 30));
    }

    #[test]
    fn centered_rect_clamps_percentages_over_100() {
        let area = Rect::new(3, 4, 40, 20);
        assert_eq!(centered_rect(120, 150, area), area);
    }

    #[test]
    fn timeout_always_ticks() {
        let mut probe = TickProbe {
            ticks: 0,
            restoring: false,
        };
        assert!(tick_helper(&mut probe, TickReason::Timeout));
        assert_eq!(probe.ticks, 1);
    }

    #[test]
    fn input_ticks_only_while_restoring() {
        let mut idle = TickProbe {
            ticks: 0,
            restoring: false,
        };
        assert!(!tick_helper(&mut idle, TickReason::AfterInput));
        assert_eq!(idle.ticks, 0);

        let mut busy = TickProbe {
            ticks: 0,
            restoring: true,
        };
        for _ in 0..20 {
            tick_helper(&mut busy, TickReason::AfterInput);
        }
        assert_eq!(busy.ticks, 20);
    }

    #[test]
    fn enter_with_ops_rolls_back_raw_mode_when_alt_screen_step_fails() {
        let calls = RefCell::new(Vec::<&'static str>::new());

        let error = enter_with_ops(
            || {
                calls.borrow_mut().push("enable_raw_mode");
                Ok(())
            },
            || {
                calls.borrow_mut().push("enter_alt_screen");
                Err(anyhow!("enter alt failed"))
            },
            || {
                calls.borrow_mut().push("create_terminal");
                Ok(())
            },
            || {
                calls.borrow_mut().push("leave_alt_screen");
                Ok(())
            },
            || {
                calls.borrow_mut().push("disable_raw_mode");
                Ok(())
            },
        )
        .expect_err("enter should fail");

        assert_eq!(
            calls.into_inner(),
            vec!["enable_raw_mode", "enter_alt_screen", "disable_raw_mode"]
        );
        assert!(format!("{error:#}").contains("enter alt failed"));
    }

    #[test]
    fn enter_with_ops_reports_every_failed_cleanup_step() {
        let calls = RefCell::new(Vec::<&'static str>::new());

        let error = enter_with_ops(
            || {
                calls.borrow_mut().push("enable_raw_mode");
                Ok(())
            },
            || {
                calls.borrow_mut().push("enter_alt_screen");
                Ok(())
            },
            || {
                calls.borrow_mut().push("create_terminal");
                Err::<(), _>(anyhow!("create terminal failed"))
            },
            || {
                calls.borrow_mut().push("leave_alt_screen");
                Err(anyhow!("leave alt failed"))
            },
            || {
                calls.borrow_mut().push("disable_raw_mode");
                Err(anyhow!("disable raw failed"))
            },
        )
        .expect_err("enter should fail");

        assert_eq!(
            calls.into_inner(),
            vec![
                "enable_raw_mode",
                "enter_alt_screen",
                "create_terminal",
                "leave_alt_screen",
                "disable_raw_mode",
            ]
        );
        let message = format!("{error:#}");
        assert!(message.contains("create terminal failed"));
        assert!(message.contains("leave alt failed"));
        assert!(message.contains("disable raw failed"));
    }

    #[test]
    fn enter_with_ops_success_returns_terminal_without_rollback() {
        let calls = RefCell::new(Vec::<&'static str>::new());

        let value = enter_with_ops(
            || {
                calls.borrow_mut().push("enable_raw_mode");
                Ok(())
            },
            || {
                calls.borrow_mut().push("enter_alt_screen");
                Ok(())
            },
            || {
                calls.borrow_mut().push("create_terminal");
                Ok::<_, anyhow::Error>("terminal")
            },
            || {
                calls.borrow_mut().push("leave_alt_screen");
                Ok(())
            },
            || {
                calls.borrow_mut().push("disable_raw_mode");
                Ok(())
            },
        )
        .expect("enter should succeed");

        assert_eq!(value, "terminal");
        assert_eq!(
            calls.into_inner(),
            vec!["enable_raw_mode", "enter_alt_screen", "create_terminal"]
        );
    }
}
