use crossterm::event::{KeyCode, KeyEvent};

use crate::keymap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BinaryChoice {
    pub(crate) yes_selected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryChoiceEvent {
    Continue,
    ConfirmYes,
    ConfirmNo,
    Back,
}

impl BinaryChoice {
    pub(crate) fn new(default_yes: bool) -> Self {
        Self {
            yes_selected: default_yes,
        }
    }

    pub(crate) fn on_key(&mut self, key: KeyEvent) -> BinaryChoiceEvent {
        if keymap::is_back(key) {
            return BinaryChoiceEvent::Back;
        }

        match key.code {
            KeyCode::Char(' ') => self.yes_selected = !self.yes_selected,
            KeyCode::Left | KeyCode::Char('h') | KeyCode::Char('n') => self.yes_selected = false,
            KeyCode::Right | KeyCode::Char('l') | KeyCode::Char('y') => self.yes_selected = true,
            KeyCode::Enter if self.yes_selected => return BinaryChoiceEvent::ConfirmYes,
            KeyCode::Enter => return BinaryChoiceEvent::ConfirmNo,
            _ => {}
        }
        BinaryChoiceEvent::Continue
    }

    pub(crate) fn selected_label(&self) -> &'static str {
        if self.yes_selected { "Yes" } else { "No" }
    }
}
