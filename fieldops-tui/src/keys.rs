//! Keybinding definitions for the TUI.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use fieldops_core::Checkpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    NextView,
    PrevView,
    MoveUp,
    MoveDown,
    Checkpoint(Checkpoint),
    StartNextLap,
    Refresh,
    FocusInput,
    AttachPhoto,
    ConfirmReturn,
    RemovePhoto,
    Logout,
    Dismiss,
}

/// Keys while a text field has focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    Submit,
    Leave,
    Edit(KeyEvent),
}

pub fn map_key(event: KeyEvent) -> Option<Action> {
    let KeyEvent { code, modifiers, .. } = event;

    if modifiers.contains(KeyModifiers::CONTROL) {
        return match code {
            KeyCode::Char('c') => Some(Action::Quit),
            KeyCode::Char('r') => Some(Action::Refresh),
            _ => None,
        };
    }

    match code {
        KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Tab => Some(Action::NextView),
        KeyCode::BackTab => Some(Action::PrevView),
        KeyCode::Up | KeyCode::Char('k') => Some(Action::MoveUp),
        KeyCode::Down | KeyCode::Char('j') => Some(Action::MoveDown),
        KeyCode::Char('a') => Some(Action::Checkpoint(Checkpoint::Arrival)),
        KeyCode::Char('s') => Some(Action::Checkpoint(Checkpoint::Departure)),
        KeyCode::Char('f') => Some(Action::Checkpoint(Checkpoint::Completion)),
        KeyCode::Char('n') => Some(Action::StartNextLap),
        KeyCode::Char('r') => Some(Action::Refresh),
        KeyCode::Char('i') | KeyCode::Enter => Some(Action::FocusInput),
        KeyCode::Char('p') => Some(Action::AttachPhoto),
        KeyCode::Char('c') => Some(Action::ConfirmReturn),
        KeyCode::Char('x') => Some(Action::RemovePhoto),
        KeyCode::Char('L') => Some(Action::Logout),
        KeyCode::Esc => Some(Action::Dismiss),
        _ => None,
    }
}

pub fn map_input_key(event: KeyEvent) -> InputAction {
    match event.code {
        KeyCode::Enter => InputAction::Submit,
        KeyCode::Esc => InputAction::Leave,
        _ => InputAction::Edit(event),
    }
}
